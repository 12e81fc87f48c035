//! RKE2Config reconciliation
//!
//! Drives a bootstrap request to `ready=true` by producing its payload
//! Secret exactly once:
//!
//! 1. wait for the owning Machine, its Cluster and cluster infrastructure
//! 2. adopt a payload the Machine already references
//! 3. before the control plane is initialized, let exactly one control plane
//!    Machine through the init lock and render the init payload
//! 4. afterwards, render join payloads against the first available server
//!
//! Status is written once at the end of every reconcile that got past the
//! pause check.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use cluster_client::ClusterClientTrait;
use controller_common::BackoffLedger;
use crds::conditions::{self, reasons};
use crds::{
    CLUSTER_API_GROUP, CLUSTER_NAME_LABEL, CLUSTER_SECRET_TYPE, Cluster, ConditionSeverity, Conditioned, Machine,
    PAUSED_ANNOTATION, RKE2Config, RKE2ConfigStatus, RKE2ControlPlane, find_owner,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use rke2::{AssemblyInput, Certificates, PayloadAssembler, Rke2Assembler, Role};
use tracing::{debug, info, warn};

use crate::error::ControllerError;
use crate::init_lock::{ConfigMapInitLock, InitLock};
use crate::token;

/// Wait for owner, cluster or infrastructure
pub const DEPENDENCY_REQUEUE: Duration = Duration::from_secs(10);
/// Wait for control plane initialization or the init lock
pub const INIT_REQUEUE: Duration = Duration::from_secs(60);
/// Wait for a server address to join against
pub const JOIN_REQUEUE: Duration = Duration::from_secs(30);

/// Key of the payload in the bootstrap data Secret
pub const PAYLOAD_KEY: &str = "value";
const PAYLOAD_FORMAT_KEY: &str = "format";
const PAYLOAD_FORMAT: &str = "cloud-config";

const CONTROL_PLANE_GROUP: &str = "controlplane.cluster.x-k8s.io";

fn status_mut(config: &mut RKE2Config) -> &mut RKE2ConfigStatus {
    config.status.get_or_insert_with(RKE2ConfigStatus::default)
}

fn is_paused(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|annotations| annotations.contains_key(PAUSED_ANNOTATION))
}

/// Reconciles RKE2Config resources.
pub struct Reconciler {
    client: Arc<dyn ClusterClientTrait>,
    assembler: Arc<dyn PayloadAssembler>,
    init_lock: Arc<dyn InitLock>,
    /// Per-resource retry delays used by the watcher error policy
    backoff: BackoffLedger,
}

impl Reconciler {
    /// Reconciler with the RKE2 assembler and the ConfigMap init lock
    pub fn new(client: Arc<dyn ClusterClientTrait>) -> Self {
        let assembler = Arc::new(Rke2Assembler::new(client.clone()));
        let init_lock = Arc::new(ConfigMapInitLock::new(client.clone()));
        Self::with_components(client, assembler, init_lock)
    }

    pub fn with_components(
        client: Arc<dyn ClusterClientTrait>,
        assembler: Arc<dyn PayloadAssembler>,
        init_lock: Arc<dyn InitLock>,
    ) -> Self {
        Self {
            client,
            assembler,
            init_lock,
            backoff: BackoffLedger::new(),
        }
    }

    pub fn backoff(&self) -> &BackoffLedger {
        &self.backoff
    }

    /// Reconcile one RKE2Config
    pub async fn reconcile_rke2_config(&self, config: &RKE2Config) -> Result<Action, ControllerError> {
        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_any();

        let Some(owner) = find_owner(config.metadata.owner_references.as_deref(), CLUSTER_API_GROUP, "Machine") else {
            debug!("RKE2Config {}/{} has no owning Machine yet", namespace, name);
            return Ok(Action::requeue(DEPENDENCY_REQUEUE));
        };
        let machine = match self.client.get_machine(&namespace, &owner.name).await {
            Ok(machine) => machine,
            Err(e) if e.is_not_found() => {
                debug!("Machine {}/{} owning RKE2Config {} not found", namespace, owner.name, name);
                return Ok(Action::requeue(DEPENDENCY_REQUEUE));
            }
            Err(e) => return Err(e.into()),
        };

        let control_plane = match find_owner(
            machine.metadata.owner_references.as_deref(),
            CONTROL_PLANE_GROUP,
            "RKE2ControlPlane",
        ) {
            Some(owner) => Some(self.client.get_control_plane(&namespace, &owner.name).await?),
            None => None,
        };

        let cluster = match self.client.get_cluster(&namespace, &machine.spec.cluster_name).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => {
                debug!(
                    "Cluster {}/{} of RKE2Config {} not found",
                    namespace, machine.spec.cluster_name, name
                );
                return Ok(Action::requeue(DEPENDENCY_REQUEUE));
            }
            Err(e) => return Err(e.into()),
        };

        if cluster.spec.paused || is_paused(&cluster.metadata) || is_paused(&config.metadata) {
            info!("Reconciliation of RKE2Config {}/{} is paused", namespace, name);
            return Ok(Action::await_change());
        }

        let mut updated = config.clone();
        let result = self
            .reconcile_bootstrap(&mut updated, &machine, &cluster, control_plane)
            .await;

        let status = status_mut(&mut updated);
        status.set_summary(&[conditions::DATA_SECRET_AVAILABLE]);
        if result.is_ok() {
            status.observed_generation = config.metadata.generation;
        }

        if updated.status != config.status {
            if let Err(e) = self.client.patch_rke2_config_status(&updated).await {
                return match result {
                    Ok(_) => Err(e.into()),
                    Err(original) => {
                        warn!("Failed to patch status of RKE2Config {}/{}: {}", namespace, name, e);
                        Err(original)
                    }
                };
            }
            debug!("Patched status of RKE2Config {}/{}", namespace, name);
        }

        result
    }

    async fn reconcile_bootstrap(
        &self,
        config: &mut RKE2Config,
        machine: &Machine,
        cluster: &Cluster,
        control_plane: Option<RKE2ControlPlane>,
    ) -> Result<Action, ControllerError> {
        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_any();

        let infrastructure_ready = cluster.status.as_ref().is_some_and(|s| s.infrastructure_ready);
        if !infrastructure_ready {
            info!("Cluster infrastructure of RKE2Config {}/{} is not ready yet", namespace, name);
            status_mut(config).mark_false(
                conditions::DATA_SECRET_AVAILABLE,
                reasons::WAITING_FOR_CLUSTER_INFRASTRUCTURE,
                ConditionSeverity::Info,
                "",
            );
            return Ok(Action::requeue(DEPENDENCY_REQUEUE));
        }

        let status = status_mut(config);
        if let Some(secret_name) = machine
            .spec
            .bootstrap
            .data_secret_name
            .as_deref()
            .filter(|s| !s.is_empty())
            && (!status.ready || status.data_secret_name.is_none())
        {
            info!(
                "Machine of RKE2Config {}/{} already references bootstrap data {}",
                namespace, name, secret_name
            );
            status.ready = true;
            status.data_secret_name = Some(secret_name.to_string());
            status.mark_true(conditions::DATA_SECRET_AVAILABLE);
            return Ok(Action::await_change());
        }
        if status.ready {
            debug!("RKE2Config {}/{} is already bootstrapped", namespace, name);
            status.mark_true(conditions::DATA_SECRET_AVAILABLE);
            return Ok(Action::await_change());
        }

        let initialized = cluster
            .status
            .as_ref()
            .is_some_and(|s| s.is_true(conditions::CONTROL_PLANE_INITIALIZED));

        if !initialized {
            let Some(control_plane) = control_plane else {
                info!(
                    "Worker RKE2Config {}/{} waits for control plane initialization",
                    namespace, name
                );
                return Ok(Action::requeue(INIT_REQUEUE));
            };
            return self.init_attempt(config, machine, cluster, control_plane).await;
        }

        if !self.init_lock.unlock(cluster).await {
            warn!("Could not release init lock of cluster {}/{}", namespace, cluster.name_any());
        }

        match control_plane {
            Some(control_plane) => {
                self.join(config, cluster, control_plane, Role::JoinControlPlane).await
            }
            None => {
                let Some(reference) = cluster.spec.control_plane_ref.as_ref().filter(|r| !r.is_empty()) else {
                    debug!("Cluster {}/{} has no control plane reference", namespace, cluster.name_any());
                    return Ok(Action::requeue(DEPENDENCY_REQUEUE));
                };
                let control_plane = match self
                    .client
                    .get_control_plane(reference.namespace_or(&namespace), &reference.name)
                    .await
                {
                    Ok(control_plane) => control_plane,
                    Err(e) => {
                        debug!("Control plane {} of RKE2Config {}/{} unavailable: {}", reference.name, namespace, name, e);
                        return Ok(Action::requeue(DEPENDENCY_REQUEUE));
                    }
                };
                self.join(config, cluster, control_plane, Role::JoinWorker).await
            }
        }
    }

    async fn init_attempt(
        &self,
        config: &mut RKE2Config,
        machine: &Machine,
        cluster: &Cluster,
        control_plane: RKE2ControlPlane,
    ) -> Result<Action, ControllerError> {
        let machine_name = machine.name_any();
        if !self.init_lock.lock(cluster, &machine_name).await {
            info!(
                "Machine {} waits for the init lock of cluster {}",
                machine_name,
                cluster.name_any()
            );
            return Ok(Action::requeue(INIT_REQUEUE));
        }

        match self.init_locked(config, cluster, control_plane).await {
            Ok(action) => Ok(action),
            Err(err) => {
                if self.init_lock.unlock(cluster).await {
                    Err(err)
                } else {
                    Err(ControllerError::InitLockRelease {
                        cluster: cluster.name_any(),
                        source: Box::new(err),
                    })
                }
            }
        }
    }

    async fn init_locked(
        &self,
        config: &mut RKE2Config,
        cluster: &Cluster,
        control_plane: RKE2ControlPlane,
    ) -> Result<Action, ControllerError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let owner = cluster.controller_owner_ref(&());

        let certificates =
            match Certificates::lookup_or_generate(self.client.as_ref(), &namespace, &cluster.name_any(), owner).await {
                Ok(certificates) => {
                    status_mut(config).mark_true(conditions::CERTIFICATES_AVAILABLE);
                    certificates
                }
                Err(e) => {
                    status_mut(config).mark_false(
                        conditions::CERTIFICATES_AVAILABLE,
                        reasons::CERTIFICATES_GENERATION_FAILED,
                        ConditionSeverity::Warning,
                        e.to_string(),
                    );
                    return Err(e.into());
                }
            };

        let token = token::ensure_token(self.client.as_ref(), cluster).await?;

        let input = AssemblyInput {
            role: Role::Init { certificates },
            cluster: cluster.clone(),
            config: config.clone(),
            control_plane: Some(control_plane),
            token,
            server_host: cluster.spec.control_plane_endpoint.host.clone(),
        };
        self.generate_and_store(config, cluster, input).await
    }

    async fn join(
        &self,
        config: &mut RKE2Config,
        cluster: &Cluster,
        control_plane: RKE2ControlPlane,
        role: Role,
    ) -> Result<Action, ControllerError> {
        let namespace = config.namespace().unwrap_or_default();
        let token = token::lookup_token(self.client.as_ref(), &namespace, &cluster.name_any()).await?;

        let Some(server) = control_plane.first_available_server().map(str::to_string) else {
            info!(
                "No available server to join for RKE2Config {}/{}",
                namespace,
                config.name_any()
            );
            return Ok(Action::requeue(JOIN_REQUEUE));
        };

        let input = AssemblyInput {
            role,
            cluster: cluster.clone(),
            config: config.clone(),
            control_plane: Some(control_plane),
            token,
            server_host: server,
        };
        self.generate_and_store(config, cluster, input).await
    }

    async fn generate_and_store(
        &self,
        config: &mut RKE2Config,
        cluster: &Cluster,
        input: AssemblyInput,
    ) -> Result<Action, ControllerError> {
        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_any();

        let stored = match self.assembler.assemble(&input).await {
            Ok(payload) => self.store_payload(config, cluster, payload).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            status_mut(config).mark_false(
                conditions::DATA_SECRET_AVAILABLE,
                reasons::DATA_SECRET_GENERATION_FAILED,
                ConditionSeverity::Warning,
                e.to_string(),
            );
            return Err(e);
        }

        info!(
            "Stored {} bootstrap data for RKE2Config {}/{}",
            input.role.name(),
            namespace,
            name
        );
        let status = status_mut(config);
        status.data_secret_name = Some(name);
        status.ready = true;
        status.mark_true(conditions::DATA_SECRET_AVAILABLE);
        Ok(Action::await_change())
    }

    /// Create the payload Secret; an existing one is kept when identical and
    /// replaced otherwise
    async fn store_payload(&self, config: &RKE2Config, cluster: &Cluster, payload: Vec<u8>) -> Result<(), ControllerError> {
        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_any();

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.name_any())])),
                owner_references: config.controller_owner_ref(&()).map(|o| vec![o]),
                ..Default::default()
            },
            type_: Some(CLUSTER_SECRET_TYPE.to_string()),
            data: Some(BTreeMap::from([
                (PAYLOAD_KEY.to_string(), ByteString(payload)),
                (PAYLOAD_FORMAT_KEY.to_string(), ByteString(PAYLOAD_FORMAT.as_bytes().to_vec())),
            ])),
            ..Default::default()
        };

        match self.client.create_secret(&secret).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => {
                let mut existing = self.client.get_secret(&namespace, &name).await?;
                if existing.data == secret.data {
                    debug!("Bootstrap data {}/{} is up to date", namespace, name);
                    return Ok(());
                }
                info!("Replacing stale bootstrap data {}/{}", namespace, name);
                existing.data = secret.data;
                existing.type_ = secret.type_;
                self.client.update_secret(&existing).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
