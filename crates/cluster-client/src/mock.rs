//! In-memory cluster clients for unit testing
//!
//! [`MockClusterClient`] stores objects keyed by namespace/name and mimics
//! the API server semantics the controllers rely on: atomic create with
//! `AlreadyExists`, resourceVersion checks on updates and status patches, and
//! `NotFound` on missing objects. Operations can be made to fail on demand,
//! and every write is counted so tests can assert on side effects.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crds::{Cluster, Machine, RKE2Config, RKE2ControlPlane, CLUSTER_NAME_LABEL};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::Resource;

use crate::client_trait::{ClusterClientTrait, WorkloadClusterTrait};
use crate::error::ClientError;
use crate::workload::CONTROL_PLANE_NODE_LABEL;

type Key = (String, String);
type Store<T> = Arc<Mutex<HashMap<Key, T>>>;

/// Failure returned by an operation made to fail with [`MockClusterClient::fail_operation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    NotFound,
    AlreadyExists,
    Conflict,
    /// Any other API error
    Unavailable,
}

impl MockFailure {
    fn to_error(self, op: &str) -> ClientError {
        match self {
            MockFailure::NotFound => ClientError::NotFound(format!("injected by {}", op)),
            MockFailure::AlreadyExists => ClientError::AlreadyExists(format!("injected by {}", op)),
            MockFailure::Conflict => ClientError::Conflict(format!("injected by {}", op)),
            MockFailure::Unavailable => ClientError::InvalidObject(format!("injected failure in {}", op)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Injected {
    failure: MockFailure,
    /// None fails every call
    remaining: Option<usize>,
}

/// Number of writes performed per operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub secret_creates: usize,
    pub secret_updates: usize,
    pub config_map_creates: usize,
    pub config_map_deletes: usize,
    pub config_status_patches: usize,
    pub control_plane_status_patches: usize,
    pub machine_status_patches: usize,
}

/// Mock management cluster client
#[derive(Clone, Default)]
pub struct MockClusterClient {
    pub(crate) configs: Store<RKE2Config>,
    pub(crate) control_planes: Store<RKE2ControlPlane>,
    pub(crate) clusters: Store<Cluster>,
    pub(crate) machines: Store<Machine>,
    pub(crate) secrets: Store<Secret>,
    pub(crate) config_maps: Store<ConfigMap>,
    pub(crate) workloads: Arc<Mutex<HashMap<Key, Arc<MockWorkloadCluster>>>>,
    failures: Arc<Mutex<HashMap<String, Injected>>>,
    writes: Arc<Mutex<WriteCounts>>,
    next_version: Arc<Mutex<u64>>,
}

fn key_of<K: Resource>(object: &K) -> Result<Key, ClientError> {
    let meta = object.meta();
    match (&meta.namespace, &meta.name) {
        (Some(namespace), Some(name)) => Ok((namespace.clone(), name.clone())),
        _ => Err(ClientError::InvalidObject("object needs metadata.namespace and metadata.name".to_string())),
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

impl MockClusterClient {
    /// Create an empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` (a trait method name, e.g. "create_secret") fail on every call
    pub fn fail_operation(&self, op: &str, failure: MockFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(op.to_string(), Injected { failure, remaining: None });
    }

    /// Make `op` fail for the next `times` calls only
    pub fn fail_operation_times(&self, op: &str, failure: MockFailure, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(op.to_string(), Injected { failure, remaining: Some(times) });
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn check(&self, op: &str) -> Result<(), ClientError> {
        let mut failures = self.failures.lock().unwrap();
        let Some(injected) = failures.get_mut(op) else {
            return Ok(());
        };
        let failure = injected.failure;
        let exhausted = match injected.remaining {
            None => false,
            Some(0) => {
                failures.remove(op);
                return Ok(());
            }
            Some(remaining) => {
                injected.remaining = Some(remaining - 1);
                remaining == 1
            }
        };
        if exhausted {
            failures.remove(op);
        }
        Err(failure.to_error(op))
    }

    fn bump_version(&self) -> String {
        let mut version = self.next_version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    /// Writes performed so far
    pub fn writes(&self) -> WriteCounts {
        self.writes.lock().unwrap().clone()
    }

    fn insert_stamped<K: Resource + Clone>(&self, store: &Store<K>, mut object: K) -> K {
        object.meta_mut().resource_version = Some(self.bump_version());
        if let Ok(key) = key_of(&object) {
            store.lock().unwrap().insert(key, object.clone());
        }
        object
    }

    // Test setup helpers

    pub fn add_rke2_config(&self, config: RKE2Config) -> RKE2Config {
        self.insert_stamped(&self.configs, config)
    }

    pub fn add_control_plane(&self, control_plane: RKE2ControlPlane) -> RKE2ControlPlane {
        self.insert_stamped(&self.control_planes, control_plane)
    }

    pub fn add_cluster(&self, cluster: Cluster) -> Cluster {
        self.insert_stamped(&self.clusters, cluster)
    }

    pub fn add_machine(&self, machine: Machine) -> Machine {
        self.insert_stamped(&self.machines, machine)
    }

    pub fn add_secret(&self, secret: Secret) -> Secret {
        self.insert_stamped(&self.secrets, secret)
    }

    pub fn add_config_map(&self, config_map: ConfigMap) -> ConfigMap {
        self.insert_stamped(&self.config_maps, config_map)
    }

    pub fn set_workload_cluster(&self, namespace: &str, cluster_name: &str, workload: MockWorkloadCluster) {
        self.workloads
            .lock()
            .unwrap()
            .insert(key(namespace, cluster_name), Arc::new(workload));
    }

    // Test inspection helpers

    pub fn stored_rke2_config(&self, namespace: &str, name: &str) -> Option<RKE2Config> {
        self.configs.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn stored_control_plane(&self, namespace: &str, name: &str) -> Option<RKE2ControlPlane> {
        self.control_planes.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn stored_machine(&self, namespace: &str, name: &str) -> Option<Machine> {
        self.machines.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn stored_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn stored_config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    /// String value of a secret key, if present and UTF-8
    pub fn secret_value(&self, namespace: &str, name: &str, data_key: &str) -> Option<String> {
        let secret = self.stored_secret(namespace, name)?;
        let bytes = secret.data?.get(data_key)?.0.clone();
        String::from_utf8(bytes).ok()
    }

    fn get_from<K: Clone>(&self, store: &Store<K>, kind: &str, namespace: &str, name: &str) -> Result<K, ClientError> {
        store
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{} {}/{}", kind, namespace, name)))
    }

    fn create_in<K: Resource + Clone>(&self, store: &Store<K>, kind: &str, object: &K) -> Result<K, ClientError> {
        let key = key_of(object)?;
        let mut guard = store.lock().unwrap();
        if guard.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!("{} {}/{}", kind, key.0, key.1)));
        }
        let mut created = object.clone();
        created.meta_mut().resource_version = Some(self.bump_version());
        guard.insert(key, created.clone());
        Ok(created)
    }

    /// Replace an object, honoring a set resourceVersion
    fn update_in<K: Resource + Clone>(
        &self,
        store: &Store<K>,
        kind: &str,
        object: &K,
        merge: impl FnOnce(&K, &K) -> K,
    ) -> Result<K, ClientError> {
        let key = key_of(object)?;
        let mut guard = store.lock().unwrap();
        let current = guard
            .get(&key)
            .ok_or_else(|| ClientError::NotFound(format!("{} {}/{}", kind, key.0, key.1)))?;
        if let Some(version) = &object.meta().resource_version
            && current.meta().resource_version.as_ref() != Some(version)
        {
            return Err(ClientError::Conflict(format!(
                "{} {}/{} has been modified",
                kind, key.0, key.1
            )));
        }
        let mut updated = merge(current, object);
        updated.meta_mut().resource_version = Some(self.bump_version());
        guard.insert(key, updated.clone());
        Ok(updated)
    }

    fn count(&self, f: impl FnOnce(&mut WriteCounts)) {
        f(&mut self.writes.lock().unwrap());
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_rke2_config(&self, namespace: &str, name: &str) -> Result<RKE2Config, ClientError> {
        self.check("get_rke2_config")?;
        self.get_from(&self.configs, "RKE2Config", namespace, name)
    }

    async fn patch_rke2_config_status(&self, config: &RKE2Config) -> Result<RKE2Config, ClientError> {
        self.check("patch_rke2_config_status")?;
        let patched = self.update_in(&self.configs, "RKE2Config", config, |current, new| {
            let mut merged = current.clone();
            merged.status = new.status.clone();
            merged
        })?;
        self.count(|w| w.config_status_patches += 1);
        Ok(patched)
    }

    async fn get_control_plane(&self, namespace: &str, name: &str) -> Result<RKE2ControlPlane, ClientError> {
        self.check("get_control_plane")?;
        self.get_from(&self.control_planes, "RKE2ControlPlane", namespace, name)
    }

    async fn patch_control_plane_status(&self, control_plane: &RKE2ControlPlane) -> Result<RKE2ControlPlane, ClientError> {
        self.check("patch_control_plane_status")?;
        let patched = self.update_in(&self.control_planes, "RKE2ControlPlane", control_plane, |current, new| {
            let mut merged = current.clone();
            merged.status = new.status.clone();
            merged
        })?;
        self.count(|w| w.control_plane_status_patches += 1);
        Ok(patched)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Cluster, ClientError> {
        self.check("get_cluster")?;
        self.get_from(&self.clusters, "Cluster", namespace, name)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, ClientError> {
        self.check("get_machine")?;
        self.get_from(&self.machines, "Machine", namespace, name)
    }

    async fn list_machines(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Machine>, ClientError> {
        self.check("list_machines")?;
        let machines = self.machines.lock().unwrap();
        let mut matched: Vec<Machine> = machines
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, machine)| {
                machine
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(CLUSTER_NAME_LABEL))
                    .is_some_and(|value| value == cluster_name)
            })
            .map(|(_, machine)| machine.clone())
            .collect();
        matched.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(matched)
    }

    async fn patch_machine_status(&self, machine: &Machine) -> Result<Machine, ClientError> {
        self.check("patch_machine_status")?;
        let patched = self.update_in(&self.machines, "Machine", machine, |current, new| {
            let mut merged = current.clone();
            merged.status = new.status.clone();
            merged
        })?;
        self.count(|w| w.machine_status_patches += 1);
        Ok(patched)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClientError> {
        self.check("get_secret")?;
        self.get_from(&self.secrets, "Secret", namespace, name)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClientError> {
        self.check("create_secret")?;
        let created = self.create_in(&self.secrets, "Secret", secret)?;
        self.count(|w| w.secret_creates += 1);
        Ok(created)
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, ClientError> {
        self.check("update_secret")?;
        let updated = self.update_in(&self.secrets, "Secret", secret, |_, new| new.clone())?;
        self.count(|w| w.secret_updates += 1);
        Ok(updated)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ClientError> {
        self.check("get_config_map")?;
        self.get_from(&self.config_maps, "ConfigMap", namespace, name)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClientError> {
        self.check("create_config_map")?;
        let created = self.create_in(&self.config_maps, "ConfigMap", config_map)?;
        self.count(|w| w.config_map_creates += 1);
        Ok(created)
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        self.check("delete_config_map")?;
        self.config_maps
            .lock()
            .unwrap()
            .remove(&key(namespace, name))
            .ok_or_else(|| ClientError::NotFound(format!("ConfigMap {}/{}", namespace, name)))?;
        self.count(|w| w.config_map_deletes += 1);
        Ok(())
    }

    async fn workload_cluster(&self, namespace: &str, cluster_name: &str) -> Result<Arc<dyn WorkloadClusterTrait>, ClientError> {
        self.check("workload_cluster")?;
        let workload = self
            .workloads
            .lock()
            .unwrap()
            .get(&key(namespace, cluster_name))
            .cloned()
            .ok_or_else(|| ClientError::Kubeconfig(format!("no kubeconfig for cluster {}/{}", namespace, cluster_name)))?;
        Ok(workload)
    }
}

/// Mock workload cluster holding a set of nodes
#[derive(Clone, Default)]
pub struct MockWorkloadCluster {
    nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    list_failure: Arc<Mutex<Option<MockFailure>>>,
    get_failures: Arc<Mutex<HashMap<String, MockFailure>>>,
}

impl MockWorkloadCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.lock().unwrap().insert(name, node);
    }

    /// Make `list_control_plane_nodes` fail
    pub fn fail_list(&self, failure: MockFailure) {
        *self.list_failure.lock().unwrap() = Some(failure);
    }

    /// Make `get_node(name)` fail while the node still shows up in listings
    pub fn fail_get(&self, name: &str, failure: MockFailure) {
        self.get_failures.lock().unwrap().insert(name.to_string(), failure);
    }
}

#[async_trait::async_trait]
impl WorkloadClusterTrait for MockWorkloadCluster {
    async fn list_control_plane_nodes(&self) -> Result<Vec<Node>, ClientError> {
        if let Some(failure) = *self.list_failure.lock().unwrap() {
            return Err(failure.to_error("list_control_plane_nodes"));
        }
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|node| {
                node.metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(CONTROL_PLANE_NODE_LABEL))
                    .is_some_and(|value| value == "true")
            })
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClientError> {
        if let Some(failure) = self.get_failures.lock().unwrap().get(name) {
            return Err(failure.to_error("get_node"));
        }
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("Node {}", name)))
    }
}
