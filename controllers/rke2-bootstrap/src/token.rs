//! Cluster join token
//!
//! One token per cluster, stored in Secret `<cluster>-token` under `value`.
//! The init path creates it; join paths only read it. An existing token is
//! never replaced, so every node of a cluster presents the same value. A
//! Secret left without a value is filled in place.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cluster_client::ClusterClientTrait;
use crds::{CLUSTER_NAME_LABEL, CLUSTER_SECRET_TYPE, Cluster};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use rand::RngCore;
use rke2::secret_data;
use tracing::{debug, info};

use crate::error::ControllerError;

pub const TOKEN_KEY: &str = "value";
const TOKEN_BYTES: usize = 16;

pub fn token_secret_name(cluster_name: &str) -> String {
    format!("{}-token", cluster_name)
}

/// 16 random bytes, URL-safe base64 without padding
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Return the cluster token, creating it when it does not exist yet
///
/// A concurrent creator wins; its value is read back and returned. A token
/// Secret without a value is filled in place.
pub async fn ensure_token(client: &dyn ClusterClientTrait, cluster: &Cluster) -> Result<String, ControllerError> {
    let namespace = cluster.namespace().unwrap_or_default();
    let cluster_name = cluster.name_any();
    let name = token_secret_name(&cluster_name);

    match client.get_secret(&namespace, &name).await {
        Ok(secret) if secret_data(&secret, TOKEN_KEY).is_some_and(|v| !v.is_empty()) => {
            return token_value(&secret, &namespace, &name);
        }
        Ok(secret) => return repair_token(client, secret, &namespace, &name).await,
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let token = generate_token();
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.clone()),
            labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster_name.clone())])),
            owner_references: cluster.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        type_: Some(CLUSTER_SECRET_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            TOKEN_KEY.to_string(),
            ByteString(token.clone().into_bytes()),
        )])),
        ..Default::default()
    };

    match client.create_secret(&secret).await {
        Ok(_) => {
            info!("Created token secret {}/{}", namespace, name);
            Ok(token)
        }
        Err(e) if e.is_already_exists() => {
            debug!("Token secret {}/{} created concurrently, re-reading", namespace, name);
            lookup_token(client, &namespace, &cluster_name).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Write a fresh token into an existing Secret that carries none
///
/// The update is guarded by the Secret's resourceVersion, so a concurrent
/// repair surfaces as a conflict and the next attempt reads the winner.
async fn repair_token(
    client: &dyn ClusterClientTrait,
    mut secret: Secret,
    namespace: &str,
    name: &str,
) -> Result<String, ControllerError> {
    let token = generate_token();
    secret
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(TOKEN_KEY.to_string(), ByteString(token.clone().into_bytes()));
    client.update_secret(&secret).await?;
    info!("Filled empty token secret {}/{}", namespace, name);
    Ok(token)
}

/// Read the token of an initialized cluster
pub async fn lookup_token(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    cluster_name: &str,
) -> Result<String, ControllerError> {
    let name = token_secret_name(cluster_name);
    match client.get_secret(namespace, &name).await {
        Ok(secret) => token_value(&secret, namespace, &name),
        Err(e) if e.is_not_found() => Err(ControllerError::MissingToken(format!(
            "secret {}/{} not found",
            namespace, name
        ))),
        Err(e) => Err(e.into()),
    }
}

fn token_value(secret: &Secret, namespace: &str, name: &str) -> Result<String, ControllerError> {
    secret_data(secret, TOKEN_KEY)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ControllerError::MissingToken(format!("secret {}/{} has no {} key", namespace, name, TOKEN_KEY)))
}
