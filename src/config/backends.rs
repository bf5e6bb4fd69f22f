//! # State Backends
//!
//! Resolution of where Terraform state is persisted.
//!
//! The supported backend stores state in a Kubernetes secret. The secret is
//! created by Terraform itself during apply; this module decides the secret's
//! identity (a deterministic suffix hashed from environment, application, and
//! resource identity), generates the backend block for the configuration
//! document, and answers existence queries against the cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DeleteParams;
use kube::Api;
use serde_json::{json, Map, Value};
use sha1::{Digest, Sha1};
use std::path::PathBuf;
use tracing::debug;

use crate::constants::{BACKEND_KIND_KUBERNETES, STATE_STORE_NAMESPACE};
use crate::error::RecipeError;
use crate::resources::ResourceId;
use crate::ResourceMetadata;

/// How the Terraform kubernetes backend reaches the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KubeConnection {
    /// Service-account credentials mounted into the pod.
    InCluster,
    /// A kubeconfig file on disk, used outside the cluster.
    Kubeconfig(PathBuf),
}

/// Discovers how to reach the cluster: in-cluster credentials first, then a
/// local kubeconfig file.
///
/// The absence of the in-cluster environment is the expected "not running in
/// cluster" signal and selects the kubeconfig fallback; any other discovery
/// failure is fatal.
pub fn discover_kube_connection() -> Result<KubeConnection, RecipeError> {
    if std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
        return Ok(KubeConnection::InCluster);
    }

    let home = std::env::var_os("HOME").ok_or_else(|| RecipeError::Discovery {
        message: "not running in cluster and HOME is unset, cannot locate kubeconfig"
            .to_string(),
        source: None,
    })?;
    let path = PathBuf::from(home).join(".kube").join("config");
    debug!(path = %path.display(), "Not running in cluster, using kubeconfig file");
    Ok(KubeConnection::Kubeconfig(path))
}

/// A Terraform state backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Generates the backend block for the configuration document, keyed by
    /// backend kind.
    fn build_backend(&self, resource: &ResourceMetadata) -> Result<Map<String, Value>, RecipeError>;

    /// Checks whether the backing store for the given backend name exists.
    /// Absence is a successful `false`, not an error.
    async fn validate_backend_exists(&self, name: &str) -> Result<bool, RecipeError>;

    /// Removes the backing store after the deployed resources are destroyed.
    async fn delete_backend(&self, name: &str) -> Result<(), RecipeError>;
}

/// Kubernetes-secret state backend.
pub struct KubernetesBackend {
    client: kube::Client,
    connection: KubeConnection,
}

impl std::fmt::Debug for KubernetesBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesBackend")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl KubernetesBackend {
    /// Creates a backend, discovering the cluster connection mode.
    pub fn new(client: kube::Client) -> Result<Self, RecipeError> {
        crate::install_default_crypto_provider();
        Ok(Self {
            client,
            connection: discover_kube_connection()?,
        })
    }

    /// Creates a backend with an explicit connection mode.
    pub fn with_connection(client: kube::Client, connection: KubeConnection) -> Self {
        crate::install_default_crypto_provider();
        Self { client, connection }
    }

    fn secrets_api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), STATE_STORE_NAMESPACE)
    }
}

#[async_trait]
impl Backend for KubernetesBackend {
    fn build_backend(&self, resource: &ResourceMetadata) -> Result<Map<String, Value>, RecipeError> {
        let suffix = backend_secret_suffix(resource)?;

        let mut details = Map::new();
        details.insert("secret_suffix".to_string(), json!(suffix));
        details.insert("namespace".to_string(), json!(STATE_STORE_NAMESPACE));
        match &self.connection {
            KubeConnection::InCluster => {
                details.insert("in_cluster_config".to_string(), json!(true));
            }
            KubeConnection::Kubeconfig(path) => {
                details.insert("config_path".to_string(), json!(path.display().to_string()));
            }
        }

        let mut backend = Map::new();
        backend.insert(BACKEND_KIND_KUBERNETES.to_string(), Value::Object(details));
        Ok(backend)
    }

    async fn validate_backend_exists(&self, name: &str) -> Result<bool, RecipeError> {
        let secret = self
            .secrets_api()
            .get_opt(name)
            .await
            .map_err(|e| RecipeError::discovery(
                format!("error retrieving kubernetes secret {name:?} for terraform state"),
                e,
            ))?;
        Ok(secret.is_some())
    }

    async fn delete_backend(&self, name: &str) -> Result<(), RecipeError> {
        self.secrets_api()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| RecipeError::discovery(
                format!("error deleting kubernetes secret {name:?} for terraform state"),
                e,
            ))?;
        Ok(())
    }
}

/// Computes the deterministic state secret suffix for a deployment:
/// `hex(sha1(lowercase(<environment name>-<application name>-<resource id>)))`.
///
/// All three ids must parse; a failure for any of them fails the whole
/// operation with a validation error so no partial backend is ever produced.
/// Recomputing for the same triple always yields the same value, which is
/// the basis for idempotent backend rediscovery across deploys and deletes.
pub fn backend_secret_suffix(resource: &ResourceMetadata) -> Result<String, RecipeError> {
    let environment = ResourceId::parse(&resource.environment_id)?;
    let application = ResourceId::parse(&resource.application_id)?;
    // Parsed for validation only; the full id feeds the hash.
    ResourceId::parse(&resource.resource_id)?;

    let key = format!(
        "{}-{}-{}",
        environment.name(),
        application.name(),
        resource.resource_id
    )
    .to_lowercase();

    let digest = Sha1::digest(key.as_bytes());
    Ok(hex::encode(digest))
}
