//! Kubernetes provider config builder.
//!
//! Reuses the same connection discovery as the state backend: in-cluster
//! credentials when running in a pod, a kubeconfig file otherwise.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::backends::{discover_kube_connection, KubeConnection};
use crate::Configuration;

use super::Provider;

/// Builds the `kubernetes` provider block.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubernetesProvider;

#[async_trait]
impl Provider for KubernetesProvider {
    async fn build_config(&self, _env_config: &Configuration) -> Result<Map<String, Value>> {
        let mut config = Map::new();
        match discover_kube_connection()? {
            KubeConnection::InCluster => {
                config.insert("in_cluster_config".to_string(), json!(true));
            }
            KubeConnection::Kubeconfig(path) => {
                config.insert(
                    "config_path".to_string(),
                    json!(path.display().to_string()),
                );
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_config_selects_exactly_one_mode() {
        if std::env::var_os("HOME").is_none() {
            return;
        }
        let config = KubernetesProvider
            .build_config(&Configuration::default())
            .await
            .unwrap();
        let in_cluster = config.contains_key("in_cluster_config");
        let kubeconfig = config.contains_key("config_path");
        assert!(in_cluster ^ kubeconfig);
    }
}
