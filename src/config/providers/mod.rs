//! # Provider Config Builders
//!
//! Each builder turns environment-level settings into the configuration
//! block for one Terraform provider. The engine holds an explicit registry
//! of supported builders, injected at construction; providers a module
//! requires that are not in the registry are deliberately skipped so the
//! tool falls back to its own defaults.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::Configuration;

mod aws;
mod azure;
mod kubernetes;

pub use aws::AwsProvider;
pub use azure::AzureProvider;
pub use kubernetes::KubernetesProvider;

/// Terraform name of the AWS provider.
pub const AWS_PROVIDER_NAME: &str = "aws";

/// Terraform name of the Azure provider.
pub const AZURE_PROVIDER_NAME: &str = "azurerm";

/// Terraform name of the Kubernetes provider.
pub const KUBERNETES_PROVIDER_NAME: &str = "kubernetes";

/// Builds the configuration block for a single Terraform provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generates the provider's configuration from environment settings.
    /// An empty map means the provider needs no explicit configuration and
    /// no block is emitted.
    async fn build_config(&self, env_config: &Configuration) -> Result<Map<String, Value>>;
}

/// Registry of supported provider builders, keyed by Terraform provider name.
pub type ProviderRegistry = HashMap<String, Arc<dyn Provider>>;

/// The default registry: AWS, Azure, and Kubernetes.
pub fn default_providers() -> ProviderRegistry {
    let mut registry: ProviderRegistry = HashMap::new();
    registry.insert(AWS_PROVIDER_NAME.to_string(), Arc::new(AwsProvider));
    registry.insert(AZURE_PROVIDER_NAME.to_string(), Arc::new(AzureProvider));
    registry.insert(
        KUBERNETES_PROVIDER_NAME.to_string(),
        Arc::new(KubernetesProvider),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_members() {
        let registry = default_providers();
        assert!(registry.contains_key(AWS_PROVIDER_NAME));
        assert!(registry.contains_key(AZURE_PROVIDER_NAME));
        assert!(registry.contains_key(KUBERNETES_PROVIDER_NAME));
        assert_eq!(registry.len(), 3);
    }
}
