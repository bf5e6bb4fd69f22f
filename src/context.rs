//! # Recipe Context
//!
//! The structured context object injected into Terraform modules under the
//! reserved `context` parameter, letting a module look up its own deployment
//! identity (environment, application, resource, runtime) without the caller
//! hand-wiring every value.
//!
//! Construction is a pure function of the resource metadata and environment
//! configuration; the only failure mode is malformed resource ids.

use serde::{Deserialize, Serialize};

use crate::error::RecipeError;
use crate::resources::ResourceId;
use crate::{Configuration, ResourceMetadata, RuntimeConfiguration};

/// Name and id of a referenced resource.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResourceInfo {
    pub name: String,
    pub id: String,
}

/// The resource a recipe is deploying, including its qualified type.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Resource {
    #[serde(flatten)]
    pub info: ResourceInfo,
    #[serde(rename = "type")]
    pub resource_type: String,
}

/// The recipe context object as serialized into module parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecipeContext {
    pub resource: Resource,
    pub application: ResourceInfo,
    pub environment: ResourceInfo,
    pub runtime: RuntimeConfiguration,
}

impl RecipeContext {
    /// Builds the context from the deployment request. All three ids must be
    /// valid; a parse failure for any of them fails the whole operation.
    pub fn new(
        metadata: &ResourceMetadata,
        config: &Configuration,
    ) -> Result<Self, RecipeError> {
        let resource = ResourceId::parse(&metadata.resource_id)?;
        let environment = ResourceId::parse(&metadata.environment_id)?;
        let application = ResourceId::parse(&metadata.application_id)?;

        Ok(Self {
            resource: Resource {
                info: ResourceInfo {
                    name: resource.name().to_string(),
                    id: metadata.resource_id.clone(),
                },
                resource_type: resource.qualified_type(),
            },
            application: ResourceInfo {
                name: application.name().to_string(),
                id: metadata.application_id.clone(),
            },
            environment: ResourceInfo {
                name: environment.name().to_string(),
                id: metadata.environment_id.clone(),
            },
            runtime: config.runtime.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KubernetesRuntime;

    fn test_metadata() -> ResourceMetadata {
        ResourceMetadata {
            name: "redis-azure".to_string(),
            resource_id: "/planes/radius/local/resourceGroups/test-group/providers/Applications.Datastores/redisCaches/redis".to_string(),
            environment_id: "/planes/radius/local/resourceGroups/test-group/providers/Applications.Core/environments/env0".to_string(),
            application_id: "/planes/radius/local/resourceGroups/test-group/providers/Applications.Core/applications/testApp".to_string(),
            parameters: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_context_carries_identity() {
        let config = Configuration {
            runtime: RuntimeConfiguration {
                kubernetes: Some(KubernetesRuntime {
                    namespace: "app-ns".to_string(),
                    environment_namespace: "env-ns".to_string(),
                }),
            },
            ..Default::default()
        };

        let ctx = RecipeContext::new(&test_metadata(), &config).unwrap();
        assert_eq!(ctx.resource.info.name, "redis");
        assert_eq!(
            ctx.resource.resource_type,
            "applications.datastores/rediscaches"
        );
        assert_eq!(ctx.application.name, "testApp");
        assert_eq!(ctx.environment.name, "env0");
        assert_eq!(ctx.runtime.kubernetes.unwrap().namespace, "app-ns");
    }

    #[test]
    fn test_context_serialization_shape() {
        let ctx = RecipeContext::new(&test_metadata(), &Configuration::default()).unwrap();
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["resource"]["name"], "redis");
        assert_eq!(value["resource"]["type"], "applications.datastores/rediscaches");
        assert!(value["environment"]["id"]
            .as_str()
            .unwrap()
            .ends_with("environments/env0"));
    }

    #[test]
    fn test_malformed_id_fails_construction() {
        let mut metadata = test_metadata();
        metadata.application_id = "garbage".to_string();
        let err = RecipeContext::new(&metadata, &Configuration::default()).unwrap_err();
        assert!(matches!(err, RecipeError::Validation { .. }));
    }
}
