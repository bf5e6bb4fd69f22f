//! Resource type schemas and property access classifications.
//!
//! AWS publishes a schema per resource type declaring which properties are
//! read-only, create-only, write-only, and so on, as JSON-pointer paths
//! (`/properties/ClusterEndpoint/Address`). The schema is fetched per update
//! operation via CloudFormation's registry and discarded; caching is an
//! external collaborator's concern.

use async_trait::async_trait;
use aws_sdk_cloudformation::types::RegistryType;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use crate::constants::SCHEMA_PROPERTIES_PREFIX;
use crate::error::RecipeError;

/// Property access classifications extracted from a resource type schema,
/// each a set of flattened property paths (`ClusterEndpoint/Address`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyClassification {
    pub read_only: BTreeSet<String>,
    pub create_only: BTreeSet<String>,
    pub write_only: BTreeSet<String>,
    pub conditional_create_only: BTreeSet<String>,
    pub non_public: BTreeSet<String>,
    pub deprecated: BTreeSet<String>,
}

impl PropertyClassification {
    /// Extracts the classification sets from a resource type schema
    /// document. Missing classification lists are empty sets.
    pub fn from_schema(schema: &Value) -> Result<Self, RecipeError> {
        if !schema.is_object() {
            return Err(RecipeError::validation(
                "resource type schema is not an object",
            ));
        }
        Ok(Self {
            read_only: paths_from(schema, "readOnlyProperties")?,
            create_only: paths_from(schema, "createOnlyProperties")?,
            write_only: paths_from(schema, "writeOnlyProperties")?,
            conditional_create_only: paths_from(schema, "conditionalCreateOnlyProperties")?,
            non_public: paths_from(schema, "nonPublicProperties")?,
            deprecated: paths_from(schema, "deprecatedProperties")?,
        })
    }

    /// Whether the property at `path` may never change on an update.
    pub fn is_immutable(&self, path: &str) -> bool {
        self.read_only.contains(path) || self.create_only.contains(path)
    }

    /// Whether the live API never returns the property at `path`.
    pub fn is_write_only(&self, path: &str) -> bool {
        self.write_only.contains(path)
    }
}

fn paths_from(schema: &Value, key: &str) -> Result<BTreeSet<String>, RecipeError> {
    let Some(value) = schema.get(key) else {
        return Ok(BTreeSet::new());
    };
    let entries = value.as_array().ok_or_else(|| {
        RecipeError::validation(format!("schema {key} is not an array of property paths"))
    })?;

    let mut paths = BTreeSet::new();
    for entry in entries {
        let pointer = entry.as_str().ok_or_else(|| {
            RecipeError::validation(format!("schema {key} contains a non-string path"))
        })?;
        // Paths outside /properties/ address definitions, not instance
        // properties.
        if let Some(path) = pointer.strip_prefix(SCHEMA_PROPERTIES_PREFIX) {
            paths.insert(path.to_string());
        } else {
            debug!(pointer = %pointer, "Ignoring schema path outside the properties root");
        }
    }
    Ok(paths)
}

/// Fetches resource type schemas.
#[async_trait]
pub trait SchemaClient: Send + Sync {
    /// Fetches the schema document for a resource type, e.g.
    /// `AWS::MemoryDB::Cluster`.
    async fn resource_type_schema(&self, type_name: &str) -> Result<Value, RecipeError>;
}

/// Schema client backed by the CloudFormation registry.
#[derive(Debug, Clone)]
pub struct CloudFormationSchemaClient {
    client: aws_sdk_cloudformation::Client,
}

impl CloudFormationSchemaClient {
    pub fn new(client: aws_sdk_cloudformation::Client) -> Self {
        crate::install_default_crypto_provider();
        Self { client }
    }

    /// Builds a client from the default credential chain.
    pub async fn from_env() -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(aws_sdk_cloudformation::Client::new(&config))
    }
}

#[async_trait]
impl SchemaClient for CloudFormationSchemaClient {
    async fn resource_type_schema(&self, type_name: &str) -> Result<Value, RecipeError> {
        let output = self
            .client
            .describe_type()
            .r#type(RegistryType::Resource)
            .type_name(type_name)
            .send()
            .await
            .map_err(|e| RecipeError::Discovery {
                message: format!("failed to fetch schema for resource type {type_name:?}"),
                source: Some(Box::new(e)),
            })?;

        let schema = output.schema().ok_or_else(|| {
            RecipeError::validation(format!(
                "resource type {type_name:?} has no published schema"
            ))
        })?;
        serde_json::from_str(schema).map_err(|e| RecipeError::Validation {
            message: format!("failed to parse schema for resource type {type_name:?}"),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification_from_schema() {
        let schema = json!({
            "typeName": "AWS::MemoryDB::Cluster",
            "readOnlyProperties": [
                "/properties/ClusterEndpoint/Address",
                "/properties/ClusterEndpoint/Port",
                "/properties/ARN"
            ],
            "createOnlyProperties": ["/properties/ClusterName"],
            "writeOnlyProperties": ["/properties/MasterUserPassword"],
            "conditionalCreateOnlyProperties": ["/properties/NumShards"]
        });

        let classification = PropertyClassification::from_schema(&schema).unwrap();
        assert!(classification.is_immutable("ClusterEndpoint/Address"));
        assert!(classification.is_immutable("ClusterName"));
        assert!(!classification.is_immutable("NumShards"));
        assert!(classification.is_write_only("MasterUserPassword"));
        assert!(classification
            .conditional_create_only
            .contains("NumShards"));
        assert!(classification.non_public.is_empty());
    }

    #[test]
    fn test_missing_classification_lists_are_empty() {
        let classification =
            PropertyClassification::from_schema(&json!({"typeName": "AWS::Kinesis::Stream"}))
                .unwrap();
        assert_eq!(classification, PropertyClassification::default());
    }

    #[test]
    fn test_paths_outside_properties_root_are_ignored() {
        let schema = json!({
            "readOnlyProperties": [
                "/properties/ARN",
                "/definitions/Endpoint/properties/Address"
            ]
        });

        let classification = PropertyClassification::from_schema(&schema).unwrap();
        assert_eq!(classification.read_only.len(), 1);
        assert!(classification.read_only.contains("ARN"));
    }

    #[test]
    fn test_non_array_classification_fails() {
        let err = PropertyClassification::from_schema(&json!({
            "readOnlyProperties": "/properties/ARN"
        }))
        .unwrap_err();
        assert!(matches!(err, RecipeError::Validation { .. }));
    }
}
