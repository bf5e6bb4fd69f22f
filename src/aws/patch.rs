//! Update-patch generation against property access classifications.
//!
//! The generated patch is the property-level difference between live and
//! desired state, adjusted so immutable properties are never touched and
//! write-only properties never appear. Conditional-create-only properties
//! pass through untouched; if that produces an illegal update the cloud API
//! rejects it and that rejection reaches the caller verbatim.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::RecipeError;

use super::flatten::flatten_properties;
use super::schema::PropertyClassification;

/// A single patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// One entry of the patch document, addressing a property by its
/// `/`-separated path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Generates the update patch for a resource.
///
/// `current` is the live state as returned by the cloud API; `desired` is the
/// user-specified state. Both are flattened first, so array-valued properties
/// anywhere fail with a validation error.
///
/// Immutable properties (read-only and create-only) absent from the desired
/// state are copied from the current state before diffing so the patch never
/// attempts to change them. Write-only properties can never be diffed since
/// the live API does not return them; a desired change to one is silently
/// dropped from the patch.
pub fn generate_update_patch(
    current: &Map<String, Value>,
    desired: &Map<String, Value>,
    classification: &PropertyClassification,
) -> Result<Vec<PatchOperation>, RecipeError> {
    let current = flatten_properties(current)?;
    let mut desired = flatten_properties(desired)?;

    for (path, value) in &current {
        if classification.is_immutable(path) && !desired.contains_key(path) {
            desired.insert(path.clone(), value.clone());
        }
    }

    desired.retain(|path, _| {
        let keep = !classification.is_write_only(path);
        if !keep {
            debug!(path = %path, "Dropping write-only property from update patch");
        }
        keep
    });

    let mut patch = Vec::new();
    for (path, value) in &desired {
        match current.get(path) {
            None => patch.push(PatchOperation {
                op: PatchOp::Add,
                path: pointer(path),
                value: Some(value.clone()),
            }),
            Some(live) if live != value => patch.push(PatchOperation {
                op: PatchOp::Replace,
                path: pointer(path),
                value: Some(value.clone()),
            }),
            Some(_) => {}
        }
    }
    for path in current.keys() {
        if !desired.contains_key(path) && !classification.is_write_only(path) {
            patch.push(PatchOperation {
                op: PatchOp::Remove,
                path: pointer(path),
                value: None,
            });
        }
    }

    Ok(patch)
}

fn pointer(path: &str) -> String {
    format!("/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn read_only(paths: &[&str]) -> PropertyClassification {
        PropertyClassification {
            read_only: paths.iter().map(|p| (*p).to_string()).collect::<BTreeSet<_>>(),
            ..Default::default()
        }
    }

    #[test]
    fn test_read_only_properties_produce_empty_patch() {
        let current = object(json!({"ClusterEndpoint": {"Address": "x"}}));
        let desired = Map::new();
        let classification = read_only(&["ClusterEndpoint/Address"]);

        let patch = generate_update_patch(&current, &desired, &classification).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_mutable_property_change_is_replace() {
        let current = object(json!({"ShardCount": 3, "RetentionPeriodHours": 178}));
        let desired = object(json!({"ShardCount": 5, "RetentionPeriodHours": 178}));

        let patch =
            generate_update_patch(&current, &desired, &PropertyClassification::default()).unwrap();
        assert_eq!(
            patch,
            vec![PatchOperation {
                op: PatchOp::Replace,
                path: "/ShardCount".to_string(),
                value: Some(json!(5)),
            }]
        );
    }

    #[test]
    fn test_new_property_is_add_and_absent_is_remove() {
        let current = object(json!({"RetentionPeriodHours": 178}));
        let desired = object(json!({"ShardCount": 3}));

        let patch =
            generate_update_patch(&current, &desired, &PropertyClassification::default()).unwrap();
        assert!(patch.contains(&PatchOperation {
            op: PatchOp::Add,
            path: "/ShardCount".to_string(),
            value: Some(json!(3)),
        }));
        assert!(patch.contains(&PatchOperation {
            op: PatchOp::Remove,
            path: "/RetentionPeriodHours".to_string(),
            value: None,
        }));
        assert_eq!(patch.len(), 2);
    }

    #[test]
    fn test_create_only_absent_from_desired_is_preserved() {
        let current = object(json!({"ClusterName": "prod", "ShardCount": 3}));
        let desired = object(json!({"ShardCount": 3}));
        let classification = PropertyClassification {
            create_only: ["ClusterName".to_string()].into_iter().collect(),
            ..Default::default()
        };

        let patch = generate_update_patch(&current, &desired, &classification).unwrap();
        assert!(patch.is_empty());
    }

    // The live API never returns write-only values, so a post-creation
    // change to one cannot be diffed and never reaches the patch.
    #[test]
    fn test_write_only_change_is_silently_dropped() {
        let current = object(json!({"ShardCount": 3}));
        let desired = object(json!({"ShardCount": 3, "MasterUserPassword": "new"}));
        let classification = PropertyClassification {
            write_only: ["MasterUserPassword".to_string()].into_iter().collect(),
            ..Default::default()
        };

        let patch = generate_update_patch(&current, &desired, &classification).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_conditional_create_only_passes_through() {
        let current = object(json!({"NumShards": 1}));
        let desired = object(json!({"NumShards": 2}));
        let classification = PropertyClassification {
            conditional_create_only: ["NumShards".to_string()].into_iter().collect(),
            ..Default::default()
        };

        let patch = generate_update_patch(&current, &desired, &classification).unwrap();
        assert_eq!(
            patch,
            vec![PatchOperation {
                op: PatchOp::Replace,
                path: "/NumShards".to_string(),
                value: Some(json!(2)),
            }]
        );
    }

    #[test]
    fn test_arrays_fail_patch_generation() {
        let current = object(json!({"SubnetIds": ["a"]}));
        let err =
            generate_update_patch(&current, &Map::new(), &PropertyClassification::default())
                .unwrap_err();
        assert!(matches!(err, RecipeError::Validation { .. }));
    }

    #[test]
    fn test_patch_serializes_as_patch_document() {
        let patch = vec![PatchOperation {
            op: PatchOp::Replace,
            path: "/ShardCount".to_string(),
            value: Some(json!(5)),
        }];
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([{"op": "replace", "path": "/ShardCount", "value": 5}])
        );
    }
}
