//! Bidirectional transform between nested property trees and flat
//! path-keyed maps.
//!
//! Flattening produces one entry per leaf value, keyed by the `/`-joined
//! path of intermediate object keys; unflattening is the exact inverse.
//! Arrays are unsupported anywhere in the tree: per-property access rules
//! cannot be applied to array elements, so the whole pipeline refuses such
//! inputs rather than silently truncating them.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::RecipeError;

const PATH_SEPARATOR: char = '/';

/// Flattens a nested property object into a path-keyed map.
///
/// `{"ClusterEndpoint": {"Port": 3000}}` becomes
/// `{"ClusterEndpoint/Port": 3000}`. An array anywhere in the tree is a
/// validation error.
pub fn flatten_properties(
    properties: &Map<String, Value>,
) -> Result<BTreeMap<String, Value>, RecipeError> {
    let mut flat = BTreeMap::new();
    for (key, value) in properties {
        flatten_into(key.clone(), value, &mut flat)?;
    }
    Ok(flat)
}

fn flatten_into(
    path: String,
    value: &Value,
    flat: &mut BTreeMap<String, Value>,
) -> Result<(), RecipeError> {
    match value {
        Value::Array(_) => Err(RecipeError::validation(format!(
            "array-valued property at {path:?} is not supported"
        ))),
        Value::Object(nested) => {
            for (key, value) in nested {
                flatten_into(format!("{path}{PATH_SEPARATOR}{key}"), value, flat)?;
            }
            Ok(())
        }
        scalar => {
            flat.insert(path, scalar.clone());
            Ok(())
        }
    }
}

/// Rebuilds a nested property object from a path-keyed map. Inverse of
/// [`flatten_properties`] for inputs without arrays.
///
/// Conflicting paths (a scalar at `a` and a nested value at `a/b`) are a
/// validation error; flatten never produces them.
pub fn unflatten_properties(
    flat: &BTreeMap<String, Value>,
) -> Result<Map<String, Value>, RecipeError> {
    let mut root = Map::new();
    for (path, value) in flat {
        let mut segments = path.split(PATH_SEPARATOR).peekable();
        let mut current = &mut root;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                if current.contains_key(segment) {
                    return Err(RecipeError::validation(format!(
                        "conflicting property path {path:?}"
                    )));
                }
                current.insert(segment.to_string(), value.clone());
                break;
            }

            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = entry.as_object_mut().ok_or_else(|| {
                RecipeError::validation(format!("conflicting property path {path:?}"))
            })?;
        }
    }
    Ok(root)
}
