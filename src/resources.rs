//! # Resource Identifiers
//!
//! Parsing of fully qualified resource ids.
//!
//! Two grammars are accepted:
//!
//! - Plane-scoped ids:
//!   `/planes/<type>/<name>/resourceGroups/<rg>/providers/<Namespace>/<type>/<name>`
//! - ARM-style ids:
//!   `/subscriptions/<id>/resourceGroups/<rg>/providers/<Namespace>/<type>/<name>`
//!
//! The engine only needs identity facts from an id: its name, its qualified
//! type, and the raw string. AWS ARNs are translated into plane-scoped ids
//! when mapping deployed resources back into the resource model.

use crate::error::RecipeError;

/// A parsed, validated resource id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    raw: String,
    provider_namespace: String,
    type_segments: Vec<String>,
    name: String,
}

impl ResourceId {
    /// Parses a fully qualified resource id.
    ///
    /// Fails with a validation error when the id is not rooted, has no
    /// `providers` segment, or its type/name segments are unbalanced.
    pub fn parse(id: &str) -> Result<Self, RecipeError> {
        if !id.starts_with('/') {
            return Err(RecipeError::validation(format!(
                "resource id {id:?} is not rooted"
            )));
        }

        let segments: Vec<&str> = id
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let providers_index = segments
            .iter()
            .position(|s| s.eq_ignore_ascii_case("providers"))
            .ok_or_else(|| {
                RecipeError::validation(format!(
                    "resource id {id:?} has no providers segment"
                ))
            })?;

        let type_and_name = &segments[providers_index + 1..];
        // A namespace followed by at least one type/name pair, pairs balanced.
        if type_and_name.len() < 3 || type_and_name.len() % 2 == 0 {
            return Err(RecipeError::validation(format!(
                "resource id {id:?} has malformed type and name segments"
            )));
        }

        let provider_namespace = type_and_name[0].to_string();
        let mut type_segments = Vec::new();
        for pair in type_and_name[1..].chunks(2) {
            type_segments.push(pair[0].to_string());
        }
        let name = type_and_name[type_and_name.len() - 1].to_string();

        Ok(Self {
            raw: id.to_string(),
            provider_namespace,
            type_segments,
            name,
        })
    }

    /// The resource's own name (the last id segment).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Qualified type in `namespace/type` form, lowercased, e.g.
    /// `applications.datastores/rediscaches`.
    pub fn qualified_type(&self) -> String {
        format!(
            "{}/{}",
            self.provider_namespace.to_lowercase(),
            self.type_segments.join("/").to_lowercase()
        )
    }

    /// The raw id as supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Translates an AWS ARN into a plane-scoped resource id:
/// `/planes/aws/aws/accounts/<account>/regions/<region>/providers/AWS.<Service>/<type>/<name>`.
pub fn arn_to_resource_id(arn: &str) -> Result<String, RecipeError> {
    // arn:partition:service:region:account-id:resource-type/resource-id
    // arn:partition:service:region:account-id:resource-type:resource-id
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" {
        return Err(RecipeError::validation(format!(
            "{arn:?} is not a valid ARN"
        )));
    }

    let service = parts[2];
    let region = parts[3];
    let account = parts[4];
    let resource = parts[5];
    if service.is_empty() || resource.is_empty() {
        return Err(RecipeError::validation(format!(
            "{arn:?} is missing a service or resource part"
        )));
    }

    let (resource_type, resource_name) = match resource.split_once(['/', ':']) {
        Some((t, n)) => (t, n),
        // Some services (e.g. S3 buckets) put the bare name in the resource part.
        None => (service, resource),
    };

    let mut service_titled = service.to_string();
    if let Some(first) = service_titled.get_mut(0..1) {
        first.make_ascii_uppercase();
    }

    Ok(format!(
        "/planes/aws/aws/accounts/{account}/regions/{region}/providers/AWS.{service_titled}/{resource_type}/{resource_name}"
    ))
}
