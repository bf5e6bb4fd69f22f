//! AWS provider config builder.
//!
//! Derives the provider's region from the environment's AWS scope. Credential
//! acquisition is left to the provider's own default chain (instance profile,
//! IRSA, shared config); the engine only pins the deployment region.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::Configuration;

use super::Provider;

/// Builds the `aws` provider block from the environment's AWS scope, e.g.
/// `/planes/aws/aws/accounts/0000/regions/us-west-2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsProvider;

#[async_trait]
impl Provider for AwsProvider {
    async fn build_config(&self, env_config: &Configuration) -> Result<Map<String, Value>> {
        let scope = env_config.providers.aws.scope.as_str();
        if scope.is_empty() {
            debug!("No AWS scope configured, emitting no aws provider config");
            return Ok(Map::new());
        }

        let region = parse_region(scope)?;
        let mut config = Map::new();
        config.insert("region".to_string(), json!(region));
        Ok(config)
    }
}

fn parse_region(scope: &str) -> Result<String> {
    let segments: Vec<&str> = scope
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let region_index = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("regions"));
    match region_index {
        Some(i) if i + 1 < segments.len() => Ok(segments[i + 1].to_string()),
        _ => bail!("invalid AWS provider scope {scope:?}: no region segment"),
    }
}
