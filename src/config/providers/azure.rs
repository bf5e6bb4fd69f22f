//! Azure provider config builder.
//!
//! Derives the subscription from the environment's Azure scope. The provider
//! requires a `features` block even when empty, so one is always emitted.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::Configuration;

use super::Provider;

/// Builds the `azurerm` provider block from the environment's Azure scope,
/// e.g. `/subscriptions/<id>/resourceGroups/<name>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureProvider;

#[async_trait]
impl Provider for AzureProvider {
    async fn build_config(&self, env_config: &Configuration) -> Result<Map<String, Value>> {
        let mut config = Map::new();
        config.insert("features".to_string(), json!({}));

        let scope = env_config.providers.azure.scope.as_str();
        if !scope.is_empty() {
            let subscription = parse_subscription(scope)?;
            config.insert("subscription_id".to_string(), json!(subscription));
        }

        Ok(config)
    }
}

fn parse_subscription(scope: &str) -> Result<String> {
    let segments: Vec<&str> = scope
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let index = segments
        .iter()
        .position(|s| s.eq_ignore_ascii_case("subscriptions"));
    match index {
        Some(i) if i + 1 < segments.len() => Ok(segments[i + 1].to_string()),
        _ => bail!("invalid Azure provider scope {scope:?}: no subscription segment"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AzureProviderScope, Providers};

    fn config_with_scope(scope: &str) -> Configuration {
        Configuration {
            providers: Providers {
                azure: AzureProviderScope {
                    scope: scope.to_string(),
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_subscription_from_scope() {
        let config = AzureProvider
            .build_config(&config_with_scope(
                "/subscriptions/test-sub/resourceGroups/test-rg",
            ))
            .await
            .unwrap();
        assert_eq!(config["subscription_id"], "test-sub");
        assert_eq!(config["features"], json!({}));
    }

    #[tokio::test]
    async fn test_empty_scope_still_has_features_block() {
        let config = AzureProvider
            .build_config(&config_with_scope(""))
            .await
            .unwrap();
        assert_eq!(config.len(), 1);
        assert_eq!(config["features"], json!({}));
    }

    #[tokio::test]
    async fn test_invalid_scope_fails() {
        let err = AzureProvider
            .build_config(&config_with_scope("/resourceGroups/only"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid Azure provider scope"));
    }
}
