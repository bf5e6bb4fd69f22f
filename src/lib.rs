//! # Recipe Engine
//!
//! Deployment engine for infrastructure recipes: named, versioned bindings
//! between a resource type and the Terraform module that provisions it.
//!
//! A deploy request flows through the engine as follows:
//!
//! 1. Resolve the state backend (a Kubernetes secret keyed by a deterministic
//!    hash of environment, application, and resource identity)
//! 2. Build provider configuration blocks for the providers the module
//!    requires, from environment-level settings
//! 3. Generate the `main.tf.json` configuration document (module wiring,
//!    merged parameters, injected recipe context)
//! 4. Run the Terraform init/apply lifecycle against it
//! 5. Reconcile the resulting state back into output resources, computed
//!    values, and secret values
//!
//! Delete requests regenerate the configuration that produced the live state
//! and run destroy against it.
//!
//! The engine is synchronous and stateless per call. Serializing concurrent
//! operations against the same resource id is the caller's responsibility;
//! the engine assumes at most one in-flight operation per resource.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub mod aws;
pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod reconciler;
pub mod resources;
pub mod state;

pub use error::{ExecutionStage, RecipeError};

/// Installs ring as the process-level rustls crypto provider.
///
/// kube's rustls TLS stack and the AWS SDK enable different rustls provider
/// features, so rustls cannot select one on its own and TLS client
/// construction panics until a provider is installed. The client
/// constructors in this crate call this themselves; callers building their
/// own [`kube::Client`] before handing it over should call it first. Safe to
/// call any number of times.
pub fn install_default_crypto_provider() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider was already installed");
        }
    });
}

/// Per-environment recipe binding: where the module lives, which version is
/// pinned, and the environment-level default parameters.
///
/// Created when an operator registers or updates a recipe in an environment;
/// read on every deployment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDefinition {
    /// Recipe name, also used as the local module name in the generated
    /// configuration.
    pub name: String,
    /// Module source (registry path, filesystem path, or HTTP/git URL).
    pub template_path: String,
    /// Pinned module version. Empty for source types that do not use
    /// versions (filesystem, HTTP); required for registry sources.
    #[serde(default)]
    pub template_version: String,
    /// Environment-level default parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Per-request deployment identity, constructed fresh from the inbound API
/// payload and immutable for the lifetime of one deploy/delete operation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    /// Name of the recipe driving this deployment.
    pub name: String,
    /// Fully qualified id of the resource being deployed.
    pub resource_id: String,
    /// Fully qualified id of the environment the resource belongs to.
    pub environment_id: String,
    /// Fully qualified id of the application the resource belongs to.
    pub application_id: String,
    /// Resource-level parameter overrides. These take precedence over
    /// environment-level defaults on key conflicts.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Environment-level configuration consumed by provider builders and the
/// recipe context.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default)]
    pub runtime: RuntimeConfiguration,
    #[serde(default)]
    pub providers: Providers,
    #[serde(default)]
    pub recipe_config: RecipeConfig,
}

/// Runtime platform the environment is bound to.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesRuntime>,
}

/// Kubernetes runtime details for an environment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesRuntime {
    /// Namespace the application's resources deploy into.
    #[serde(default)]
    pub namespace: String,
    /// Namespace scoped to the environment.
    #[serde(default)]
    pub environment_namespace: String,
}

/// Cloud provider scopes configured on the environment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Providers {
    #[serde(default)]
    pub aws: AwsProviderScope,
    #[serde(default)]
    pub azure: AzureProviderScope,
}

/// AWS deployment scope, e.g.
/// `/planes/aws/aws/accounts/0000/regions/us-west-2`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AwsProviderScope {
    #[serde(default)]
    pub scope: String,
}

/// Azure deployment scope, e.g.
/// `/subscriptions/<id>/resourceGroups/<name>`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AzureProviderScope {
    #[serde(default)]
    pub scope: String,
}

/// Recipe-level configuration: extra environment variables for the Terraform
/// process, optionally sourced from secret stores.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeConfig {
    /// Plain environment variables passed to the Terraform process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Environment variables whose values come from a secret store. The map
    /// key is the variable name.
    #[serde(default)]
    pub env_secrets: BTreeMap<String, SecretReference>,
}

/// Reference to a single key inside a secret store.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Id of the secret store holding the value.
    pub source: String,
    /// Key within the secret store.
    pub key: String,
}

/// Resolved secret store contents, supplied by the caller alongside the
/// environment configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecretData {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Reference to a piece of infrastructure created by a module apply,
/// discriminated by the provider that created it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutputResource {
    Kubernetes {
        namespace: String,
        resource_type: String,
        name: String,
        /// API group of the resource; `core` for built-in types.
        provider: String,
    },
    Azure {
        id: String,
    },
    Aws {
        id: String,
    },
}

impl OutputResource {
    /// Fully qualified id of the referenced resource.
    pub fn id(&self) -> String {
        match self {
            Self::Kubernetes {
                namespace,
                resource_type,
                name,
                provider,
            } => format!(
                "/planes/kubernetes/local/namespaces/{namespace}/providers/{provider}/{resource_type}/{name}"
            ),
            Self::Azure { id } | Self::Aws { id } => id.clone(),
        }
    }
}

/// Provenance of a reconciled deployment, recorded alongside its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeStatus {
    pub template_kind: String,
    pub template_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template_version: String,
}

/// Reconciled output of a successful deployment: output resource references,
/// computed (non-secret) values, and secret values flagged for redaction.
///
/// Owned by the calling resource-provider layer once returned; the engine
/// retains nothing past the deploy call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeOutput {
    #[serde(default)]
    pub resources: Vec<OutputResource>,
    #[serde(default)]
    pub values: Map<String, Value>,
    #[serde(default)]
    pub secrets: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RecipeStatus>,
}
