//! # Constants
//!
//! Shared constants used throughout the recipe engine.

/// Name of the generated Terraform configuration document. JSON configuration
/// syntax requires the `.tf.json` suffix.
pub const MAIN_CONFIG_FILE_NAME: &str = "main.tf.json";

/// Reserved module parameter key under which the recipe context object is
/// injected.
pub const RECIPE_CONTEXT_PARAM_KEY: &str = "context";

/// Name of the module output that carries recipe results (values, secrets,
/// deployed resource ids).
pub const RESULT_PROPERTY_NAME: &str = "result";

/// Namespace holding the Kubernetes secrets that back Terraform state.
pub const STATE_STORE_NAMESPACE: &str = "radius-system";

/// Prefix of the Kubernetes secret created by the Terraform kubernetes
/// backend. The full secret name is this prefix followed by the computed
/// secret suffix.
pub const STATE_BACKEND_NAME_PREFIX: &str = "tfstate-default-";

/// Key of the kubernetes backend block in the generated configuration.
pub const BACKEND_KIND_KUBERNETES: &str = "kubernetes";

/// Terraform provider registry address for the Kubernetes provider.
pub const TERRAFORM_KUBERNETES_PROVIDER: &str = "registry.terraform.io/hashicorp/kubernetes";

/// Terraform provider registry address for the Azure provider.
pub const TERRAFORM_AZURE_PROVIDER: &str = "registry.terraform.io/hashicorp/azurerm";

/// Terraform provider registry address for the AWS provider.
pub const TERRAFORM_AWS_PROVIDER: &str = "registry.terraform.io/hashicorp/aws";

/// How long Terraform waits for a state lock before failing apply.
pub const STATE_LOCK_TIMEOUT_SECS: u64 = 60;

/// Prefix stripped from property paths in resource type schemas
/// (e.g. `/properties/ClusterEndpoint/Address`).
pub const SCHEMA_PROPERTIES_PREFIX: &str = "/properties/";
