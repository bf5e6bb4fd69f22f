//! # Configuration Generation
//!
//! Builds the JSON-syntax Terraform configuration document for a deployment:
//! module wiring with merged parameters, provider blocks, the state backend,
//! and the result output. The serialized `main.tf.json` is the persisted
//! contract between config generation and the execution driver and must stay
//! parseable by Terraform unmodified.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::constants::{MAIN_CONFIG_FILE_NAME, RECIPE_CONTEXT_PARAM_KEY, RESULT_PROPERTY_NAME};
use crate::context::RecipeContext;
use crate::error::RecipeError;
use crate::{Configuration, EnvironmentDefinition, ResourceMetadata};

pub mod backends;
pub mod providers;

use self::backends::Backend;
use self::providers::ProviderRegistry;

/// Read/write for the owner only; the document can embed credentials.
const MODE_CONFIG_FILE: u32 = 0o600;

const MODULE_SOURCE_KEY: &str = "source";
const MODULE_VERSION_KEY: &str = "version";

/// A provider the module declares it requires, carried into the generated
/// `terraform.required_providers` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct RequiredProviderInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The `terraform` block: state backend plus required providers.
#[derive(Debug, Clone, Serialize)]
pub struct TerraformDefinition {
    pub backend: Map<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub required_providers: BTreeMap<String, RequiredProviderInfo>,
}

/// The generated configuration document. One instance per module per
/// deployment; write-once except through the explicit `add_*` calls, all of
/// which must happen before the final [`TerraformConfig::save`].
#[derive(Debug, Clone, Serialize)]
pub struct TerraformConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    terraform: Option<TerraformDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<Map<String, Value>>,
    module: BTreeMap<String, Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<Map<String, Value>>,
}

impl TerraformConfig {
    /// Creates the configuration for the given module, merging parameters
    /// from the environment definition and the resource metadata. Resource
    /// parameters take precedence when both define the same key.
    pub fn new(
        module_name: &str,
        definition: &EnvironmentDefinition,
        resource: &ResourceMetadata,
    ) -> Self {
        let mut module = Map::new();
        module.insert(
            MODULE_SOURCE_KEY.to_string(),
            json!(definition.template_path),
        );

        // Not all sources use versions: registries require one, filesystem
        // and HTTP sources must not declare one.
        if !definition.template_version.is_empty() {
            module.insert(
                MODULE_VERSION_KEY.to_string(),
                json!(definition.template_version),
            );
        }

        for (key, value) in &definition.parameters {
            module.insert(key.clone(), value.clone());
        }
        for (key, value) in &resource.parameters {
            module.insert(key.clone(), value.clone());
        }

        let mut modules = BTreeMap::new();
        modules.insert(module_name.to_string(), module);

        Self {
            terraform: None,
            provider: None,
            module: modules,
            output: None,
        }
    }

    /// Adds the recipe context as a module parameter under the reserved
    /// `context` key. A `None` context is a no-op: some resource types do
    /// not support context injection.
    pub fn add_recipe_context(
        &mut self,
        module_name: &str,
        recipe_context: Option<&RecipeContext>,
    ) -> Result<(), RecipeError> {
        let Some(context) = recipe_context else {
            return Ok(());
        };

        let module = self.module.get_mut(module_name).ok_or_else(|| {
            RecipeError::validation(format!(
                "module {module_name:?} not found in the initialized terraform config"
            ))
        })?;

        let value = serde_json::to_value(context).map_err(|e| RecipeError::Validation {
            message: "failed to serialize recipe context".to_string(),
            source: Some(Box::new(e)),
        })?;
        module.insert(RECIPE_CONTEXT_PARAM_KEY.to_string(), value);
        Ok(())
    }

    /// Generates provider blocks for the providers the module requires.
    /// Providers without a registered builder are skipped; a failing builder
    /// aborts the whole step.
    pub async fn add_providers(
        &mut self,
        required_providers: &BTreeMap<String, RequiredProviderInfo>,
        registry: &ProviderRegistry,
        env_config: &Configuration,
    ) -> Result<(), RecipeError> {
        let mut provider_configs = Map::new();

        for name in required_providers.keys() {
            let Some(builder) = registry.get(name) else {
                // No-op by policy: the tool uses its own defaults for
                // providers the engine does not configure.
                debug!(provider = %name, "No builder registered for required provider, skipping");
                continue;
            };

            let config = builder.build_config(env_config).await.map_err(|e| {
                RecipeError::Validation {
                    message: format!("failed to build configuration for provider {name:?}"),
                    source: Some(e.into()),
                }
            })?;
            if !config.is_empty() {
                provider_configs.insert(name.clone(), Value::Object(config));
            }
        }

        if !provider_configs.is_empty() {
            self.provider = Some(provider_configs);
        }
        Ok(())
    }

    /// Resolves the state backend for this deployment and records it,
    /// together with the module's required providers, in the `terraform`
    /// block. Returns the backend config so callers can extract the state
    /// secret identity.
    pub fn add_terraform_backend(
        &mut self,
        resource: &ResourceMetadata,
        backend: &dyn Backend,
        required_providers: &BTreeMap<String, RequiredProviderInfo>,
    ) -> Result<Map<String, Value>, RecipeError> {
        let backend_config = backend.build_backend(resource)?;
        self.terraform = Some(TerraformDefinition {
            backend: backend_config.clone(),
            required_providers: required_providers.clone(),
        });
        Ok(backend_config)
    }

    /// Adds the top-level output forwarding the module's `result` output.
    /// Secret and non-secret values travel combined in the result, so the
    /// whole output is marked sensitive.
    pub fn add_outputs(&mut self, module_name: &str) -> Result<(), RecipeError> {
        if module_name.is_empty() {
            return Err(RecipeError::validation("module name cannot be empty"));
        }

        let mut outputs = Map::new();
        outputs.insert(
            RESULT_PROPERTY_NAME.to_string(),
            json!({
                "value": format!("${{module.{module_name}.{RESULT_PROPERTY_NAME}}}"),
                "sensitive": true,
            }),
        );
        self.output = Some(outputs);
        Ok(())
    }

    /// Writes the configuration to `main.tf.json` in the working directory,
    /// fully overwriting any prior file. Idempotent with respect to final
    /// file content given identical inputs.
    pub async fn save(&self, working_dir: &Path) -> Result<(), RecipeError> {
        let path = working_dir.join(MAIN_CONFIG_FILE_NAME);
        let body = serde_json::to_string_pretty(self).map_err(|e| {
            RecipeError::internal("failed to serialize terraform config", e)
        })?;

        info!(path = %path.display(), "Writing terraform JSON config");

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        options.mode(MODE_CONFIG_FILE);

        let mut file = options.open(&path).await.map_err(|e| {
            RecipeError::internal(format!("failed to create config file {}", path.display()), e)
        })?;
        file.write_all(body.as_bytes()).await.map_err(|e| {
            RecipeError::internal(format!("failed to write config file {}", path.display()), e)
        })?;
        file.flush().await.map_err(|e| {
            RecipeError::internal(format!("failed to flush config file {}", path.display()), e)
        })?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn module_params(&self, module_name: &str) -> Option<&Map<String, Value>> {
        self.module.get(module_name)
    }
}

/// Path of the generated config file inside a working directory.
pub fn main_config_file_path(working_dir: &Path) -> std::path::PathBuf {
    working_dir.join(MAIN_CONFIG_FILE_NAME)
}
