//! # Engine Facade
//!
//! The inbound surface callers use: deploy a recipe, delete a recipe, check
//! whether a resource's state backend exists. The facade owns the execution
//! directory lifecycle and delegates the Terraform lifecycle to the
//! [`TerraformExecutor`] and result mapping to the reconciler.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::backends::{backend_secret_suffix, Backend};
use crate::constants::STATE_BACKEND_NAME_PREFIX;
use crate::error::RecipeError;
use crate::executor::{CancelSignal, ModuleInspection, Options, TerraformExecutor};
use crate::reconciler::prepare_recipe_response;
use crate::{Configuration, EnvironmentDefinition, RecipeOutput, ResourceMetadata, SecretData};

/// One recipe operation as submitted by the caller.
#[derive(Debug, Clone, Default)]
pub struct RecipeRequest {
    pub definition: EnvironmentDefinition,
    pub metadata: ResourceMetadata,
    pub config: Configuration,
    /// Resolved secret store contents for secret-sourced environment
    /// variables, keyed by secret store id.
    pub secrets: BTreeMap<String, SecretData>,
    /// Declarations of the module being deployed.
    pub module: ModuleInspection,
    /// Async operation id from the request context, used to name the
    /// execution directory so it can be traced back to the request.
    pub operation_id: Option<String>,
}

/// Recipe deployment engine.
pub struct Engine {
    executor: Arc<dyn TerraformExecutor>,
    backend: Arc<dyn Backend>,
    /// Root under which per-operation execution directories are created.
    root_path: PathBuf,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("root_path", &self.root_path)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(
        executor: Arc<dyn TerraformExecutor>,
        backend: Arc<dyn Backend>,
        root_path: PathBuf,
    ) -> Self {
        Self {
            executor,
            backend,
            root_path,
        }
    }

    /// Deploys a recipe and reconciles the resulting state into output
    /// resources, computed values, and secret values.
    pub async fn deploy_recipe(
        &self,
        request: &RecipeRequest,
        cancel: &CancelSignal,
    ) -> Result<RecipeOutput, RecipeError> {
        let dir = self.create_execution_directory(request).await?;
        info!(
            recipe = %request.metadata.name,
            template = %request.definition.template_path,
            dir = %dir.display(),
            "Deploying terraform recipe"
        );

        let options = self.options(request, dir.clone());
        let result = self.executor.deploy(&options, cancel).await;
        self.remove_execution_directory(&dir).await;

        let state = result?;
        prepare_recipe_response(&request.definition, &state)
    }

    /// Destroys the infrastructure a recipe deployed and removes its state
    /// backend. Succeeds without side effects when the backend never
    /// existed.
    pub async fn delete_recipe(
        &self,
        request: &RecipeRequest,
        cancel: &CancelSignal,
    ) -> Result<(), RecipeError> {
        let dir = self.create_execution_directory(request).await?;
        info!(
            recipe = %request.metadata.name,
            dir = %dir.display(),
            "Deleting terraform recipe"
        );

        let options = self.options(request, dir.clone());
        let result = self.executor.delete(&options, cancel).await;
        self.remove_execution_directory(&dir).await;
        result
    }

    /// Runs a deploy preview: generates the configuration and plans against
    /// it without changing infrastructure.
    pub async fn preview_recipe(
        &self,
        request: &RecipeRequest,
        cancel: &CancelSignal,
    ) -> Result<(), RecipeError> {
        let dir = self.create_execution_directory(request).await?;
        info!(
            recipe = %request.metadata.name,
            template = %request.definition.template_path,
            dir = %dir.display(),
            "Planning terraform recipe"
        );

        let options = self.options(request, dir.clone());
        let result = self.executor.plan(&options, cancel).await;
        self.remove_execution_directory(&dir).await;
        result
    }

    /// Whether the state backend secret for the given resource exists.
    pub async fn validate_backend_exists(
        &self,
        metadata: &ResourceMetadata,
    ) -> Result<bool, RecipeError> {
        let suffix = backend_secret_suffix(metadata)?;
        self.backend
            .validate_backend_exists(&format!("{STATE_BACKEND_NAME_PREFIX}{suffix}"))
            .await
    }

    fn options(&self, request: &RecipeRequest, root_dir: PathBuf) -> Options {
        Options {
            root_dir,
            env_recipe: request.definition.clone(),
            resource_recipe: request.metadata.clone(),
            env_config: request.config.clone(),
            secrets: request.secrets.clone(),
            module: request.module.clone(),
        }
    }

    /// Creates a unique execution directory for the operation. The name
    /// combines the operation id (or the resource id when none is supplied)
    /// with a fresh uuid so retries of the same request never collide.
    async fn create_execution_directory(
        &self,
        request: &RecipeRequest,
    ) -> Result<PathBuf, RecipeError> {
        let prefix = match &request.operation_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => normalize_dir_component(&request.metadata.resource_id),
        };
        let dir = self
            .root_path
            .join(format!("{prefix}-{}", Uuid::new_v4()));

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            RecipeError::internal(
                format!("failed to create execution directory {}", dir.display()),
                e,
            )
        })?;
        Ok(dir)
    }

    async fn remove_execution_directory(&self, dir: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "Failed to clean up execution directory");
        }
    }
}

fn normalize_dir_component(id: &str) -> String {
    id.to_lowercase()
        .replace(['/', ':'], "-")
        .trim_matches('-')
        .to_string()
}
