//! # Execution Driver
//!
//! Runs the Terraform lifecycle against a generated configuration:
//! init, optional plan for deploy previews, apply or destroy, and state
//! inspection via `show -json`.
//!
//! Stages execute strictly sequentially and each stage's tool output is
//! streamed to the log sink line by line as it is produced. Cancellation is
//! honored at stage boundaries only; the tool offers no safe mid-apply abort,
//! so an in-flight stage always runs to completion.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::backends::Backend;
use crate::config::providers::ProviderRegistry;
use crate::config::{RequiredProviderInfo, TerraformConfig};
use crate::constants::{
    BACKEND_KIND_KUBERNETES, STATE_BACKEND_NAME_PREFIX, STATE_LOCK_TIMEOUT_SECS,
};
use crate::context::RecipeContext;
use crate::error::{ExecutionStage, RecipeError};
use crate::state::State;
use crate::{Configuration, EnvironmentDefinition, ResourceMetadata, SecretData};

const TERRAFORM_BINARY: &str = "terraform";

/// Removed from the process environment to keep the tool's log level under
/// the engine's control.
const TF_LOG_VAR: &str = "TF_LOG";

/// Caller-supplied cancellation signal, checked between stages only.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Stages already running finish normally; no new
    /// stage is started afterwards.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the downloaded module declares, as discovered by the caller's module
/// inspection: the providers it requires, and whether it accepts the recipe
/// context variable and declares the result output.
#[derive(Debug, Clone, Default)]
pub struct ModuleInspection {
    pub required_providers: BTreeMap<String, RequiredProviderInfo>,
    pub context_var_exists: bool,
    pub result_output_exists: bool,
}

/// Inputs for one deploy or delete operation.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Working directory for this operation; owned by the caller, created
    /// before and removed after the call.
    pub root_dir: PathBuf,
    /// The environment's recipe binding.
    pub env_recipe: EnvironmentDefinition,
    /// Identity of the resource being deployed.
    pub resource_recipe: ResourceMetadata,
    /// Environment-level configuration.
    pub env_config: Configuration,
    /// Resolved secret store contents, keyed by secret store id. Consulted
    /// for secret-sourced environment variables.
    pub secrets: BTreeMap<String, SecretData>,
    /// Declarations of the module being deployed.
    pub module: ModuleInspection,
}

/// Drives the Terraform lifecycle for recipe operations.
#[async_trait]
pub trait TerraformExecutor: Send + Sync {
    /// Generates the configuration and runs init and apply, returning the
    /// resulting state.
    async fn deploy(&self, options: &Options, cancel: &CancelSignal) -> Result<State, RecipeError>;

    /// Generates the configuration and runs init and destroy, then removes
    /// the state backend. A missing backend skips the destroy.
    async fn delete(&self, options: &Options, cancel: &CancelSignal) -> Result<(), RecipeError>;

    /// Generates the configuration and runs init and plan, for deploy
    /// previews. Does not change infrastructure.
    async fn plan(&self, options: &Options, cancel: &CancelSignal) -> Result<(), RecipeError>;
}

/// The process-spawning executor: runs the `terraform` binary found on PATH
/// against the configuration generated into the operation's working
/// directory.
pub struct Executor {
    providers: ProviderRegistry,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Executor {
    pub fn new(providers: ProviderRegistry, backend: Arc<dyn Backend>) -> Self {
        Self { providers, backend }
    }

    /// Generates and saves `main.tf.json` for the operation, returning the
    /// state secret suffix the backend resolved.
    async fn generate_config(&self, options: &Options) -> Result<String, RecipeError> {
        let module_name = options.env_recipe.name.as_str();
        if module_name.is_empty() {
            return Err(RecipeError::validation("recipe name cannot be empty"));
        }

        let mut config =
            TerraformConfig::new(module_name, &options.env_recipe, &options.resource_recipe);

        info!(
            providers = ?options.module.required_providers.keys().collect::<Vec<_>>(),
            "Adding provider config for required providers"
        );
        config
            .add_providers(
                &options.module.required_providers,
                &self.providers,
                &options.env_config,
            )
            .await?;

        let backend_config = config.add_terraform_backend(
            &options.resource_recipe,
            self.backend.as_ref(),
            &options.module.required_providers,
        )?;
        let secret_suffix = backend_config
            .get(BACKEND_KIND_KUBERNETES)
            .and_then(|details| details.get("secret_suffix"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // Only injected when the module declares the context variable;
        // passing an undeclared variable fails the apply.
        if options.module.context_var_exists {
            let context = RecipeContext::new(&options.resource_recipe, &options.env_config)?;
            config.add_recipe_context(module_name, Some(&context))?;
        }
        if options.module.result_output_exists {
            config.add_outputs(module_name)?;
        }

        config.save(&options.root_dir).await?;
        Ok(secret_suffix)
    }

    fn backend_name(suffix: &str) -> String {
        format!("{STATE_BACKEND_NAME_PREFIX}{suffix}")
    }
}

#[async_trait]
impl TerraformExecutor for Executor {
    async fn deploy(&self, options: &Options, cancel: &CancelSignal) -> Result<State, RecipeError> {
        let binary = find_terraform()?;
        let env = build_process_env(options)?;
        let suffix = self.generate_config(options).await?;

        check_cancelled(cancel, ExecutionStage::Init)?;
        run_stage(
            &binary,
            &options.root_dir,
            ExecutionStage::Init,
            &["init", "-no-color", "-input=false"],
            &env,
        )
        .await?;

        check_cancelled(cancel, ExecutionStage::Apply)?;
        let lock_timeout = format!("-lock-timeout={STATE_LOCK_TIMEOUT_SECS}s");
        run_stage(
            &binary,
            &options.root_dir,
            ExecutionStage::Apply,
            &[
                "apply",
                "-no-color",
                "-input=false",
                "-auto-approve",
                lock_timeout.as_str(),
            ],
            &env,
        )
        .await?;

        let state = show_state(&binary, &options.root_dir, &env).await?;

        // The backend secret is created by Terraform during apply; a missing
        // secret means the state of the deployed resources is unaccounted
        // for.
        let backend_name = Self::backend_name(&suffix);
        if !self.backend.validate_backend_exists(&backend_name).await? {
            return Err(RecipeError::reconciliation(format!(
                "expected state backend secret {backend_name:?} was not created by apply"
            )));
        }

        Ok(state)
    }

    async fn delete(&self, options: &Options, cancel: &CancelSignal) -> Result<(), RecipeError> {
        let binary = find_terraform()?;
        let env = build_process_env(options)?;
        let suffix = self.generate_config(options).await?;

        let backend_name = Self::backend_name(&suffix);
        match self.backend.validate_backend_exists(&backend_name).await {
            // Nothing was deployed, or the state was already cleaned up.
            // Destroy cannot run without state and there is nothing to
            // delete.
            Ok(false) => {
                info!(
                    backend = %backend_name,
                    "Skipping destroy, state backend does not exist"
                );
                return Ok(());
            }
            Ok(true) => {}
            // An intermittent lookup failure falls through to the destroy;
            // if it persists the destroy fails and the caller retries.
            Err(e) => {
                warn!(error = %e, backend = %backend_name, "Error checking state backend, continuing with destroy");
            }
        }

        check_cancelled(cancel, ExecutionStage::Init)?;
        run_stage(
            &binary,
            &options.root_dir,
            ExecutionStage::Init,
            &["init", "-no-color", "-input=false"],
            &env,
        )
        .await?;

        check_cancelled(cancel, ExecutionStage::Destroy)?;
        run_stage(
            &binary,
            &options.root_dir,
            ExecutionStage::Destroy,
            &["destroy", "-no-color", "-input=false", "-auto-approve"],
            &env,
        )
        .await?;

        self.backend.delete_backend(&backend_name).await
    }

    async fn plan(&self, options: &Options, cancel: &CancelSignal) -> Result<(), RecipeError> {
        let binary = find_terraform()?;
        let env = build_process_env(options)?;
        self.generate_config(options).await?;

        check_cancelled(cancel, ExecutionStage::Init)?;
        run_stage(
            &binary,
            &options.root_dir,
            ExecutionStage::Init,
            &["init", "-no-color", "-input=false"],
            &env,
        )
        .await?;

        check_cancelled(cancel, ExecutionStage::Plan)?;
        run_stage(
            &binary,
            &options.root_dir,
            ExecutionStage::Plan,
            &["plan", "-no-color", "-input=false"],
            &env,
        )
        .await
    }
}

/// Builds the environment for the Terraform process: the current process
/// environment, overlaid with the recipe configuration's plain variables and
/// its secret-sourced variables resolved from the caller-supplied secret
/// data. A dangling secret reference is a validation error.
pub fn build_process_env(options: &Options) -> Result<BTreeMap<String, String>, RecipeError> {
    let mut env: BTreeMap<String, String> = std::env::vars().collect();
    env.remove(TF_LOG_VAR);

    let recipe_config = &options.env_config.recipe_config;
    if !recipe_config.env.is_empty() {
        debug!(count = recipe_config.env.len(), "Setting environment variables from recipe config");
        for (key, value) in &recipe_config.env {
            env.insert(key.clone(), value.clone());
        }
    }

    for (name, reference) in &recipe_config.env_secrets {
        let data = options.secrets.get(&reference.source).ok_or_else(|| {
            RecipeError::validation(format!(
                "missing secret source {:?} for environment variable {name:?}",
                reference.source
            ))
        })?;
        let value = data.data.get(&reference.key).ok_or_else(|| {
            RecipeError::validation(format!(
                "missing secret key {:?} in secret store {:?}",
                reference.key, reference.source
            ))
        })?;
        env.insert(name.clone(), value.clone());
    }

    Ok(env)
}

fn find_terraform() -> Result<PathBuf, RecipeError> {
    which::which(TERRAFORM_BINARY)
        .map_err(|e| RecipeError::discovery("terraform binary not found on PATH", e))
}

fn check_cancelled(cancel: &CancelSignal, stage: ExecutionStage) -> Result<(), RecipeError> {
    if cancel.is_cancelled() {
        info!(stage = %stage, "Operation cancelled at stage boundary");
        return Err(RecipeError::Cancelled { stage });
    }
    Ok(())
}

/// Runs one lifecycle stage, streaming stdout to the debug log and stderr to
/// the warn log as lines arrive. On failure the collected stderr is the
/// diagnostic, passed through verbatim.
async fn run_stage(
    binary: &Path,
    working_dir: &Path,
    stage: ExecutionStage,
    args: &[&str],
    env: &BTreeMap<String, String>,
) -> Result<(), RecipeError> {
    info!(stage = %stage, dir = %working_dir.display(), "Running terraform");

    let mut child = Command::new(binary)
        .args(args)
        .current_dir(working_dir)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RecipeError::Execution {
            stage,
            diagnostic: format!("failed to spawn terraform: {e}"),
        })?;

    let stdout = child.stdout.take();
    let stdout_task = tokio::spawn(async move {
        if let Some(out) = stdout {
            let mut lines = BufReader::new(out).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(stage = %stage, "{line}");
            }
        }
    });

    let mut diagnostic = String::new();
    if let Some(err_stream) = child.stderr.take() {
        let mut lines = BufReader::new(err_stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            warn!(stage = %stage, "{line}");
            diagnostic.push_str(&line);
            diagnostic.push('\n');
        }
    }

    let status = child.wait().await.map_err(|e| RecipeError::Execution {
        stage,
        diagnostic: format!("failed to wait for terraform: {e}"),
    })?;
    let _ = stdout_task.await;

    if status.success() {
        Ok(())
    } else {
        let diagnostic = if diagnostic.trim().is_empty() {
            format!("terraform exited with {status}")
        } else {
            diagnostic.trim_end().to_string()
        };
        Err(RecipeError::Execution { stage, diagnostic })
    }
}

/// Captures `terraform show -json` output and parses it into the state
/// model.
async fn show_state(
    binary: &Path,
    working_dir: &Path,
    env: &BTreeMap<String, String>,
) -> Result<State, RecipeError> {
    let output = Command::new(binary)
        .args(["show", "-json", "-no-color"])
        .current_dir(working_dir)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| RecipeError::Execution {
            stage: ExecutionStage::Apply,
            diagnostic: format!("failed to run terraform show: {e}"),
        })?;

    if !output.status.success() {
        return Err(RecipeError::Execution {
            stage: ExecutionStage::Apply,
            diagnostic: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|e| RecipeError::Reconciliation {
        message: "failed to parse terraform state".to_string(),
        source: Some(Box::new(e)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecipeConfig, SecretReference};

    fn options_with_recipe_config(recipe_config: RecipeConfig) -> Options {
        Options {
            env_config: Configuration {
                recipe_config,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_env_overlays_recipe_config() {
        let mut recipe_config = RecipeConfig::default();
        recipe_config
            .env
            .insert("TF_VAR_replicas".to_string(), "3".to_string());

        let env = build_process_env(&options_with_recipe_config(recipe_config)).unwrap();
        assert_eq!(env.get("TF_VAR_replicas").map(String::as_str), Some("3"));
        assert!(!env.contains_key(TF_LOG_VAR));
    }

    #[test]
    fn test_env_resolves_secret_references() {
        let mut recipe_config = RecipeConfig::default();
        recipe_config.env_secrets.insert(
            "TF_VAR_password".to_string(),
            SecretReference {
                source: "store-1".to_string(),
                key: "password".to_string(),
            },
        );

        let mut options = options_with_recipe_config(recipe_config);
        let mut data = BTreeMap::new();
        data.insert("password".to_string(), "hunter2".to_string());
        options
            .secrets
            .insert("store-1".to_string(), SecretData { data });

        let env = build_process_env(&options).unwrap();
        assert_eq!(env.get("TF_VAR_password").map(String::as_str), Some("hunter2"));
    }

    #[test]
    fn test_env_missing_secret_source_fails() {
        let mut recipe_config = RecipeConfig::default();
        recipe_config.env_secrets.insert(
            "TF_VAR_password".to_string(),
            SecretReference {
                source: "absent".to_string(),
                key: "password".to_string(),
            },
        );

        let err = build_process_env(&options_with_recipe_config(recipe_config)).unwrap_err();
        assert!(matches!(err, RecipeError::Validation { .. }));
        assert!(err.to_string().contains("missing secret source"));
    }

    #[test]
    fn test_env_missing_secret_key_fails() {
        let mut recipe_config = RecipeConfig::default();
        recipe_config.env_secrets.insert(
            "TF_VAR_password".to_string(),
            SecretReference {
                source: "store-1".to_string(),
                key: "absent".to_string(),
            },
        );

        let mut options = options_with_recipe_config(recipe_config);
        options
            .secrets
            .insert("store-1".to_string(), SecretData::default());

        let err = build_process_env(&options).unwrap_err();
        assert!(err.to_string().contains("missing secret key"));
    }

    #[cfg(unix)]
    fn stub_binary(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-terraform");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_stage_succeeds_on_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_binary(dir.path(), "#!/bin/sh\necho 'Apply complete!'\nexit 0\n");

        run_stage(
            &binary,
            dir.path(),
            ExecutionStage::Apply,
            &["apply"],
            &BTreeMap::new(),
        )
        .await
        .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_stage_preserves_stderr_diagnostic_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_binary(
            dir.path(),
            "#!/bin/sh\n\
             echo 'Error: Failed to get existing workspaces' >&2\n\
             echo 'querying the backend secret returned 403' >&2\n\
             exit 1\n",
        );

        let err = run_stage(
            &binary,
            dir.path(),
            ExecutionStage::Init,
            &["init"],
            &BTreeMap::new(),
        )
        .await
        .unwrap_err();
        match err {
            RecipeError::Execution { stage, diagnostic } => {
                assert_eq!(stage, ExecutionStage::Init);
                assert_eq!(
                    diagnostic,
                    "Error: Failed to get existing workspaces\nquerying the backend secret returned 403"
                );
            }
            other => panic!("expected an execution error, got {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_stage_reports_exit_status_when_stderr_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let binary = stub_binary(dir.path(), "#!/bin/sh\nexit 3\n");

        let err = run_stage(
            &binary,
            dir.path(),
            ExecutionStage::Destroy,
            &["destroy"],
            &BTreeMap::new(),
        )
        .await
        .unwrap_err();
        match err {
            RecipeError::Execution { stage, diagnostic } => {
                assert_eq!(stage, ExecutionStage::Destroy);
                assert!(diagnostic.contains("exit"));
            }
            other => panic!("expected an execution error, got {other}"),
        }
    }

    #[test]
    fn test_cancel_signal_blocks_next_stage() {
        let cancel = CancelSignal::new();
        assert!(check_cancelled(&cancel, ExecutionStage::Init).is_ok());

        cancel.cancel();
        let err = check_cancelled(&cancel, ExecutionStage::Apply).unwrap_err();
        assert!(matches!(
            err,
            RecipeError::Cancelled {
                stage: ExecutionStage::Apply
            }
        ));
    }
}
