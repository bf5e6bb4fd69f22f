//! # Result Reconciler
//!
//! Maps the Terraform state produced by an apply back into the resource
//! model: output resource references, computed values, and secret values.
//!
//! Two sources feed the output. The module's `result` output carries values,
//! secrets, and resource ids the module author declared explicitly. The
//! state's resource tree is additionally walked per provider to collect the
//! resources the module deployed, whether or not the author listed them.
//! A module that declares no `result` output is fine; an unknown key inside
//! a declared result is not.

use serde_json::{Map, Value};
use tracing::debug;

use crate::constants::{
    RESULT_PROPERTY_NAME, TERRAFORM_AWS_PROVIDER, TERRAFORM_AZURE_PROVIDER,
    TERRAFORM_KUBERNETES_PROVIDER,
};
use crate::error::RecipeError;
use crate::resources::arn_to_resource_id;
use crate::state::{State, StateModule, StateResource};
use crate::{EnvironmentDefinition, OutputResource, RecipeOutput, RecipeStatus};

const TEMPLATE_KIND_TERRAFORM: &str = "terraform";

const RESULT_VALUES_KEY: &str = "values";
const RESULT_SECRETS_KEY: &str = "secrets";
const RESULT_RESOURCES_KEY: &str = "resources";

/// Builds the recipe output from the state an apply produced.
///
/// An empty state is a reconciliation error: the apply reported success but
/// left nothing to account for.
pub fn prepare_recipe_response(
    definition: &EnvironmentDefinition,
    state: &State,
) -> Result<RecipeOutput, RecipeError> {
    if state.is_empty() {
        return Err(RecipeError::reconciliation("terraform state is empty"));
    }

    let mut output = RecipeOutput::default();
    if let Some(result) = state.output(RESULT_PROPERTY_NAME) {
        apply_result_output(&mut output, &result.value)?;
    }

    output.status = Some(RecipeStatus {
        template_kind: TEMPLATE_KIND_TERRAFORM.to_string(),
        template_path: definition.template_path.clone(),
        template_version: definition.template_version.clone(),
    });

    let mut deployed = Vec::new();
    if let Some(root) = state.root_module() {
        collect_deployed_resources(root, &mut deployed)?;
    }

    // Case-insensitive dedup, module-declared ids first.
    let mut seen: Vec<String> = output
        .resources
        .iter()
        .map(|r| r.id().to_lowercase())
        .collect();
    for resource in deployed {
        let id = resource.id().to_lowercase();
        if !seen.contains(&id) {
            seen.push(id);
            output.resources.push(resource);
        }
    }

    Ok(output)
}

/// Populates values, secrets, and resources from the module's `result`
/// output. Only the three declared keys are legal.
fn apply_result_output(output: &mut RecipeOutput, result: &Value) -> Result<(), RecipeError> {
    let Some(result) = result.as_object() else {
        // A result of a non-object shape was not produced by the generated
        // output block; treat it as absent.
        return Ok(());
    };

    for (key, value) in result {
        match key.as_str() {
            RESULT_VALUES_KEY => {
                output.values = as_object(value, RESULT_VALUES_KEY)?;
            }
            RESULT_SECRETS_KEY => {
                output.secrets = as_object(value, RESULT_SECRETS_KEY)?;
            }
            RESULT_RESOURCES_KEY => {
                let ids = value.as_array().ok_or_else(|| {
                    RecipeError::reconciliation("result resources must be an array of resource ids")
                })?;
                for id in ids {
                    let id = id.as_str().ok_or_else(|| {
                        RecipeError::reconciliation("result resources must be strings")
                    })?;
                    output.resources.push(output_resource_from_id(id)?);
                }
            }
            other => {
                return Err(RecipeError::reconciliation(format!(
                    "unknown field {other:?} in result output"
                )));
            }
        }
    }
    Ok(())
}

fn as_object(value: &Value, key: &str) -> Result<Map<String, Value>, RecipeError> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| RecipeError::reconciliation(format!("result {key} must be an object")))
}

/// Classifies a module-declared resource id string into a typed output
/// resource reference.
fn output_resource_from_id(id: &str) -> Result<OutputResource, RecipeError> {
    const KUBERNETES_PLANE_PREFIX: &str = "/planes/kubernetes/local/namespaces/";

    if let Some(rest) = id.strip_prefix(KUBERNETES_PLANE_PREFIX) {
        // <namespace>/providers/<provider>/<type>/<name>
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() != 5 || !segments[1].eq_ignore_ascii_case("providers") {
            return Err(RecipeError::reconciliation(format!(
                "malformed kubernetes resource id {id:?} in result output"
            )));
        }
        return Ok(OutputResource::Kubernetes {
            namespace: segments[0].to_string(),
            provider: segments[2].to_string(),
            resource_type: segments[3].to_string(),
            name: segments[4].to_string(),
        });
    }

    if id.to_lowercase().starts_with("/planes/aws/") {
        return Ok(OutputResource::Aws { id: id.to_string() });
    }

    if !id.starts_with('/') {
        return Err(RecipeError::reconciliation(format!(
            "result resource id {id:?} is not rooted"
        )));
    }
    Ok(OutputResource::Azure { id: id.to_string() })
}

/// Walks a state module and its children, mapping deployed resources into
/// output references per provider. Resources from providers the engine does
/// not track are skipped.
fn collect_deployed_resources(
    module: &StateModule,
    out: &mut Vec<OutputResource>,
) -> Result<(), RecipeError> {
    for resource in &module.resources {
        match resource.provider_name.as_str() {
            TERRAFORM_KUBERNETES_PROVIDER => {
                out.push(kubernetes_output_resource(resource)?);
            }
            TERRAFORM_AZURE_PROVIDER => {
                if let Some(id) = resource.values.get("id").and_then(Value::as_str) {
                    // Ids that do not follow the ARM relative format belong
                    // to non-ARM resources and are not mapped.
                    if id.starts_with('/') && id.to_lowercase().contains("/providers/") {
                        out.push(OutputResource::Azure { id: id.to_string() });
                    } else {
                        debug!(id = %id, "Azure resource id is not an ARM resource, skipping");
                    }
                }
            }
            TERRAFORM_AWS_PROVIDER => {
                if let Some(arn) = resource.values.get("arn").and_then(Value::as_str) {
                    let id = arn_to_resource_id(arn).map_err(|e| RecipeError::Reconciliation {
                        message: format!("failed to map AWS resource {:?}", resource.name),
                        source: Some(Box::new(e)),
                    })?;
                    out.push(OutputResource::Aws { id });
                }
            }
            _ => {}
        }
    }

    for child in &module.child_modules {
        collect_deployed_resources(child, out)?;
    }
    Ok(())
}

/// Maps a deployed kubernetes provider resource into an output reference.
///
/// `kubernetes_manifest` resources carry their identity in the manifest
/// property; all other resource types carry it in the metadata block, with
/// the type derived from the Terraform type name
/// (`kubernetes_service_account` becomes `serviceaccount`).
fn kubernetes_output_resource(resource: &StateResource) -> Result<OutputResource, RecipeError> {
    let mut name = String::new();
    let mut namespace = String::new();
    let mut resource_type = String::new();
    let mut provider = String::new();

    if resource.resource_type == "kubernetes_manifest" {
        if let Some(manifest) = resource.values.get("manifest").and_then(Value::as_object) {
            if let Some(metadata) = manifest.get("metadata").and_then(Value::as_object) {
                if let Some(n) = metadata.get("name").and_then(Value::as_str) {
                    name = n.to_string();
                }
                if let Some(ns) = metadata.get("namespace").and_then(Value::as_str) {
                    namespace = ns.to_string();
                }
            }

            let api_version = manifest
                .get("apiVersion")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    RecipeError::reconciliation(
                        "unable to get apiVersion information from the deployed manifest",
                    )
                })?;
            // "apps/v1" carries the group; bare "v1" is the core group.
            if let Some((group, _)) = api_version.split_once('/') {
                provider = group.to_string();
            }

            if let Some(kind) = manifest.get("kind").and_then(Value::as_str) {
                resource_type = kind.to_string();
            }
        }
    } else {
        resource_type = resource
            .resource_type
            .split('_')
            .skip(1)
            .collect::<Vec<_>>()
            .concat();

        if let Some(metadata_list) = resource.values.get("metadata").and_then(Value::as_array) {
            let metadata = metadata_list
                .first()
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    RecipeError::reconciliation(format!(
                        "deployed resource {:?} has an empty metadata block",
                        resource.name
                    ))
                })?;
            if let Some(n) = metadata.get("name").and_then(Value::as_str) {
                name = n.to_string();
            }
            if let Some(ns) = metadata.get("namespace").and_then(Value::as_str) {
                namespace = ns.to_string();
            }
        }
    }

    if resource_type.is_empty() || name.is_empty() {
        return Err(RecipeError::reconciliation(format!(
            "deployed kubernetes resource {:?} is missing its type or name",
            resource.name
        )));
    }
    if provider.is_empty() {
        provider = "core".to_string();
    }

    Ok(OutputResource::Kubernetes {
        namespace,
        resource_type,
        name,
        provider,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_from(value: Value) -> State {
        serde_json::from_value(value).unwrap()
    }

    fn test_definition() -> EnvironmentDefinition {
        EnvironmentDefinition {
            name: "redis-azure".to_string(),
            template_path: "Azure/redis/azurerm".to_string(),
            template_version: "1.1.0".to_string(),
            parameters: Map::new(),
        }
    }

    #[test]
    fn test_empty_state_is_reconciliation_error() {
        let err = prepare_recipe_response(&test_definition(), &State::default()).unwrap_err();
        assert!(matches!(err, RecipeError::Reconciliation { .. }));
    }

    #[test]
    fn test_result_output_populates_values_and_secrets() {
        let state = state_from(json!({
            "values": {
                "outputs": {
                    "result": {
                        "value": {
                            "values": {"host": "testhost", "port": 6379},
                            "secrets": {"connectionString": "secret"},
                            "resources": ["/subscriptions/s/resourceGroups/g/providers/Microsoft.Cache/redis/r1"]
                        },
                        "sensitive": true
                    }
                },
                "root_module": {}
            }
        }));

        let output = prepare_recipe_response(&test_definition(), &state).unwrap();
        assert_eq!(output.values["host"], "testhost");
        assert_eq!(output.values["port"], 6379);
        assert_eq!(output.secrets["connectionString"], "secret");
        assert_eq!(output.resources.len(), 1);
        assert!(matches!(output.resources[0], OutputResource::Azure { .. }));
    }

    #[test]
    fn test_unknown_result_field_fails() {
        let state = state_from(json!({
            "values": {
                "outputs": {
                    "result": {"value": {"invalid": "invalid-field"}}
                },
                "root_module": {}
            }
        }));

        let err = prepare_recipe_response(&test_definition(), &state).unwrap_err();
        assert!(err.to_string().contains("unknown field \"invalid\""));
    }

    #[test]
    fn test_missing_result_output_is_fine() {
        let state = state_from(json!({
            "values": {"outputs": {}, "root_module": {}}
        }));

        let output = prepare_recipe_response(&test_definition(), &state).unwrap();
        assert!(output.values.is_empty());
        assert!(output.secrets.is_empty());
        assert!(output.resources.is_empty());

        let status = output.status.unwrap();
        assert_eq!(status.template_kind, "terraform");
        assert_eq!(status.template_path, "Azure/redis/azurerm");
        assert_eq!(status.template_version, "1.1.0");
    }

    #[test]
    fn test_kubernetes_resources_are_collected() {
        let state = state_from(json!({
            "values": {
                "outputs": {},
                "root_module": {
                    "child_modules": [{
                        "resources": [{
                            "type": "kubernetes_service_account",
                            "name": "sa",
                            "provider_name": "registry.terraform.io/hashicorp/kubernetes",
                            "values": {
                                "metadata": [{"name": "redis-sa", "namespace": "app-ns"}]
                            }
                        }]
                    }]
                }
            }
        }));

        let output = prepare_recipe_response(&test_definition(), &state).unwrap();
        assert_eq!(output.resources.len(), 1);
        assert_eq!(
            output.resources[0].id(),
            "/planes/kubernetes/local/namespaces/app-ns/providers/core/serviceaccount/redis-sa"
        );
    }

    #[test]
    fn test_kubernetes_manifest_identity_from_manifest() {
        let state = state_from(json!({
            "values": {
                "outputs": {},
                "root_module": {
                    "resources": [{
                        "type": "kubernetes_manifest",
                        "name": "deploy",
                        "provider_name": "registry.terraform.io/hashicorp/kubernetes",
                        "values": {
                            "manifest": {
                                "apiVersion": "apps/v1",
                                "kind": "Deployment",
                                "metadata": {"name": "redis", "namespace": "app-ns"}
                            }
                        }
                    }]
                }
            }
        }));

        let output = prepare_recipe_response(&test_definition(), &state).unwrap();
        assert_eq!(
            output.resources[0].id(),
            "/planes/kubernetes/local/namespaces/app-ns/providers/apps/Deployment/redis"
        );
    }

    #[test]
    fn test_manifest_without_api_version_fails() {
        let state = state_from(json!({
            "values": {
                "outputs": {},
                "root_module": {
                    "resources": [{
                        "type": "kubernetes_manifest",
                        "name": "deploy",
                        "provider_name": "registry.terraform.io/hashicorp/kubernetes",
                        "values": {
                            "manifest": {
                                "kind": "Deployment",
                                "metadata": {"name": "redis"}
                            }
                        }
                    }]
                }
            }
        }));

        let err = prepare_recipe_response(&test_definition(), &state).unwrap_err();
        assert!(err.to_string().contains("apiVersion"));
    }

    #[test]
    fn test_non_arm_azure_resource_is_skipped() {
        let state = state_from(json!({
            "values": {
                "outputs": {},
                "root_module": {
                    "resources": [{
                        "type": "azurerm_role_assignment",
                        "name": "ra",
                        "provider_name": "registry.terraform.io/hashicorp/azurerm",
                        "values": {"id": "not-an-arm-id"}
                    }, {
                        "type": "azurerm_redis_cache",
                        "name": "redis",
                        "provider_name": "registry.terraform.io/hashicorp/azurerm",
                        "values": {"id": "/subscriptions/s/resourceGroups/g/providers/Microsoft.Cache/redis/r1"}
                    }]
                }
            }
        }));

        let output = prepare_recipe_response(&test_definition(), &state).unwrap();
        assert_eq!(output.resources.len(), 1);
        assert_eq!(
            output.resources[0].id(),
            "/subscriptions/s/resourceGroups/g/providers/Microsoft.Cache/redis/r1"
        );
    }

    #[test]
    fn test_aws_arn_is_mapped_to_resource_id() {
        let state = state_from(json!({
            "values": {
                "outputs": {},
                "root_module": {
                    "resources": [{
                        "type": "aws_memorydb_cluster",
                        "name": "cluster",
                        "provider_name": "registry.terraform.io/hashicorp/aws",
                        "values": {"arn": "arn:aws:memorydb:us-west-2:123456789012:cluster/mycluster"}
                    }]
                }
            }
        }));

        let output = prepare_recipe_response(&test_definition(), &state).unwrap();
        assert_eq!(
            output.resources[0].id(),
            "/planes/aws/aws/accounts/123456789012/regions/us-west-2/providers/AWS.Memorydb/cluster/mycluster"
        );
    }

    #[test]
    fn test_duplicate_resources_dedup_case_insensitively() {
        let state = state_from(json!({
            "values": {
                "outputs": {
                    "result": {
                        "value": {
                            "resources": ["/subscriptions/s/resourceGroups/g/providers/Microsoft.Cache/Redis/R1"]
                        }
                    }
                },
                "root_module": {
                    "resources": [{
                        "type": "azurerm_redis_cache",
                        "name": "redis",
                        "provider_name": "registry.terraform.io/hashicorp/azurerm",
                        "values": {"id": "/subscriptions/s/resourceGroups/g/providers/Microsoft.Cache/redis/r1"}
                    }]
                }
            }
        }));

        let output = prepare_recipe_response(&test_definition(), &state).unwrap();
        assert_eq!(output.resources.len(), 1);
    }

    #[test]
    fn test_untracked_provider_is_skipped() {
        let state = state_from(json!({
            "values": {
                "outputs": {},
                "root_module": {
                    "resources": [{
                        "type": "random_password",
                        "name": "pw",
                        "provider_name": "registry.terraform.io/hashicorp/random",
                        "values": {"result": "s3cret"}
                    }]
                }
            }
        }));

        let output = prepare_recipe_response(&test_definition(), &state).unwrap();
        assert!(output.resources.is_empty());
    }
}
