//! # Terraform State Model
//!
//! The subset of `terraform show -json` output the engine consumes: root
//! outputs plus the resource tree. Unknown fields are ignored so the model
//! stays compatible across tool versions.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Deserialized `terraform show -json` output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct State {
    pub values: Option<StateValues>,
}

impl State {
    /// True when the state carries no values at all, which after an apply
    /// indicates the deployment produced nothing usable.
    pub fn is_empty(&self) -> bool {
        self.values.is_none()
    }

    /// Looks up a root-level output by name.
    pub fn output(&self, name: &str) -> Option<&StateOutput> {
        self.values.as_ref().and_then(|v| v.outputs.get(name))
    }

    /// The root module of the resource tree, if present.
    pub fn root_module(&self) -> Option<&StateModule> {
        self.values.as_ref().and_then(|v| v.root_module.as_ref())
    }
}

/// The `values` section of the state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateValues {
    #[serde(default)]
    pub outputs: BTreeMap<String, StateOutput>,
    #[serde(default)]
    pub root_module: Option<StateModule>,
}

/// A root-level output value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateOutput {
    pub value: Value,
    #[serde(default)]
    pub sensitive: bool,
}

/// A module node in the state's resource tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateModule {
    #[serde(default)]
    pub resources: Vec<StateResource>,
    #[serde(default)]
    pub child_modules: Vec<StateModule>,
}

/// A deployed resource instance in the state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    /// Fully qualified provider address, e.g.
    /// `registry.terraform.io/hashicorp/kubernetes`.
    pub provider_name: String,
    #[serde(default)]
    pub values: Value,
}
