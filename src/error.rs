//! # Error Taxonomy
//!
//! Typed errors produced by the recipe engine.
//!
//! Callers translate these kinds into protocol-level status codes; the
//! engine's responsibility ends at producing a well-typed, contextualized
//! error value. Five kinds are distinguished:
//!
//! - `Validation`: malformed input detected before any external call
//! - `Discovery`: credential or cluster-context discovery failure
//! - `Execution`: a failure reported by the Terraform process, with the
//!   tool's native diagnostic preserved verbatim
//! - `Reconciliation`: the infrastructure change succeeded but its outputs
//!   could not be mapped back into the resource model
//! - `Internal`: a filesystem or serialization fault inside the engine
//!   itself, unrelated to the caller's input
//!
//! Expected absences (backend secret not found, module output not declared)
//! are successful results, never errors.

use std::fmt;

use thiserror::Error;

/// Boxed error source preserved across layer boundaries so the original
/// cause stays inspectable through `std::error::Error::source`.
pub type ErrorSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stage of the Terraform execution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStage {
    Init,
    Plan,
    Apply,
    Destroy,
}

impl fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        f.write_str(stage)
    }
}

/// Error produced by recipe deployment, deletion, or backend validation.
#[derive(Debug, Error)]
pub enum RecipeError {
    /// Malformed resource/environment/application ids, invalid schema types,
    /// unsupported property shapes. Detected before any external call, no
    /// side effects.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    /// Credential or cluster-context discovery failed. The expected
    /// "not running in cluster" signal is not an error and never produces
    /// this variant.
    #[error("discovery error: {message}")]
    Discovery {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    /// The Terraform process reported a failure. The diagnostic is the
    /// tool's own output, passed through without reinterpretation.
    #[error("terraform {stage} failure: {diagnostic}")]
    Execution {
        stage: ExecutionStage,
        diagnostic: String,
    },

    /// Terraform succeeded but the engine could not map the results back
    /// into output resources, computed values, and secrets.
    #[error("reconciliation error: {message}")]
    Reconciliation {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    /// The caller cancelled the operation at a stage boundary. In-flight
    /// stages always run to completion; this is only returned for work that
    /// was never started.
    #[error("operation cancelled before terraform {stage}")]
    Cancelled { stage: ExecutionStage },

    /// A filesystem or serialization fault inside the engine itself, with
    /// valid input. Distinct from `Validation` so callers do not surface an
    /// infrastructure fault as a client error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },
}

impl RecipeError {
    /// A validation error with no underlying cause.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            source: None,
        }
    }

    /// A discovery error wrapping its underlying cause.
    pub fn discovery(message: impl Into<String>, source: impl Into<ErrorSource>) -> Self {
        Self::Discovery {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// A reconciliation error with no underlying cause.
    pub fn reconciliation(message: impl Into<String>) -> Self {
        Self::Reconciliation {
            message: message.into(),
            source: None,
        }
    }

    /// An internal error wrapping its underlying cause.
    pub fn internal(message: impl Into<String>, source: impl Into<ErrorSource>) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}
