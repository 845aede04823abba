use thiserror::Error;

use crate::request::ContextId;

/// Errors raised by a module container while wiring or instantiating providers.
#[derive(Debug, Error)]
pub enum ContainerError {
    // Build/validation errors
    #[error("unknown module '{0}'")]
    UnknownModule(String),
    #[error("module '{module}' imports unknown '{import}'")]
    UnknownImport { module: String, import: String },
    #[error("provider '{provider}' depends on unknown '{depends_on}'")]
    UnknownDependency {
        provider: String,
        depends_on: String,
    },
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },
    #[error("invalid container configuration:\n{errors:#?}")]
    InvalidConfiguration { errors: Vec<String> },

    // Instantiation errors
    #[error("provider '{0}' has no instance")]
    NotInstantiated(String),
    #[error("provider '{provider}' does not belong to module '{module}'")]
    ForeignProvider { provider: String, module: String },
    #[error("construction failed for provider '{token}'")]
    Construction {
        token: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no request object registered for context {0}")]
    RequestUnavailable(ContextId),
    #[error("dependency '{token}' is not of type {expected}")]
    TypeMismatch {
        token: String,
        expected: &'static str,
    },
}

/// Errors surfaced to the caller of a bound handler.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("request argument missing at position {index}")]
    MissingRequestArg { index: usize },
    #[error("parameter {index} is missing")]
    MissingParam { index: usize },
    #[error("parameter {index} could not be decoded")]
    DecodeParam {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("parameter {index} is not of type {expected}")]
    ParamType { index: usize, expected: &'static str },
    #[error("instance is not of type {expected}")]
    InstanceType { expected: &'static str },
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

/// Errors raised while building the metadata table or running discovery.
#[derive(Debug, Error)]
pub enum ExploreError {
    #[error("include list references unknown module '{0}'")]
    UnknownModule(String),
    #[error("invalid resolver metadata:\n{errors:#?}")]
    InvalidMetadata { errors: Vec<String> },
    #[error(transparent)]
    Container(#[from] ContainerError),
}
