//! Component-level error type.

use thiserror::Error;

/// Errors returned by components, actions and events.
///
/// The engine uses the variant to decide how a failure surfaces:
/// - `Setup`: the step that needed the component fails.
/// - `InvalidConfig`: reported as a configuration-resolution failure.
/// - `Fault`: a step fault; aborts a batch run, ends a reactive cycle.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComponentError {
    /// The action or event raised before producing a well-formed result.
    #[error("execution fault: {0}")]
    Fault(String),

    /// Third-party setup was rejected (e.g. a missing credential).
    #[error("setup rejected: {0}")]
    Setup(String),

    /// Parameters could not be turned into a runnable action or event.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No factory is registered under the given name.
    #[error("unknown {kind} '{name}'")]
    Unknown { kind: &'static str, name: String },

    /// The capability exists but this implementation does not offer it.
    #[error("{0} is not supported by this component")]
    Unsupported(String),
}

impl ComponentError {
    pub(crate) fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Unknown {
            kind,
            name: name.into(),
        }
    }
}
