//! Flow execution error types.
//!
//! One taxonomy for everything that can fail inside an invocation. The retry
//! loop in the op runtime consults [`FlowError::is_retryable`]; the service
//! layers consult [`FlowError::code`] to pick a transport status.

use thiserror::Error;

use crate::flow::parser::ParseError;
use crate::op::CompositionError;

/// Error raised while resolving or executing a flow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Request failed schema validation (missing field, wrong type, unknown field in strict mode).
    #[error("input validation: {0}")]
    InputValidation(String),

    /// A tool op's declared required input was absent from the context.
    #[error("op `{op}` missing required input `{key}`")]
    MissingInput { op: String, key: String },

    /// Flow name not in the flow table.
    #[error("unknown flow: {0}")]
    UnknownFlow(String),

    /// Op constructor name not in the registry.
    #[error("unknown op: {0}")]
    UnknownOp(String),

    /// LLM / embedding / vector-store / token-counter name not in the registry.
    #[error("unknown {category}: {name}")]
    UnknownResource {
        category: &'static str,
        name: String,
    },

    /// A local `join(timeout=...)` deadline elapsed. Retryable.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The invocation's cancellation token fired (deadline, disconnect, or
    /// sibling failure). Never retried; cleanup is skipped.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Provider I/O failure, rate limit, or 5xx. Retryable.
    #[error("transient: {0}")]
    Transient(String),

    /// Deterministic op failure ("give up"). Not retried.
    #[error("op failed: {0}")]
    OpFailed(String),

    /// Cache backend failure.
    #[error("cache: {0}")]
    Cache(String),

    /// Prompt file missing, unparsable, or template name unknown.
    #[error("prompt: {0}")]
    Prompt(String),

    /// Duplicate registration under the same (category, name).
    #[error("duplicate {category} registration: {name}")]
    DuplicateRegistration {
        category: &'static str,
        name: String,
    },

    /// Registration attempted after the registry was frozen.
    #[error("registry is frozen; cannot register {category} `{name}`")]
    RegistryFrozen {
        category: &'static str,
        name: String,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Composition(#[from] CompositionError),
}

impl FlowError {
    pub fn cancelled(msg: impl Into<String>) -> Self {
        FlowError::Cancelled(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        FlowError::Transient(msg.into())
    }

    pub fn op_failed(msg: impl Into<String>) -> Self {
        FlowError::OpFailed(msg.into())
    }

    /// Whether the op runtime may spend remaining retry budget on this error.
    ///
    /// Transient provider failures and local scheduler timeouts are retryable;
    /// cancellation by the invocation deadline and all deterministic errors
    /// are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowError::Transient(_) | FlowError::Timeout(_))
    }

    /// Stable machine-readable code for transport bodies.
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::InputValidation(_) | FlowError::MissingInput { .. } => "input_validation",
            FlowError::UnknownFlow(_) => "unknown_flow",
            FlowError::UnknownOp(_) => "unknown_op",
            FlowError::UnknownResource { .. } => "unknown_resource",
            FlowError::Timeout(_) => "timeout",
            FlowError::Cancelled(_) => "cancelled",
            FlowError::Transient(_) => "transient",
            FlowError::OpFailed(_) => "op_failed",
            FlowError::Cache(_) => "cache",
            FlowError::Prompt(_) => "prompt",
            FlowError::DuplicateRegistration { .. } | FlowError::RegistryFrozen { .. } => {
                "registry"
            }
            FlowError::Parse(_) => "parse",
            FlowError::Composition(_) => "composition",
        }
    }
}
