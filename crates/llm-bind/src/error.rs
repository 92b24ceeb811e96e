//! Error types for bound-instance construction and invocation.
//!
//! Two layers: [`AttemptError`] describes why one attempt failed and decides
//! whether it is worth retrying; [`InvocationError`] is what a caller sees
//! once the whole call is over.

use crate::context::PromptContext;
use crate::usage::UsageInfo;
use thiserror::Error;

/// A failure reported by a backend adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a single attempt against a backend failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttemptError {
    /// The attempt did not finish within `timeout_ms`.
    #[error("attempt timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The configured validator rejected the result.
    #[error("result rejected by validator: {reason}")]
    Validation { reason: String },

    /// The raw result did not conform to the declared result type.
    #[error("result does not match `{type_name}`: {message}")]
    Deserialization { type_name: String, message: String },

    /// The backend kept requesting tools past the round cap.
    #[error("backend still requesting tools after {max_rounds} round(s)")]
    Protocol { max_rounds: u32 },

    /// The backend adapter itself failed.
    #[error("backend `{backend}` failed: {source}")]
    Adapter {
        backend: String,
        #[source]
        source: BackendError,
    },
}

impl AttemptError {
    /// Whether another attempt against the same adapter can help.
    ///
    /// Protocol errors mean the backend is misbehaving, not flaky, so they
    /// end the primary retry loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Protocol { .. })
    }
}

/// Terminal failure of a call after all retries and any fallback.
#[derive(Debug, Error)]
#[error(
    "`{operation}` failed after {attempts} attempt(s): {primary}{}",
    fallback_note(.fallback.as_ref())
)]
pub struct AggregateFailure {
    /// The operation that was being invoked.
    pub operation: String,
    /// Number of primary attempts made.
    pub attempts: u32,
    /// The last error recorded against the primary adapter.
    #[source]
    pub primary: AttemptError,
    /// The fallback adapter's error, when a fallback was attempted.
    pub fallback: Option<AttemptError>,
    /// Usage accumulated across every round-trip of the call.
    pub usage: UsageInfo,
    /// The context as it stood after the last attempt (including any
    /// corrective turns).
    pub context: PromptContext,
}

fn fallback_note(fallback: Option<&AttemptError>) -> String {
    match fallback {
        Some(err) => format!("; fallback also failed: {err}"),
        None => String::new(),
    }
}

/// Errors surfaced to the caller of a bound instance.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The bound instance could not be built.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The operation is not in the instance's operation table, or was
    /// registered with a different result type.
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    /// Arguments did not line up with the declared parameters.
    #[error("invalid arguments for `{operation}`: {message}")]
    InvalidArguments { operation: String, message: String },

    /// The caller cancelled the call.
    #[error("call to `{0}` was cancelled")]
    Cancelled(String),

    /// All attempts (and the fallback, if any) failed.
    #[error(transparent)]
    Exhausted(#[from] Box<AggregateFailure>),

    /// The task running a spawned call panicked or was aborted.
    #[error("call task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl InvocationError {
    /// The aggregate failure, if this is one.
    pub fn as_aggregate(&self) -> Option<&AggregateFailure> {
        match self {
            InvocationError::Exhausted(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InvocationError::Cancelled(_))
    }
}
