//! Typed operations whose implementation is delegated to an LLM backend.
//!
//! `llm-bind` turns one strongly-typed operation call into zero or more
//! backend round-trips. The core abstraction is the
//! [`BoundInstance`](invoke::BoundInstance): one backend adapter, one
//! resilience policy, a table of declared operations, tool providers, a
//! memory store and lifecycle listeners, wired together once and then shared
//! by every call.
//!
//! # Getting started
//!
//! ```ignore
//! use llm_bind::prelude::*;
//!
//! #[derive(serde::Deserialize, schemars::JsonSchema)]
//! struct Summary { headline: String, bullets: Vec<String> }
//!
//! let summarize = Operation::<Summary>::new("summarize")
//!     .describe("Summarize the given text")
//!     .param("text", "The text to summarize")
//!     .memorize("last_summary");
//!
//! let instance = BoundInstance::builder()
//!     .with_adapter(my_backend)
//!     .with_policy(ResiliencePolicy::default().with_retries(3).with_timeout_ms(30_000))
//!     .with_listener(LoggingListener)
//!     .with_operation(&summarize)
//!     .build()?;
//!
//! let summary = instance
//!     .invoke(&summarize, Arguments::new().arg("text", article))
//!     .await?;
//! ```
//!
//! # Where to find things
//!
//! - **Declare and call operations:** [`Operation`](invoke::Operation),
//!   [`Arguments`](invoke::Arguments) and
//!   [`BoundInstance`](invoke::BoundInstance). Handle-based and blocking
//!   callers use [`CallHandle`](invoke::CallHandle) and
//!   [`BlockingInvoker`](invoke::BlockingInvoker).
//! - **Plug in a backend:** implement [`BackendAdapter`](backend::BackendAdapter).
//! - **Resilience:** [`ResiliencePolicy`](resilience::ResiliencePolicy),
//!   [`ResilienceExecutor`](resilience::ResilienceExecutor), the token-bucket
//!   [`RateLimiter`](resilience::RateLimiter) and the
//!   [`ConcurrencyThrottle`](resilience::ConcurrencyThrottle).
//! - **Tool calling:** [`ToolProvider`](tools::ToolProvider), or build one
//!   from closures with [`ToolSet`](tools::ToolSet) and
//!   [`FnTool`](tools::FnTool).
//! - **Observe calls:** [`LifecycleListener`](invoke::LifecycleListener),
//!   [`LoggingListener`](invoke::LoggingListener) and
//!   [`UsageTracker`](invoke::UsageTracker).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`invoke`] | Operation table, dispatcher, call handles, lifecycle listeners |
//! | [`resilience`] | Policy, retry/timeout/fallback executor, tool round-trip loop, admission control |
//! | [`tools`] | Tool provider contract, [`ToolSet`](tools::ToolSet), closure tools |
//! | [`context`] | Request descriptors, prompt context, context builder and interceptors |
//! | [`backend`] | Backend adapter contract |
//! | [`mirror`] | Type adapter registry for external types |
//! | [`memory`] | Cross-call memory store |
//! | [`usage`] | Usage accounting and pricing |

pub mod backend;
pub mod context;
pub mod error;
pub mod invoke;
pub mod memory;
pub mod mirror;
pub mod prelude;
pub mod resilience;
pub mod tools;
pub mod usage;

use schemars::JsonSchema;

pub use error::{AggregateFailure, AttemptError, BackendError, InvocationError};

// Re-export schemars and the cancellation token for downstream crates.
pub use schemars;
pub use tokio_util::sync::CancellationToken;

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// Used for result-type descriptors sent to the backend and for tool input
/// schemas.
///
/// ```
/// use llm_bind::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct CalculatorArgs {
///     expr: String,
/// }
///
/// let schema = json_schema_for::<CalculatorArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"expr".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}
