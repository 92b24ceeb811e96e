//! Convenience re-exports for common `llm-bind` types.
//!
//! Meant to be glob-imported by code that declares operations and builds
//! bound instances:
//!
//! ```ignore
//! use llm_bind::prelude::*;
//! ```
//!
//! Adapter authors and anything touching the executor directly should
//! import from the modules instead.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{CancellationToken, InvocationError, json_schema_for};

// ── Operations and dispatch ─────────────────────────────────────────
pub use crate::invoke::{
    Arguments, BlockingInvoker, BoundInstance, BoundInstanceBuilder, CallHandle,
    LifecycleListener, LoggingListener, Operation, UsageTracker,
};

// ── Backends ────────────────────────────────────────────────────────
pub use crate::backend::{BackendAdapter, BackendFuture, BackendRequest, BackendResponse, Reply};
pub use crate::error::BackendError;
pub use crate::usage::UsageInfo;

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{Message, PromptContext, RequestDescriptor};

// ── Resilience ──────────────────────────────────────────────────────
pub use crate::resilience::{ResiliencePolicy, ResilienceSettings, ResultValidator, Validation};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, Tool, ToolCall, ToolDefinition, ToolFuture, ToolResult, ToolSet};
