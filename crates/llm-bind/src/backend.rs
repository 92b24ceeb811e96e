//! The backend adapter contract.
//!
//! An adapter turns a [`BackendRequest`] into one round-trip against some
//! model provider. Vendor wire formats live entirely inside adapters; the
//! engine only sees a final raw value or a list of tool-call requests.

use crate::context::PromptContext;
use crate::error::BackendError;
use crate::mirror::TypeDescriptor;
use crate::tools::{ToolCall, ToolDefinition};
use crate::usage::UsageInfo;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// Boxed future returned by [`BackendAdapter::invoke`].
pub type BackendFuture<'a> = BoxFuture<'a, Result<BackendResponse, BackendError>>;

/// One round-trip's input.
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a> {
    pub context: &'a PromptContext,
    /// The result type the final answer must conform to.
    pub result_type: &'a TypeDescriptor,
    /// Tools the backend may call this round. Empty when none are available.
    pub tools: &'a [ToolDefinition],
}

/// What the backend produced in one round.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The final raw result.
    Final(Value),
    /// Tool invocations requested before a final answer, with any text the
    /// backend emitted alongside them.
    ToolCalls {
        calls: Vec<ToolCall>,
        content: Option<String>,
    },
}

/// One round-trip's output.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub reply: Reply,
    pub usage: Option<UsageInfo>,
}

impl BackendResponse {
    pub fn final_value(value: Value) -> Self {
        Self {
            reply: Reply::Final(value),
            usage: None,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            reply: Reply::ToolCalls {
                calls,
                content: None,
            },
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: UsageInfo) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A pluggable model backend.
///
/// Uses a boxed future so that adapters can be stored as trait objects.
///
/// ```ignore
/// struct Canned;
///
/// impl BackendAdapter for Canned {
///     fn id(&self) -> &str { "canned" }
///
///     fn invoke<'a>(&'a self, _request: BackendRequest<'a>) -> BackendFuture<'a> {
///         Box::pin(async { Ok(BackendResponse::final_value(json!({"value": "hello"}))) })
///     }
/// }
/// ```
pub trait BackendAdapter: Send + Sync {
    /// Identifier reported in usage and errors, e.g. `"anthropic/claude-sonnet-4"`.
    fn id(&self) -> &str;

    fn invoke<'a>(&'a self, request: BackendRequest<'a>) -> BackendFuture<'a>;
}

impl<T: BackendAdapter + ?Sized> BackendAdapter for Arc<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn invoke<'a>(&'a self, request: BackendRequest<'a>) -> BackendFuture<'a> {
        (**self).invoke(request)
    }
}
