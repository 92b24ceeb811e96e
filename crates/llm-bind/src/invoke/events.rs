//! Lifecycle listeners notified around every call.
//!
//! # Choosing a listener
//!
//! | Listener | Use case |
//! |----------|----------|
//! | [`LoggingListener`] | Call summaries via `tracing` |
//! | [`UsageTracker`] | Per-call usage records and running totals |
//! | Custom `impl LifecycleListener` | Metrics, audit trails, budgets |

use crate::context::PromptContext;
use crate::error::InvocationError;
use crate::usage::UsageInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Observer of call start, completion and failure.
///
/// All methods default to no-ops. They run inline on the calling task, so
/// keep them cheap.
pub trait LifecycleListener: Send + Sync {
    /// The context is built and the call is about to be admitted.
    fn on_start(&self, _context: &PromptContext) {}

    /// The call produced `result` (mirror form).
    fn on_complete(
        &self,
        _context: &PromptContext,
        _result: &Value,
        _duration_ms: u64,
        _usage: &UsageInfo,
    ) {
    }

    /// The call failed, including by cancellation.
    fn on_error(&self, _context: &PromptContext, _error: &InvocationError, _duration_ms: u64) {}
}

impl<T: LifecycleListener + ?Sized> LifecycleListener for Arc<T> {
    fn on_start(&self, context: &PromptContext) {
        (**self).on_start(context);
    }

    fn on_complete(
        &self,
        context: &PromptContext,
        result: &Value,
        duration_ms: u64,
        usage: &UsageInfo,
    ) {
        (**self).on_complete(context, result, duration_ms, usage);
    }

    fn on_error(&self, context: &PromptContext, error: &InvocationError, duration_ms: u64) {
        (**self).on_error(context, error, duration_ms);
    }
}

// ── LoggingListener ────────────────────────────────────────────────

/// Reports lifecycle events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl LifecycleListener for LoggingListener {
    fn on_start(&self, context: &PromptContext) {
        info!(
            "Call started: operation={}, tools={}, memory={}",
            context.operation,
            context.tools.len(),
            context.memory.len()
        );
    }

    fn on_complete(
        &self,
        context: &PromptContext,
        result: &Value,
        duration_ms: u64,
        usage: &UsageInfo,
    ) {
        info!(
            "Call finished: operation={}, {}ms, {}",
            context.operation,
            duration_ms,
            usage.summary()
        );
        debug!("Result: {}", preview_chars(&result.to_string(), 200));
    }

    fn on_error(&self, context: &PromptContext, error: &InvocationError, duration_ms: u64) {
        if error.is_cancelled() {
            info!(
                "Call cancelled: operation={}, {}ms",
                context.operation, duration_ms
            );
        } else {
            warn!(
                "Call failed: operation={}, {}ms: {error}",
                context.operation, duration_ms
            );
        }
    }
}

/// First `max` characters of `s`, with `...` appended only if more follow.
fn preview_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let mut out: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}

// ── UsageTracker ───────────────────────────────────────────────────

/// One finished call as seen by a [`UsageTracker`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub usage: UsageInfo,
    pub succeeded: bool,
    /// Error message for failed calls.
    pub error: Option<String>,
}

/// Accumulates a [`CallRecord`] per finished call.
///
/// Failed calls that reached a backend still record what they consumed.
#[derive(Debug, Default)]
pub struct UsageTracker {
    records: Mutex<Vec<CallRecord>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.lock().clone()
    }

    /// Usage summed over every recorded call.
    pub fn totals(&self) -> UsageInfo {
        let mut total = UsageInfo::default();
        for record in self.lock().iter() {
            total.merge(&record.usage);
        }
        total
    }

    pub fn call_count(&self) -> usize {
        self.lock().len()
    }

    pub fn failure_count(&self) -> usize {
        self.lock().iter().filter(|r| !r.succeeded).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CallRecord>> {
        // A poisoned tracker still holds valid records.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, record: CallRecord) {
        self.lock().push(record);
    }
}

fn started_at(duration_ms: u64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::milliseconds(i64::try_from(duration_ms).unwrap_or(i64::MAX))
}

impl LifecycleListener for UsageTracker {
    fn on_complete(
        &self,
        context: &PromptContext,
        _result: &Value,
        duration_ms: u64,
        usage: &UsageInfo,
    ) {
        self.push(CallRecord {
            operation: context.operation.clone(),
            started_at: started_at(duration_ms),
            duration_ms,
            usage: usage.clone(),
            succeeded: true,
            error: None,
        });
    }

    fn on_error(&self, context: &PromptContext, error: &InvocationError, duration_ms: u64) {
        let usage = error
            .as_aggregate()
            .map(|failure| failure.usage.clone())
            .unwrap_or_default();
        self.push(CallRecord {
            operation: context.operation.clone(),
            started_at: started_at(duration_ms),
            duration_ms,
            usage,
            succeeded: false,
            error: Some(error.to_string()),
        });
    }
}
