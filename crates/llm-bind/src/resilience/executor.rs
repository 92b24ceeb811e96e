//! The retry / timeout / validation / fallback loop around one call.
//!
//! Per call:
//!
//! 1. Take a rate-limit token, then a concurrency slot (held until the call
//!    ends, whatever the outcome).
//! 2. Up to `max_retries + 1` attempts against the primary adapter. Each
//!    attempt runs the tool round-trip loop (raced against the timeout),
//!    decodes the raw result and applies the validator. A rejected result
//!    leaves the rejected answer plus a corrective user turn in the history
//!    every later attempt starts from.
//! 3. Exponential backoff between attempts.
//! 4. One attempt against the fallback adapter, if configured.
//!
//! Cancellation is observed at every suspension point and never retried;
//! a cancelled call does not touch the fallback.

use super::policy::{ResiliencePolicy, Validation};
use super::rounds::run_rounds;
use super::Admission;
use crate::backend::BackendAdapter;
use crate::context::{Message, PromptContext};
use crate::error::{AggregateFailure, AttemptError, InvocationError};
use crate::mirror::TypeDescriptor;
use crate::tools::ToolIndex;
use crate::usage::UsageInfo;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Converts a normalized raw result into the caller's type.
pub type Decoder<'a, T> = dyn Fn(Value) -> serde_json::Result<T> + Send + Sync + 'a;

/// A successful call.
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub value: T,
    /// The accepted result in mirror form, unwrapped.
    pub raw: Value,
    pub usage: UsageInfo,
    /// Attempts made, the fallback attempt included.
    pub attempts: u32,
    pub used_fallback: bool,
}

enum AttemptFailure {
    Cancelled,
    Failed(AttemptError),
}

impl From<AttemptError> for AttemptFailure {
    fn from(err: AttemptError) -> Self {
        AttemptFailure::Failed(err)
    }
}

/// Runs calls against one primary adapter under one policy.
pub struct ResilienceExecutor<'a> {
    primary: &'a dyn BackendAdapter,
    policy: &'a ResiliencePolicy,
    admission: &'a Admission,
}

impl<'a> ResilienceExecutor<'a> {
    pub fn new(
        primary: &'a dyn BackendAdapter,
        policy: &'a ResiliencePolicy,
        admission: &'a Admission,
    ) -> Self {
        Self {
            primary,
            policy,
            admission,
        }
    }

    /// Execute one call.
    ///
    /// `context.tools` is what the backend is told about; `tools` routes the
    /// calls it makes.
    pub async fn execute<T: Send>(
        &self,
        context: PromptContext,
        result_type: &TypeDescriptor,
        tools: &ToolIndex,
        decode: &Decoder<'_, T>,
        cancel: &CancellationToken,
    ) -> Result<Completed<T>, InvocationError> {
        let operation = context.operation.clone();
        let cancelled = || InvocationError::Cancelled(operation.clone());

        let _permit = self
            .admission
            .admit(cancel)
            .await
            .map_err(|_| cancelled())?;

        let max_attempts = self.policy.max_attempts();
        let mut base = context;
        let mut usage = UsageInfo::default();
        let mut attempt = 0;

        let primary_error = loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            debug!(
                "Attempt {attempt}/{max_attempts} for {operation} on {}",
                self.primary.id()
            );

            let mut working = base.clone();
            let outcome = self
                .attempt(
                    self.primary,
                    &mut working,
                    result_type,
                    tools,
                    decode,
                    true,
                    &mut usage,
                    cancel,
                )
                .await;

            let err = match outcome {
                Ok((value, raw)) => {
                    return Ok(Completed {
                        value,
                        raw,
                        usage,
                        attempts: attempt,
                        used_fallback: false,
                    });
                }
                Err(AttemptFailure::Cancelled) => return Err(cancelled()),
                Err(AttemptFailure::Failed(err)) => err,
            };

            if let AttemptError::Validation { reason } = &err {
                // Retries build on the rejected exchange.
                working.push(Message::user(corrective_message(reason)));
                base = working;
            }

            if !err.is_retryable() {
                warn!("Attempt {attempt} for {operation} failed, not retrying: {err}");
                break err;
            }
            if attempt >= max_attempts {
                warn!("Attempt {attempt}/{max_attempts} for {operation} failed: {err}");
                break err;
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                "Attempt {attempt}/{max_attempts} for {operation} failed: {err}; retrying in {}ms",
                delay.as_millis()
            );
            if !sleep_or_cancel(delay, cancel).await {
                return Err(cancelled());
            }
        };

        let Some(fallback) = self.policy.fallback.as_deref() else {
            return Err(exhausted(
                operation.clone(),
                attempt,
                primary_error,
                None,
                usage,
                base,
            ));
        };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        info!(
            "Primary {} exhausted for {operation}, engaging fallback {}",
            self.primary.id(),
            fallback.id()
        );
        let mut working = base.clone();
        let outcome = self
            .attempt(
                fallback,
                &mut working,
                result_type,
                tools,
                decode,
                self.policy.validate_fallback,
                &mut usage,
                cancel,
            )
            .await;

        match outcome {
            Ok((value, raw)) => Ok(Completed {
                value,
                raw,
                usage,
                attempts: attempt + 1,
                used_fallback: true,
            }),
            Err(AttemptFailure::Cancelled) => Err(cancelled()),
            Err(AttemptFailure::Failed(fallback_error)) => {
                warn!("Fallback {} failed for {operation}: {fallback_error}", fallback.id());
                Err(exhausted(
                    operation.clone(),
                    attempt,
                    primary_error,
                    Some(fallback_error),
                    usage,
                    base,
                ))
            }
        }
    }

    /// One attempt: round-trip loop under the timeout, decode, validate.
    #[allow(clippy::too_many_arguments)]
    async fn attempt<T>(
        &self,
        adapter: &dyn BackendAdapter,
        context: &mut PromptContext,
        result_type: &TypeDescriptor,
        tools: &ToolIndex,
        decode: &Decoder<'_, T>,
        validate: bool,
        usage: &mut UsageInfo,
        cancel: &CancellationToken,
    ) -> Result<(T, Value), AttemptFailure> {
        let max_rounds = self.policy.max_tool_rounds;
        let rounds = run_rounds(adapter, context, result_type, tools, max_rounds, usage);

        let raw = match self.policy.timeout() {
            Some(limit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AttemptFailure::Cancelled),
                result = tokio::time::timeout(limit, rounds) => match result {
                    Ok(raw) => raw?,
                    Err(_) => {
                        warn!("{} did not answer within {}ms", adapter.id(), self.policy.timeout_ms);
                        return Err(AttemptError::Timeout {
                            timeout_ms: self.policy.timeout_ms,
                        }
                        .into());
                    }
                },
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AttemptFailure::Cancelled),
                raw = rounds => raw?,
            },
        };

        let normalized = result_type.normalize(raw);
        let value = decode(normalized.clone()).map_err(|e| AttemptError::Deserialization {
            type_name: result_type.name.clone(),
            message: e.to_string(),
        })?;

        if validate
            && let Some(validator) = &self.policy.validator
            && let Validation::Invalid(reason) = validator.validate(&normalized)
        {
            context.push(Message::assistant_text(normalized.to_string()));
            return Err(AttemptError::Validation { reason }.into());
        }

        Ok((value, normalized))
    }
}

fn corrective_message(reason: &str) -> String {
    format!(
        "Your previous answer was rejected: {reason}. \
         Reply again with a corrected result that satisfies the result schema."
    )
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn exhausted(
    operation: String,
    attempts: u32,
    primary: AttemptError,
    fallback: Option<AttemptError>,
    usage: UsageInfo,
    context: PromptContext,
) -> InvocationError {
    InvocationError::Exhausted(Box::new(AggregateFailure {
        operation,
        attempts,
        primary,
        fallback,
        usage,
        context,
    }))
}
