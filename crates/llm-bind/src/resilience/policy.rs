//! Resilience policy: retries, backoff, timeout, validation, fallback and
//! admission limits.

use crate::backend::BackendAdapter;
use crate::error::InvocationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::any::type_name;
use std::time::Duration;
use tracing::debug;

/// Verdict of a [`ResultValidator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(String),
}

impl Validation {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Validation::Invalid(reason.into())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

impl From<bool> for Validation {
    fn from(ok: bool) -> Self {
        if ok {
            Validation::Valid
        } else {
            Validation::invalid("result rejected by validator")
        }
    }
}

/// Checks a result after it deserialized successfully.
///
/// Sees the result in its mirror form (the JSON value, unwrapped from any
/// `{"value": ...}` envelope).
#[derive(Clone)]
pub struct ResultValidator(Arc<dyn Fn(&Value) -> Validation + Send + Sync>);

impl ResultValidator {
    /// The closure may return a [`Validation`] or a plain `bool`.
    pub fn new<F, O>(check: F) -> Self
    where
        F: Fn(&Value) -> O + Send + Sync + 'static,
        O: Into<Validation>,
    {
        Self(Arc::new(move |value: &Value| check(value).into()))
    }

    /// Validate results that deserialize as `T`.
    ///
    /// The validator sees the result in its JSON form, which for mirrored
    /// operations is the mirror type, so `T` should be the mirror. Results of
    /// any other shape pass untouched and are logged at debug level.
    ///
    /// ```
    /// use llm_bind::resilience::ResultValidator;
    ///
    /// let non_blank = ResultValidator::typed(|s: &String| !s.trim().is_empty());
    /// assert!(!non_blank.validate(&serde_json::json!("  ")).is_valid());
    /// assert!(non_blank.validate(&serde_json::json!("ok")).is_valid());
    /// ```
    pub fn typed<T, F, O>(check: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(&T) -> O + Send + Sync + 'static,
        O: Into<Validation>,
    {
        Self::new(move |value: &Value| match T::deserialize(value) {
            Ok(typed) => check(&typed).into(),
            Err(err) => {
                debug!(
                    "Validator for {} skipped a result of another shape: {err}",
                    type_name::<T>()
                );
                Validation::Valid
            }
        })
    }

    pub fn validate(&self, value: &Value) -> Validation {
        (self.0)(value)
    }
}

impl std::fmt::Debug for ResultValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResultValidator(..)")
    }
}

/// Serializable numeric part of a [`ResiliencePolicy`].
///
/// Missing fields take their defaults, so a partial JSON or TOML table is
/// enough:
///
/// ```
/// use llm_bind::resilience::ResilienceSettings;
///
/// let settings: ResilienceSettings =
///     serde_json::from_str(r#"{"max_retries": 5, "timeout_ms": 2000}"#).unwrap();
/// assert_eq!(settings.max_retries, 5);
/// assert_eq!(settings.retry_delay_ms, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// `0` disables the per-attempt timeout.
    pub timeout_ms: u64,
    /// `0` means unlimited.
    pub max_concurrent_requests: u32,
    /// `0` means unlimited.
    pub max_requests_per_minute: u32,
    pub max_tool_rounds: u32,
    pub validate_fallback: bool,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            backoff_multiplier: 2.0,
            timeout_ms: 0,
            max_concurrent_requests: 0,
            max_requests_per_minute: 0,
            max_tool_rounds: 10,
            validate_fallback: false,
        }
    }
}

/// How a bound instance survives a flaky backend.
#[derive(Clone)]
pub struct ResiliencePolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub retry_delay_ms: u64,
    /// Growth factor of the delay between consecutive retries.
    pub backoff_multiplier: f64,
    /// Per-attempt timeout; `0` disables it.
    pub timeout_ms: u64,
    pub validator: Option<ResultValidator>,
    /// Tried once after the primary adapter is exhausted.
    pub fallback: Option<Arc<dyn BackendAdapter>>,
    /// In-flight call bound per instance; `0` means unlimited.
    pub max_concurrent_requests: u32,
    /// Call starts per minute per instance; `0` means unlimited.
    pub max_requests_per_minute: u32,
    /// Tool round-trips allowed per attempt before a protocol error.
    pub max_tool_rounds: u32,
    /// Run the validator on the fallback result as well.
    pub validate_fallback: bool,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self::from_settings(ResilienceSettings::default())
    }
}

impl std::fmt::Debug for ResiliencePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePolicy")
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("timeout_ms", &self.timeout_ms)
            .field("validator", &self.validator.is_some())
            .field("fallback", &self.fallback.as_ref().map(|f| f.id().to_string()))
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("max_requests_per_minute", &self.max_requests_per_minute)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("validate_fallback", &self.validate_fallback)
            .finish()
    }
}

impl ResiliencePolicy {
    pub fn from_settings(settings: ResilienceSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
            backoff_multiplier: settings.backoff_multiplier,
            timeout_ms: settings.timeout_ms,
            validator: None,
            fallback: None,
            max_concurrent_requests: settings.max_concurrent_requests,
            max_requests_per_minute: settings.max_requests_per_minute,
            max_tool_rounds: settings.max_tool_rounds,
            validate_fallback: settings.validate_fallback,
        }
    }

    /// The numeric part of this policy.
    pub fn settings(&self) -> ResilienceSettings {
        ResilienceSettings {
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            backoff_multiplier: self.backoff_multiplier,
            timeout_ms: self.timeout_ms,
            max_concurrent_requests: self.max_concurrent_requests,
            max_requests_per_minute: self.max_requests_per_minute,
            max_tool_rounds: self.max_tool_rounds,
            validate_fallback: self.validate_fallback,
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_validator(mut self, validator: ResultValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_fallback(mut self, adapter: impl BackendAdapter + 'static) -> Self {
        self.fallback = Some(Arc::new(adapter));
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: u32) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_max_requests_per_minute(mut self, max: u32) -> Self {
        self.max_requests_per_minute = max;
        self
    }

    pub fn with_max_tool_rounds(mut self, max: u32) -> Self {
        self.max_tool_rounds = max;
        self
    }

    pub fn with_validate_fallback(mut self, enabled: bool) -> Self {
        self.validate_fallback = enabled;
        self
    }

    /// Total attempts against the primary adapter.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after failed attempt `attempt` (1-indexed):
    /// `retry_delay_ms × backoff_multiplier^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.retry_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::MAX)
    }

    /// Per-attempt timeout, if enabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Reject settings the executor cannot honor.
    pub fn validate(&self) -> Result<(), InvocationError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 0.0 {
            return Err(InvocationError::Configuration(format!(
                "backoff_multiplier must be a finite, non-negative number (got {})",
                self.backoff_multiplier
            )));
        }
        if self.max_tool_rounds == 0 {
            return Err(InvocationError::Configuration(
                "max_tool_rounds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
