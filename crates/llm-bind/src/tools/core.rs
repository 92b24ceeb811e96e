//! In-process tools and the [`ToolSet`] provider that dispatches them.
//!
//! The [`Tool`] trait is a static definition plus an async `execute` over
//! already-parsed JSON arguments. Tools are collected into a [`ToolSet`],
//! which implements [`ToolProvider`] and handles validation, timing,
//! timeouts and result truncation.

use super::provider::{ProviderFuture, ToolProvider};
use super::{ToolCall, ToolDefinition, ToolResult};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`].
///
/// `Ok` content goes back to the backend as a normal result, `Err` content
/// as an error result.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool the backend can invoke.
///
/// # Example
///
/// ```ignore
/// struct Clock;
///
/// impl Tool for Clock {
///     fn definition(&self) -> ToolDefinition {
///         ToolDefinition::new("now", "Current UTC time", json!({"type": "object"}))
///     }
///
///     fn execute(&self, _arguments: &Value) -> ToolFuture<'_> {
///         Box::pin(async { Ok(chrono::Utc::now().to_rfc3339()) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool against the backend-supplied arguments.
    ///
    /// Uses a boxed future so that the trait is dyn-compatible.
    fn execute(&self, arguments: &Value) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.definition().name
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name.
///
/// Tools keep their registration order in [`definitions`](Self::definitions).
/// Registering a second tool under an existing name replaces the first.
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_arg_validation(true)
///     .with_default_timeout(Some(Duration::from_secs(10)))
///     .with(FnTool::new(
///         ToolDefinition::for_args::<CalculatorArgs>("calculator", "Evaluate arithmetic"),
///         |args: CalculatorArgs| async move { evaluate(&args.expr) },
///     ));
/// ```
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    order: Vec<String>,
    max_result_bytes: usize,
    validate_args: bool,
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.order)
            .field("max_result_bytes", &self.max_result_bytes)
            .field("validate_args", &self.validate_args)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: false,
            default_timeout: None,
        }
    }

    /// Set the maximum result size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Validate arguments against each tool's JSON Schema before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Per-tool execution timeout. `None` disables it.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name();
        if self.tools.insert(name.clone(), Box::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Register a tool only when `condition` holds.
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name with validation, timing, timeout and
    /// truncation. Every failure comes back as `Err` text for the backend.
    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<String, String> {
        let Some(tool) = self.tools.get(name) else {
            return Err(format!("Error: unknown tool '{name}'"));
        };

        if self.validate_args
            && let Some(error) = validate_tool_arguments(tool.as_ref(), arguments)
        {
            return Err(error);
        }

        log_tool_call(name, arguments);
        let start = std::time::Instant::now();

        let result = match self.default_timeout {
            Some(limit) => match tokio::time::timeout(limit, tool.execute(arguments)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "Tool {name} timed out after {:.1}s",
                        start.elapsed().as_secs_f64()
                    );
                    Err(format!(
                        "Error: tool '{name}' timed out after {:.0} seconds.",
                        limit.as_secs_f64()
                    ))
                }
            },
            None => tool.execute(arguments).await,
        };

        let elapsed = start.elapsed();
        match &result {
            Ok(content) => {
                debug!(
                    "Tool {name} completed in {:.0}ms ({} bytes)",
                    elapsed.as_secs_f64() * 1000.0,
                    content.len()
                );
                trace!("Tool {name} result preview: {}", preview(content, 300));
            }
            Err(error) => debug!("Tool {name} failed in {}ms: {error}", elapsed.as_millis()),
        }

        result
            .map(|content| truncate_result(content, self.max_result_bytes))
            .map_err(|error| truncate_result(error, self.max_result_bytes))
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolProvider for ToolSet {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.definitions()
    }

    fn call_tool<'a>(&'a self, call: &'a ToolCall) -> ProviderFuture<'a> {
        Box::pin(async move {
            match self.execute(&call.name, &call.arguments).await {
                Ok(content) => ToolResult::ok(&call.id, content),
                Err(error) => ToolResult::error(&call.id, error),
            }
        })
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> + Send + Sync,
>;

/// A closure-based tool that parses its arguments into `A` and delegates to
/// an async handler.
///
/// For tools that need shared state, implement [`Tool`] on a struct instead.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct CalculatorArgs { expr: String }
///
/// let calculator = FnTool::new(
///     ToolDefinition::for_args::<CalculatorArgs>("calculator", "Evaluate arithmetic"),
///     |args: CalculatorArgs| async move { evaluate(&args.expr) },
/// );
/// ```
pub struct FnTool {
    def: ToolDefinition,
    handler: ErasedToolHandler,
}

impl FnTool {
    /// Parse errors are reported to the backend as `Err` results without
    /// calling the handler.
    pub fn new<A, F, Fut>(def: ToolDefinition, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let erased = move |raw: Value| -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> {
            match serde_json::from_value::<A>(raw) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move {
                    Err(format!(
                        "Error: invalid tool arguments: {e}. \
                         Please provide valid JSON matching the tool's parameter schema."
                    ))
                }),
            }
        };

        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDefinition {
        self.def.clone()
    }

    fn execute(&self, arguments: &Value) -> ToolFuture<'_> {
        (self.handler)(arguments.clone())
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against the tool's declared JSON Schema.
///
/// Returns `None` if valid (or if the schema itself cannot be compiled),
/// otherwise an error listing every violation.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &Value) -> Option<String> {
    let schema = tool.definition().input_schema;
    let validator = jsonschema::validator_for(&schema).ok()?;

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Error: argument validation failed for tool '{}':\n{}\n\
             Please fix the arguments and try again.",
            tool.name(),
            errors.join("\n")
        ))
    }
}

fn log_tool_call(name: &str, arguments: &Value) {
    let raw = arguments.to_string();
    info!(
        "[tool] {name}({}{})",
        preview(&raw, 120),
        if raw.len() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} arguments: {raw}");
}

/// Longest prefix of `s` that fits in `max` bytes on a char boundary.
fn preview(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.get(..end).unwrap_or_default()
}

/// Truncate a string to at most `max` bytes, appending a notice if trimmed.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() > max {
        format!("{}...\n[truncated: {} bytes total]", preview(&s, max), s.len())
    } else {
        s
    }
}
