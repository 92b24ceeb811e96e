//! Turning request descriptors into prompt contexts.

use super::{Message, PromptContext, RequestDescriptor};
use serde_json::json;

/// Builds the initial [`PromptContext`] for a call.
///
/// Implemented for any `Fn(&RequestDescriptor) -> PromptContext`.
pub trait ContextBuilder: Send + Sync {
    fn build(&self, request: &RequestDescriptor) -> PromptContext;
}

impl<F> ContextBuilder for F
where
    F: Fn(&RequestDescriptor) -> PromptContext + Send + Sync,
{
    fn build(&self, request: &RequestDescriptor) -> PromptContext {
        self(request)
    }
}

/// Rewrites a prompt context before it reaches the executor.
///
/// Interceptors run in registration order, each receiving the previous one's
/// output. Implemented for any `Fn(PromptContext) -> PromptContext`.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, context: PromptContext) -> PromptContext;
}

impl<F> Interceptor for F
where
    F: Fn(PromptContext) -> PromptContext + Send + Sync,
{
    fn intercept(&self, context: PromptContext) -> PromptContext {
        self(context)
    }
}

const DEFAULT_SYSTEM: &str = "You implement the operation described in the user message. \
Reply with a single JSON value that conforms to `result_schema`. \
When tools are available you may call them before answering.";

/// Minimal context: system instructions plus a JSON description of the
/// invocation as the first user turn.
#[derive(Debug, Clone)]
pub struct DefaultContextBuilder {
    system: String,
}

impl Default for DefaultContextBuilder {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM.to_string(),
        }
    }
}

impl DefaultContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the system instructions.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    fn describe(request: &RequestDescriptor) -> String {
        let parameters: Vec<_> = request
            .parameters
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "description": p.description,
                    "value": p.value,
                })
            })
            .collect();
        let mut invocation = json!({
            "operation": request.operation,
            "parameters": parameters,
            "result_type": request.result_type.name,
            "result_schema": request.result_type.schema,
        });
        if !request.description.is_empty() {
            invocation["description"] = json!(request.description);
        }
        if !request.memory.is_empty() {
            invocation["memory"] = json!(request.memory);
        }
        serde_json::to_string_pretty(&invocation).unwrap_or_else(|_| invocation.to_string())
    }
}

impl ContextBuilder for DefaultContextBuilder {
    fn build(&self, request: &RequestDescriptor) -> PromptContext {
        let invocation = Self::describe(request);
        PromptContext {
            operation: request.operation.clone(),
            system: self.system.clone(),
            history: vec![Message::user(invocation.clone())],
            invocation,
            memory: request.memory.clone(),
            tools: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ParameterDescriptor;
    use crate::memory::MemorySnapshot;
    use crate::mirror::TypeDescriptor;
    use serde_json::Value;

    fn request() -> RequestDescriptor {
        let mut memory = MemorySnapshot::new();
        memory.insert("tone".into(), json!("formal"));
        RequestDescriptor {
            operation: "translate".into(),
            description: "Translate text".into(),
            parameters: vec![ParameterDescriptor {
                name: "text".into(),
                description: "Source text".into(),
                value: json!("bonjour"),
            }],
            result_type: TypeDescriptor::of::<String>(),
            memory,
        }
    }

    #[test]
    fn default_builder_describes_invocation() {
        let ctx = DefaultContextBuilder::new().build(&request());
        assert_eq!(ctx.operation, "translate");
        assert_eq!(ctx.system, DEFAULT_SYSTEM);
        assert_eq!(ctx.history.len(), 1);
        assert_eq!(ctx.memory.get("tone"), Some(&json!("formal")));

        let invocation: Value = serde_json::from_str(&ctx.invocation).unwrap();
        assert_eq!(invocation["operation"], "translate");
        assert_eq!(invocation["description"], "Translate text");
        assert_eq!(invocation["parameters"][0]["value"], "bonjour");
        assert_eq!(invocation["result_schema"]["type"], "string");
        assert_eq!(invocation["memory"]["tone"], "formal");
        assert_eq!(
            ctx.history[0].content.as_deref(),
            Some(ctx.invocation.as_str())
        );
    }

    #[test]
    fn custom_system_prompt() {
        let ctx = DefaultContextBuilder::new()
            .with_system("Answer in French.")
            .build(&request());
        assert_eq!(ctx.system, "Answer in French.");
    }

    #[test]
    fn closures_implement_both_traits() {
        let builder = |req: &RequestDescriptor| PromptContext {
            operation: req.operation.clone(),
            ..Default::default()
        };
        let tag = |mut ctx: PromptContext| {
            ctx.system.push_str("[tagged]");
            ctx
        };
        let ctx = tag.intercept(builder.build(&request()));
        assert_eq!(ctx.operation, "translate");
        assert_eq!(ctx.system, "[tagged]");
    }
}
