//! The tool-call round-trip loop of a single attempt.

use crate::backend::{BackendAdapter, BackendRequest, Reply};
use crate::context::{Message, PromptContext};
use crate::error::AttemptError;
use crate::mirror::TypeDescriptor;
use crate::tools::ToolIndex;
use crate::usage::UsageInfo;
use serde_json::Value;
use tracing::{debug, trace};

/// Drive `adapter` until it produces a final raw result.
///
/// Tool-call turns and their results are appended to `context`; usage from
/// every round is merged into `usage` as soon as it is reported, so it
/// survives a later failure of the attempt.
pub async fn run_rounds(
    adapter: &dyn BackendAdapter,
    context: &mut PromptContext,
    result_type: &TypeDescriptor,
    tools: &ToolIndex,
    max_rounds: u32,
    usage: &mut UsageInfo,
) -> Result<Value, AttemptError> {
    for round in 1..=max_rounds {
        let request = BackendRequest {
            context: &*context,
            result_type,
            tools: &context.tools,
        };
        let response = adapter
            .invoke(request)
            .await
            .map_err(|source| AttemptError::Adapter {
                backend: adapter.id().to_string(),
                source,
            })?;

        if let Some(round_usage) = &response.usage {
            usage.merge(round_usage);
        }

        let (calls, content) = match response.reply {
            Reply::Final(raw) => {
                debug!("Round {round}/{max_rounds} on {}: final result", adapter.id());
                trace!("Raw result: {raw}");
                return Ok(raw);
            }
            Reply::ToolCalls { calls, content } if calls.is_empty() => {
                debug!("Round {round}/{max_rounds} on {}: text reply", adapter.id());
                return Ok(content.map(Value::String).unwrap_or(Value::Null));
            }
            Reply::ToolCalls { calls, content } => (calls, content),
        };

        debug!(
            "Round {round}/{max_rounds} on {}: {} tool call(s): {}",
            adapter.id(),
            calls.len(),
            calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
        );

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            results.push(tools.call(call).await);
        }
        context.push(Message::assistant_tool_calls(calls, content));
        context.push(Message::tool_results(results));
    }

    Err(AttemptError::Protocol { max_rounds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendFuture, BackendResponse};
    use crate::context::Role;
    use crate::error::BackendError;
    use crate::tools::{FnTool, ToolCall, ToolDefinition, ToolProvider, ToolSet};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Replays canned replies in order, then keeps repeating the last one.
    struct Replay {
        replies: Mutex<Vec<Result<BackendResponse, BackendError>>>,
        seen_tools: Mutex<Vec<usize>>,
    }

    impl Replay {
        fn new(replies: Vec<Result<BackendResponse, BackendError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen_tools: Mutex::new(Vec::new()),
            }
        }
    }

    impl BackendAdapter for Replay {
        fn id(&self) -> &str {
            "replay"
        }

        fn invoke<'a>(&'a self, request: BackendRequest<'a>) -> BackendFuture<'a> {
            self.seen_tools.lock().unwrap().push(request.tools.len());
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0].clone()
            };
            Box::pin(async move { reply })
        }
    }

    fn echo_tools() -> ToolIndex {
        let set = ToolSet::new().with(FnTool::new(
            ToolDefinition::new("echo", "Echo", json!({"type": "object"})),
            |args: Value| async move { Ok(args["text"].as_str().unwrap_or_default().to_string()) },
        ));
        ToolIndex::build(&[Arc::new(set) as Arc<dyn ToolProvider>])
    }

    fn context_with(tools: &ToolIndex) -> PromptContext {
        PromptContext {
            tools: tools.definitions().to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn tool_calls_are_answered_then_final_returned() {
        let backend = Replay::new(vec![
            Ok(BackendResponse::tool_calls(vec![
                ToolCall::new("1", "echo", json!({"text": "a"})),
                ToolCall::new("2", "missing", json!({})),
            ])
            .with_usage(UsageInfo::new("replay", 10, 2))),
            Ok(BackendResponse::final_value(json!({"value": "done"}))
                .with_usage(UsageInfo::new("replay", 5, 1))),
        ]);
        let tools = echo_tools();
        let mut ctx = context_with(&tools);
        let mut usage = UsageInfo::default();

        let raw = run_rounds(
            &backend,
            &mut ctx,
            &TypeDescriptor::of::<String>(),
            &tools,
            4,
            &mut usage,
        )
        .await
        .unwrap();

        assert_eq!(raw, json!({"value": "done"}));
        assert_eq!(usage.input_units, 15);
        assert_eq!(*backend.seen_tools.lock().unwrap(), vec![1, 1]);

        assert_eq!(ctx.history.len(), 2);
        assert_eq!(ctx.history[0].role, Role::Assistant);
        assert_eq!(ctx.history[0].tool_calls.len(), 2);
        let results = &ctx.history[1].tool_results;
        assert_eq!(results[0].call_id, "1");
        assert_eq!(results[0].content, "a");
        assert!(!results[0].is_error);
        assert_eq!(results[1].call_id, "2");
        assert!(results[1].is_error);
    }

    #[tokio::test]
    async fn round_cap_is_a_protocol_error() {
        let backend = Replay::new(vec![Ok(BackendResponse::tool_calls(vec![ToolCall::new(
            "x",
            "echo",
            json!({"text": "again"}),
        )]))]);
        let tools = echo_tools();
        let mut ctx = context_with(&tools);
        let mut usage = UsageInfo::default();

        let err = run_rounds(
            &backend,
            &mut ctx,
            &TypeDescriptor::of::<String>(),
            &tools,
            3,
            &mut usage,
        )
        .await
        .unwrap_err();

        assert_eq!(err, AttemptError::Protocol { max_rounds: 3 });
        assert_eq!(backend.seen_tools.lock().unwrap().len(), 3);
        assert_eq!(ctx.history.len(), 6);
    }

    #[tokio::test]
    async fn adapter_failure_is_tagged_with_backend() {
        let backend = Replay::new(vec![Err(BackendError::new("HTTP 503"))]);
        let tools = ToolIndex::default();
        let mut ctx = PromptContext::default();
        let mut usage = UsageInfo::default();

        let err = run_rounds(
            &backend,
            &mut ctx,
            &TypeDescriptor::of::<String>(),
            &tools,
            1,
            &mut usage,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            AttemptError::Adapter { backend: ref id, .. } if id == "replay"
        ));
        assert_eq!(*backend.seen_tools.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn empty_tool_call_list_is_a_text_reply() {
        let backend = Replay::new(vec![Ok(BackendResponse {
            reply: Reply::ToolCalls {
                calls: Vec::new(),
                content: Some("plain".into()),
            },
            usage: None,
        })]);
        let mut ctx = PromptContext::default();
        let mut usage = UsageInfo::default();
        let raw = run_rounds(
            &backend,
            &mut ctx,
            &TypeDescriptor::of::<String>(),
            &ToolIndex::default(),
            2,
            &mut usage,
        )
        .await
        .unwrap();
        assert_eq!(raw, json!("plain"));
        assert!(ctx.history.is_empty());
    }
}
