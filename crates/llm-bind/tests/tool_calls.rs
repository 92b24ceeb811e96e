//! Tool-call round trips through a bound instance.

mod common;

use common::{ScriptedBackend, Step, init_tracing};
use llm_bind::context::Role;
use llm_bind::invoke::{Arguments, BoundInstance, Operation, UsageTracker};
use llm_bind::resilience::{ResiliencePolicy, ResultValidator};
use llm_bind::tools::{FnTool, ToolCall, ToolDefinition, ToolSet};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

#[derive(Deserialize, JsonSchema)]
struct CalculatorArgs {
    /// A product of two integers, e.g. `6*7`.
    expr: String,
}

fn multiply(expr: &str) -> Result<String, String> {
    let (a, b) = expr
        .split_once('*')
        .ok_or_else(|| format!("unsupported expression: {expr}"))?;
    let parse = |s: &str| s.trim().parse::<i64>().map_err(|e| e.to_string());
    Ok((parse(a)? * parse(b)?).to_string())
}

/// A calculator tool that records the arguments it was called with.
fn calculator(seen: Arc<Mutex<Vec<Value>>>) -> ToolSet {
    ToolSet::new().with(FnTool::new(
        ToolDefinition::for_args::<CalculatorArgs>("calculator", "Evaluate a product"),
        move |args: CalculatorArgs| {
            seen.lock().unwrap().push(json!({"expr": args.expr}));
            let result = multiply(&args.expr);
            async move { result }
        },
    ))
}

fn solve() -> Operation<String> {
    Operation::<String>::new("solve").param("problem", "A word problem")
}

#[tokio::test]
async fn calculator_round_trip() {
    init_tracing();
    let backend = ScriptedBackend::new(
        "primary",
        vec![
            Step::Tools(vec![ToolCall::new(
                "call-1",
                "calculator",
                json!({"expr": "6*7"}),
            )]),
            Step::Final(json!({"value": "42"})),
        ],
    )
    .shared();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let op = solve();
    let instance = BoundInstance::builder()
        .with_adapter(backend.clone())
        .with_tool_provider(calculator(seen.clone()))
        .with_operation(&op)
        .build()
        .unwrap();

    let out = instance
        .invoke(&op, Arguments::new().arg("problem", "six sevens"))
        .await
        .unwrap();

    assert_eq!(out, "42");
    assert_eq!(*seen.lock().unwrap(), vec![json!({"expr": "6*7"})]);
    assert_eq!(backend.calls(), 2);

    // Both rounds advertise the calculator.
    for tools in backend.advertised() {
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "calculator");
    }

    // The second round sees the call and its correlated result.
    let second = &backend.contexts()[1];
    let n = second.history.len();
    assert_eq!(second.history[n - 2].role, Role::Assistant);
    assert_eq!(second.history[n - 2].tool_calls[0].id, "call-1");
    let result = &second.history[n - 1].tool_results[0];
    assert_eq!(result.call_id, "call-1");
    assert_eq!(result.content, "42");
    assert!(!result.is_error);
}

#[tokio::test]
async fn unknown_and_failing_tools_become_error_results() {
    init_tracing();
    let backend = ScriptedBackend::new(
        "primary",
        vec![
            Step::Tools(vec![
                ToolCall::new("a", "weather", json!({"city": "Oslo"})),
                ToolCall::new("b", "calculator", json!({"expr": "6+7"})),
                ToolCall::new("c", "calculator", json!({"expr": "2*3"})),
            ]),
            Step::Final(json!({"value": "done"})),
        ],
    )
    .shared();
    let op = solve();
    let instance = BoundInstance::builder()
        .with_adapter(backend.clone())
        .with_tool_provider(calculator(Arc::default()))
        .with_operation(&op)
        .build()
        .unwrap();

    let out = instance
        .invoke(&op, Arguments::new().arg("problem", "mixed"))
        .await
        .unwrap();
    assert_eq!(out, "done");

    let second = &backend.contexts()[1];
    let results = &second.last_message().unwrap().tool_results;
    let summary: Vec<_> = results
        .iter()
        .map(|r| (r.call_id.as_str(), r.is_error))
        .collect();
    assert_eq!(summary, vec![("a", true), ("b", true), ("c", false)]);
    assert!(results[0].content.contains("unknown tool 'weather'"));
    assert!(results[1].content.contains("unsupported expression"));
    assert_eq!(results[2].content, "6");
}

#[tokio::test]
async fn first_registered_provider_wins_duplicate_names() {
    init_tracing();
    let lookup = |reply: &'static str| {
        ToolSet::new().with(FnTool::new(
            ToolDefinition::new("lookup", "Look something up", json!({"type": "object"})),
            move |_: Value| async move { Ok(reply.to_string()) },
        ))
    };
    let backend = ScriptedBackend::new(
        "primary",
        vec![
            Step::Tools(vec![ToolCall::new("1", "lookup", json!({}))]),
            Step::Final(json!({"value": "ok"})),
        ],
    )
    .shared();
    let op = solve();
    let instance = BoundInstance::builder()
        .with_adapter(backend.clone())
        .with_tool_provider(lookup("first"))
        .with_tool_provider(lookup("second"))
        .with_operation(&op)
        .build()
        .unwrap();

    instance
        .invoke(&op, Arguments::new().arg("problem", "dup"))
        .await
        .unwrap();

    assert_eq!(backend.advertised()[0].len(), 1);
    let second = &backend.contexts()[1];
    assert_eq!(second.last_message().unwrap().tool_results[0].content, "first");
}

#[tokio::test(start_paused = true)]
async fn usage_accumulates_across_rounds_and_retries() {
    init_tracing();
    let backend = ScriptedBackend::new(
        "primary",
        vec![
            Step::Tools(vec![ToolCall::new(
                "1",
                "calculator",
                json!({"expr": "3*3"}),
            )]),
            Step::Final(json!({"value": ""})),
            Step::Final(json!({"value": "9"})),
        ],
    )
    .with_usage(100, 10)
    .shared();
    let tracker = Arc::new(UsageTracker::new());
    let op = solve();
    let instance = BoundInstance::builder()
        .with_adapter(backend.clone())
        .with_policy(
            ResiliencePolicy::default()
                .with_retries(1)
                .with_retry_delay_ms(1)
                .with_validator(ResultValidator::typed(|s: &String| !s.is_empty())),
        )
        .with_tool_provider(calculator(Arc::default()))
        .with_listener(tracker.clone())
        .with_operation(&op)
        .build()
        .unwrap();

    let out = instance
        .invoke(&op, Arguments::new().arg("problem", "three threes"))
        .await
        .unwrap();
    assert_eq!(out, "9");
    assert_eq!(backend.calls(), 3);

    let records = tracker.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].succeeded);
    assert_eq!(records[0].usage.input_units, 300);
    assert_eq!(records[0].usage.output_units, 30);
    assert_eq!(records[0].usage.backend, "primary");
    // 300 input units at $1/M plus 30 output units at $2/M.
    assert!((records[0].usage.cost - 360.0 / 1_000_000.0).abs() < 1e-12);
}
