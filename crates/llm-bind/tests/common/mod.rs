//! Scripted backends and helpers shared by the integration tests.

#![allow(dead_code)]

use llm_bind::backend::{BackendAdapter, BackendFuture, BackendRequest, BackendResponse};
use llm_bind::context::PromptContext;
use llm_bind::tools::{ToolCall, ToolDefinition};
use llm_bind::usage::{Pricing, UsageInfo};
use llm_bind::BackendError;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll `cond` until it holds, yielding to other tasks in between.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition never held");
}

// ── ScriptedBackend ────────────────────────────────────────────────

/// Rates the scripted backend charges when reporting usage.
pub const SCRIPTED_PRICING: Pricing = Pricing::new(1.0, 2.0);

/// One scripted backend round.
#[derive(Debug, Clone)]
pub enum Step {
    Fail(&'static str),
    Final(Value),
    Tools(Vec<ToolCall>),
    /// Sleep, then answer with the value.
    Slow(Duration, Value),
}

/// Plays its steps in order, one per round-trip, then repeats the last.
pub struct ScriptedBackend {
    id: String,
    steps: Vec<Step>,
    usage: Option<(u64, u64)>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<PromptContext>>,
    advertised: Mutex<Vec<Vec<ToolDefinition>>>,
}

impl ScriptedBackend {
    pub fn new(id: &str, steps: Vec<Step>) -> Self {
        assert!(!steps.is_empty());
        Self {
            id: id.to_string(),
            steps,
            usage: None,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
            advertised: Mutex::new(Vec::new()),
        }
    }

    /// Report this much usage on every successful round.
    pub fn with_usage(mut self, input_units: u64, output_units: u64) -> Self {
        self.usage = Some((input_units, output_units));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Context seen on each round, in order.
    pub fn contexts(&self) -> Vec<PromptContext> {
        self.contexts.lock().unwrap().clone()
    }

    /// Tool definitions passed on each round, in order.
    pub fn advertised(&self) -> Vec<Vec<ToolDefinition>> {
        self.advertised.lock().unwrap().clone()
    }
}

impl BackendAdapter for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn invoke<'a>(&'a self, request: BackendRequest<'a>) -> BackendFuture<'a> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(request.context.clone());
        self.advertised.lock().unwrap().push(request.tools.to_vec());
        let step = self.steps[index.min(self.steps.len() - 1)].clone();
        let usage = self.usage.map(|(input, output)| {
            UsageInfo::priced(self.id.clone(), input, output, &SCRIPTED_PRICING)
        });

        Box::pin(async move {
            let response = match step {
                Step::Fail(message) => return Err(BackendError::new(message)),
                Step::Final(value) => BackendResponse::final_value(value),
                Step::Tools(calls) => BackendResponse::tool_calls(calls),
                Step::Slow(delay, value) => {
                    tokio::time::sleep(delay).await;
                    BackendResponse::final_value(value)
                }
            };
            Ok(match usage {
                Some(usage) => response.with_usage(usage),
                None => response,
            })
        })
    }
}

// ── GatedBackend ───────────────────────────────────────────────────

/// Holds every round until the test releases a permit, tracking how many
/// rounds are in flight at once.
pub struct GatedBackend {
    gate: Semaphore,
    answer: Value,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl GatedBackend {
    pub fn new(answer: Value) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            answer,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Let `n` waiting (or future) rounds finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl BackendAdapter for GatedBackend {
    fn id(&self) -> &str {
        "gated"
    }

    fn invoke<'a>(&'a self, _request: BackendRequest<'a>) -> BackendFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let acquired = self.gate.acquire().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            acquired
                .map_err(|_| BackendError::new("gate closed"))?
                .forget();
            Ok(BackendResponse::final_value(self.answer.clone()))
        })
    }
}
