//! The invocation dispatcher: one configuration bound to one backend.

use super::events::LifecycleListener;
use super::handle::CallHandle;
use super::operation::{Arguments, Declaration, Operation, OperationTable};
use crate::backend::BackendAdapter;
use crate::context::{ContextBuilder, DefaultContextBuilder, Interceptor, RequestDescriptor};
use crate::error::InvocationError;
use crate::memory::{MemorySnapshot, MemoryStore};
use crate::mirror::TypeAdapterRegistry;
use crate::resilience::{Admission, ResilienceExecutor, ResiliencePolicy};
use crate::tools::{ToolIndex, ToolProvider};
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::type_name;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct Inner {
    adapter: Arc<dyn BackendAdapter>,
    context_builder: Box<dyn ContextBuilder>,
    interceptors: Vec<Box<dyn Interceptor>>,
    policy: ResiliencePolicy,
    tools: ToolIndex,
    memory: MemoryStore,
    listeners: Vec<Arc<dyn LifecycleListener>>,
    registry: TypeAdapterRegistry,
    operations: OperationTable,
    admission: Admission,
}

/// A backend, policy, tools, memory and operation table wired together.
///
/// Immutable once built. Clones share the same memory store, rate limiter
/// and concurrency throttle.
#[derive(Clone)]
pub struct BoundInstance {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BoundInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundInstance")
            .field("adapter", &self.inner.adapter.id())
            .field("operations", &self.inner.operations.len())
            .field("tools", &self.inner.tools)
            .field("listeners", &self.inner.listeners.len())
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl BoundInstance {
    pub fn builder() -> BoundInstanceBuilder {
        BoundInstanceBuilder::default()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner.memory
    }

    /// Read-only copy of the memory store.
    pub fn memory_snapshot(&self) -> MemorySnapshot {
        self.inner.memory.snapshot()
    }

    pub fn registry(&self) -> &TypeAdapterRegistry {
        &self.inner.registry
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.inner.policy
    }

    pub fn operations(&self) -> &OperationTable {
        &self.inner.operations
    }

    pub fn admission(&self) -> &Admission {
        &self.inner.admission
    }

    /// Call `operation` and wait for its result.
    ///
    /// Dropping the returned future abandons the call and releases any
    /// admission it holds.
    pub async fn invoke<R: Send + 'static>(
        &self,
        operation: &Operation<R>,
        args: Arguments,
    ) -> Result<R, InvocationError> {
        self.invoke_with_cancel(operation, args, &CancellationToken::new())
            .await
    }

    /// Call `operation`, giving up with [`InvocationError::Cancelled`] as
    /// soon as `cancel` fires.
    pub async fn invoke_with_cancel<R: Send + 'static>(
        &self,
        operation: &Operation<R>,
        args: Arguments,
        cancel: &CancellationToken,
    ) -> Result<R, InvocationError> {
        let inner = &*self.inner;
        let resolved = inner.operations.get::<R>(operation.name())?;
        let parameters = args.bind(resolved, &inner.registry)?;

        let request = RequestDescriptor {
            operation: resolved.name.clone(),
            description: resolved.description.clone(),
            parameters,
            result_type: resolved.result_type.clone(),
            memory: inner.memory.snapshot(),
        };

        let mut context = inner.context_builder.build(&request);
        context.operation = request.operation.clone();
        context.tools = inner.tools.definitions().to_vec();
        let context = inner
            .interceptors
            .iter()
            .fold(context, |ctx, interceptor| interceptor.intercept(ctx));

        debug!(
            "Dispatching {} -> {} ({} parameter(s), {} tool(s))",
            request.operation,
            type_name::<R>(),
            request.parameters.len(),
            context.tools.len()
        );
        for listener in &inner.listeners {
            listener.on_start(&context);
        }

        let started = Instant::now();
        let decode = |raw: Value| (operation.decode)(&inner.registry, raw);
        let executor = ResilienceExecutor::new(&*inner.adapter, &inner.policy, &inner.admission);
        let outcome = executor
            .execute(
                context.clone(),
                &request.result_type,
                &inner.tools,
                &decode,
                cancel,
            )
            .await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(completed) => {
                if let Some(label) = &resolved.memorize {
                    inner.memory.remember(label, completed.raw.clone());
                    debug!("Memorized {} under '{label}'", request.operation);
                }
                if completed.used_fallback {
                    info!(
                        "{} answered by fallback after {} attempt(s)",
                        request.operation, completed.attempts
                    );
                }
                for listener in &inner.listeners {
                    listener.on_complete(&context, &completed.raw, duration_ms, &completed.usage);
                }
                Ok(completed.value)
            }
            Err(err) => {
                for listener in &inner.listeners {
                    listener.on_error(&context, &err, duration_ms);
                }
                Err(err)
            }
        }
    }

    /// Run `operation` on the current Tokio runtime's worker pool.
    ///
    /// Must be called from within a runtime.
    pub fn spawn<R: Send + 'static>(
        &self,
        operation: &Operation<R>,
        args: Arguments,
    ) -> CallHandle<R> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let instance = self.clone();
        let operation = operation.clone();
        let join = tokio::spawn(async move {
            instance
                .invoke_with_cancel(&operation, args, &token)
                .await
        });
        CallHandle::new(join, cancel)
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Assembles a [`BoundInstance`]. Everything but the adapter is optional.
///
/// ```ignore
/// let instance = BoundInstance::builder()
///     .with_adapter(backend)
///     .with_policy(ResiliencePolicy::default().with_retries(2))
///     .with_tool_provider(tools)
///     .with_mirror(|m: &Money| MoneyMirror::from(m), |m: MoneyMirror| m.into())
///     .with_operation(&convert)
///     .build()?;
/// ```
#[derive(Default)]
pub struct BoundInstanceBuilder {
    adapter: Option<Arc<dyn BackendAdapter>>,
    context_builder: Option<Box<dyn ContextBuilder>>,
    interceptors: Vec<Box<dyn Interceptor>>,
    policy: ResiliencePolicy,
    tool_providers: Vec<Arc<dyn ToolProvider>>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
    registry: TypeAdapterRegistry,
    mirror_conflicts: Vec<&'static str>,
    declarations: Vec<Declaration>,
}

impl BoundInstanceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: impl BackendAdapter + 'static) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    /// Replace the [`DefaultContextBuilder`].
    pub fn with_context_builder(mut self, builder: impl ContextBuilder + 'static) -> Self {
        self.context_builder = Some(Box::new(builder));
        self
    }

    /// Keep the default context builder but replace its system instructions.
    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.context_builder = Some(Box::new(DefaultContextBuilder::new().with_system(system)));
        self
    }

    /// Append an interceptor. Interceptors run in the order they are added.
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn with_policy(mut self, policy: ResiliencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_tool_provider(mut self, provider: impl ToolProvider + 'static) -> Self {
        self.tool_providers.push(Arc::new(provider));
        self
    }

    pub fn with_listener(mut self, listener: impl LifecycleListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Register external type `E` with mirror type `M`.
    ///
    /// Registering the same `E` twice fails [`build`](Self::build).
    pub fn with_mirror<E, M>(
        mut self,
        forward: impl Fn(&E) -> M + Send + Sync + 'static,
        backward: impl Fn(M) -> E + Send + Sync + 'static,
    ) -> Self
    where
        E: Send + 'static,
        M: Serialize + DeserializeOwned + JsonSchema + 'static,
    {
        if !self.registry.register(forward, backward) {
            self.mirror_conflicts.push(type_name::<E>());
        }
        self
    }

    /// Serve `operation` from the built instance.
    pub fn with_operation<R: 'static>(mut self, operation: &Operation<R>) -> Self {
        self.declarations.push(operation.declaration());
        self
    }

    pub fn build(self) -> Result<BoundInstance, InvocationError> {
        let adapter = self.adapter.ok_or_else(|| {
            InvocationError::Configuration("no backend adapter configured".into())
        })?;
        self.policy.validate()?;
        if let Some(external) = self.mirror_conflicts.first() {
            return Err(InvocationError::Configuration(format!(
                "mirror type for {external} registered twice"
            )));
        }

        let operations = OperationTable::resolve(self.declarations, &self.registry)?;
        let tools = ToolIndex::build(&self.tool_providers);
        let admission = Admission::from_policy(&self.policy);

        info!(
            "Bound instance ready: backend={}, operations={}, tools={}, mirrors={}",
            adapter.id(),
            operations.len(),
            tools.len(),
            self.registry.len()
        );

        Ok(BoundInstance {
            inner: Arc::new(Inner {
                adapter,
                context_builder: self
                    .context_builder
                    .unwrap_or_else(|| Box::new(DefaultContextBuilder::new())),
                interceptors: self.interceptors,
                policy: self.policy,
                tools,
                memory: MemoryStore::new(),
                listeners: self.listeners,
                registry: self.registry,
                operations,
                admission,
            }),
        })
    }
}
