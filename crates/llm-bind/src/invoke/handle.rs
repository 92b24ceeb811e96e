//! Handle-based and blocking call styles over the async engine.

use super::instance::BoundInstance;
use super::operation::{Arguments, Operation};
use crate::error::InvocationError;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A call running on a Tokio worker pool.
///
/// Dropping the handle detaches the call; it keeps running to completion.
/// Use [`cancel`](Self::cancel) to stop it.
#[derive(Debug)]
pub struct CallHandle<R> {
    join: JoinHandle<Result<R, InvocationError>>,
    cancel: CancellationToken,
}

impl<R> CallHandle<R> {
    pub(crate) fn new(join: JoinHandle<Result<R, InvocationError>>, cancel: CancellationToken) -> Self {
        Self { join, cancel }
    }

    /// Request cancellation. The call resolves to
    /// [`InvocationError::Cancelled`] at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the call's result.
    pub async fn join(self) -> Result<R, InvocationError> {
        self.join.await?
    }

    /// Block the current thread until the call finishes.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> Result<R, InvocationError> {
        futures::executor::block_on(self.join())
    }
}

/// Blocking front end for callers outside async code.
///
/// Owns a multi-threaded runtime and runs every call on it.
///
/// ```ignore
/// let invoker = BlockingInvoker::new(instance)?;
/// let summary = invoker.call(&summarize, Arguments::new().arg("text", text))?;
/// ```
#[derive(Debug)]
pub struct BlockingInvoker {
    runtime: Runtime,
    instance: BoundInstance,
}

impl BlockingInvoker {
    pub fn new(instance: BoundInstance) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("llm-bind-worker")
            .build()?;
        Ok(Self { runtime, instance })
    }

    pub fn with_worker_threads(instance: BoundInstance, threads: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .enable_all()
            .thread_name("llm-bind-worker")
            .build()?;
        Ok(Self { runtime, instance })
    }

    pub fn instance(&self) -> &BoundInstance {
        &self.instance
    }

    /// Run `operation` and block until it finishes.
    pub fn call<R: Send + 'static>(
        &self,
        operation: &Operation<R>,
        args: Arguments,
    ) -> Result<R, InvocationError> {
        self.runtime.block_on(self.instance.invoke(operation, args))
    }

    /// Start `operation` without blocking.
    pub fn submit<R: Send + 'static>(
        &self,
        operation: &Operation<R>,
        args: Arguments,
    ) -> CallHandle<R> {
        let _guard = self.runtime.enter();
        self.instance.spawn(operation, args)
    }
}
