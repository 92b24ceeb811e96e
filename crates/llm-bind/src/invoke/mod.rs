//! Declaring operations and dispatching calls to a bound instance.
//!
//! An [`Operation`] names a typed call; a [`BoundInstance`] built with that
//! operation serves it. Three calling styles share one engine:
//!
//! | Style | Entry point |
//! |-------|-------------|
//! | Await in async code | [`BoundInstance::invoke`], [`BoundInstance::invoke_with_cancel`] |
//! | Spawn and join or cancel later | [`BoundInstance::spawn`] → [`CallHandle`] |
//! | Block from sync code | [`BlockingInvoker::call`], [`BlockingInvoker::submit`] |

pub mod events;
pub mod handle;
pub mod instance;
pub mod operation;

pub use events::{CallRecord, LifecycleListener, LoggingListener, UsageTracker};
pub use handle::{BlockingInvoker, CallHandle};
pub use instance::{BoundInstance, BoundInstanceBuilder};
pub use operation::{Arguments, Operation, OperationTable, ParameterSpec, ResolvedOperation};
