//! Dispatch subsystem: how one message reaches many listeners.

/// Invocation strategies.
pub mod invoker;
/// Task executors for parallel strategies.
pub mod pool;

pub use invoker::{
    DispatchInvoker, DispatchStrategy, InvocationFailure, InvocationFailureHandler, LoggingFailureHandler,
    ParallelInvoker, ResistantParallelInvoker, ResistantSequentialInvoker, SequentialInvoker,
};
pub use pool::{PoolConfig, Task, TaskExecutor, WorkerPool};
