//! Listener invocation strategies.
//!
//! A [`DispatchInvoker`] fans one message out to a listener snapshot. The
//! repository never calls listeners directly; it always goes through a
//! snapshot and an invoker, so the concurrency policy can change per use site
//! without touching registry code.
//!
//! | strategy | order | listener failure |
//! |---|---|---|
//! | [`SequentialInvoker`] | registration order, caller thread | aborts the fan-out, returned from `fire` |
//! | [`ResistantSequentialInvoker`] | registration order, caller thread | routed to handler, fan-out continues |
//! | [`ParallelInvoker`] | unspecified, worker pool | isolated, logged; a rejected submission is returned from `fire` |
//! | [`ResistantParallelInvoker`] | unspecified, worker pool | isolated, routed to handler |

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, ListenerError, NotifyError, NotifyResult};
use crate::listener::{ListenerHandle, ListenerRegistration, ListenerSnapshot, SubscriptionId};
use crate::message::Message;

use super::pool::TaskExecutor;

/// Fans a message out to a set of listeners.
pub trait DispatchInvoker: Send + Sync {
    /// Delivers `message` to every registration in `listeners` whose filter admits it.
    ///
    /// # Errors
    ///
    /// Only strategies that let listener failures propagate return an error.
    fn invoke(&self, message: &Arc<Message>, listeners: &ListenerSnapshot) -> NotifyResult<()>;
}

/// A listener failure captured during dispatch.
#[derive(Clone)]
pub struct InvocationFailure {
    /// Name of the thread the listener ran on.
    pub thread: String,
    /// The failing listener.
    pub listener: ListenerHandle,
    pub subscription: SubscriptionId,
    /// Sequence number of the message being delivered.
    pub sequence: u64,
    pub error: ListenerError,
}

impl InvocationFailure {
    fn new(registration: &ListenerRegistration, message: &Message, error: ListenerError) -> Self {
        Self {
            thread: thread::current().name().unwrap_or("<unnamed>").to_string(),
            listener: Arc::clone(registration.listener()),
            subscription: registration.id(),
            sequence: message.sequence,
            error,
        }
    }

    /// Name of the failing listener.
    #[must_use]
    pub fn listener_name(&self) -> &str {
        self.listener.name()
    }
}

impl std::fmt::Debug for InvocationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationFailure")
            .field("thread", &self.thread)
            .field("listener", &self.listener.name())
            .field("subscription", &self.subscription)
            .field("sequence", &self.sequence)
            .field("error", &self.error)
            .finish()
    }
}

/// Receives listener failures from exception-resistant strategies.
pub trait InvocationFailureHandler: Send + Sync {
    /// Called once per failed delivery, on the thread that ran the listener.
    fn on_failure(&self, failure: InvocationFailure);
}

/// Logs listener failures at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFailureHandler;

impl InvocationFailureHandler for LoggingFailureHandler {
    fn on_failure(&self, failure: InvocationFailure) {
        tracing::warn!(
            thread = %failure.thread,
            listener = failure.listener_name(),
            subscription = %failure.subscription,
            sequence = failure.sequence,
            error = %failure.error,
            "notify.listener.failed"
        );
    }
}

impl InvocationFailureHandler for Sender<InvocationFailure> {
    fn on_failure(&self, failure: InvocationFailure) {
        // Never block a dispatch on a slow failure consumer.
        if let Err(TrySendError::Full(failure)) = self.try_send(failure) {
            tracing::warn!(
                listener = failure.listener_name(),
                sequence = failure.sequence,
                "notify.listener.failure_dropped"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload.downcast_ref::<&str>().map_or_else(
        || {
            payload
                .downcast_ref::<String>()
                .map_or_else(|| "unknown panic".to_string(), ToString::to_string)
        },
        |s| (*s).to_string(),
    )
}

/// Applies the filter and delivers, converting panics into `ListenerError::Panicked`.
fn deliver_guarded(registration: &ListenerRegistration, message: &Message) -> Result<(), ListenerError> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if registration.accepts(message) {
            registration.deliver(message)
        } else {
            Ok(())
        }
    }));
    outcome.unwrap_or_else(|payload| {
        Err(ListenerError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    })
}

/// Delivers in registration order on the calling thread; the first failure aborts.
///
/// Listener panics unwind through `fire`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialInvoker;

impl DispatchInvoker for SequentialInvoker {
    fn invoke(&self, message: &Arc<Message>, listeners: &ListenerSnapshot) -> NotifyResult<()> {
        tracing::trace!(sequence = message.sequence, listeners = listeners.len(), "notify.dispatch.sequential");
        for registration in listeners.iter() {
            if !registration.accepts(message) {
                continue;
            }
            registration
                .deliver(message)
                .map_err(|source| NotifyError::ListenerInvocation {
                    listener: registration.listener().name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Delivers in registration order on the calling thread; failures go to a handler.
pub struct ResistantSequentialInvoker {
    handler: Arc<dyn InvocationFailureHandler>,
}

impl ResistantSequentialInvoker {
    #[must_use]
    pub fn new(handler: Arc<dyn InvocationFailureHandler>) -> Self {
        Self { handler }
    }
}

impl Default for ResistantSequentialInvoker {
    fn default() -> Self {
        Self::new(Arc::new(LoggingFailureHandler))
    }
}

impl DispatchInvoker for ResistantSequentialInvoker {
    fn invoke(&self, message: &Arc<Message>, listeners: &ListenerSnapshot) -> NotifyResult<()> {
        tracing::trace!(sequence = message.sequence, listeners = listeners.len(), "notify.dispatch.resistant");
        for registration in listeners.iter() {
            if let Err(error) = deliver_guarded(registration, message) {
                self.handler.on_failure(InvocationFailure::new(registration, message, error));
            }
        }
        Ok(())
    }
}

/// Submits one task per registration; each failure stays with its own task.
///
/// Rejected submissions are reported to `handler` and the remaining listeners
/// are still submitted. Returns the first rejection.
fn fan_out(
    executor: &Arc<dyn TaskExecutor>,
    handler: &Arc<dyn InvocationFailureHandler>,
    message: &Arc<Message>,
    listeners: &ListenerSnapshot,
) -> Option<DispatchError> {
    let mut first_rejection = None;
    for registration in listeners.iter() {
        let task_registration = registration.clone();
        let task_message = Arc::clone(message);
        let task_handler = Arc::clone(handler);
        let submitted = executor.submit(Box::new(move || {
            if let Err(error) = deliver_guarded(&task_registration, &task_message) {
                task_handler.on_failure(InvocationFailure::new(&task_registration, &task_message, error));
            }
        }));

        if let Err(rejected) = submitted {
            handler.on_failure(InvocationFailure::new(
                registration,
                message,
                ListenerError::Rejected {
                    reason: rejected.to_string(),
                },
            ));
            first_rejection.get_or_insert(rejected);
        }
    }
    first_rejection
}

/// Delivers through a task executor; failures are isolated and logged.
///
/// If the executor rejects a submission (e.g. its queue is full) the first
/// rejection is returned as [`NotifyError::Dispatch`] after every other
/// listener has been submitted.
pub struct ParallelInvoker {
    executor: Arc<dyn TaskExecutor>,
    handler: Arc<dyn InvocationFailureHandler>,
}

impl ParallelInvoker {
    #[must_use]
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            executor,
            handler: Arc::new(LoggingFailureHandler),
        }
    }
}

impl DispatchInvoker for ParallelInvoker {
    fn invoke(&self, message: &Arc<Message>, listeners: &ListenerSnapshot) -> NotifyResult<()> {
        tracing::trace!(sequence = message.sequence, listeners = listeners.len(), "notify.dispatch.parallel");
        match fan_out(&self.executor, &self.handler, message, listeners) {
            Some(rejected) => Err(NotifyError::Dispatch(rejected)),
            None => Ok(()),
        }
    }
}

/// Delivers through a task executor; failures are isolated and routed to a handler.
pub struct ResistantParallelInvoker {
    executor: Arc<dyn TaskExecutor>,
    handler: Arc<dyn InvocationFailureHandler>,
}

impl ResistantParallelInvoker {
    #[must_use]
    pub fn new(executor: Arc<dyn TaskExecutor>, handler: Arc<dyn InvocationFailureHandler>) -> Self {
        Self { executor, handler }
    }
}

impl DispatchInvoker for ResistantParallelInvoker {
    fn invoke(&self, message: &Arc<Message>, listeners: &ListenerSnapshot) -> NotifyResult<()> {
        tracing::trace!(sequence = message.sequence, listeners = listeners.len(), "notify.dispatch.parallel");
        // Rejections already reached the handler.
        let _ = fan_out(&self.executor, &self.handler, message, listeners);
        Ok(())
    }
}

/// Invoker selection for configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    #[default]
    Sequential,
    Parallel,
    ResistantSequential,
    ResistantParallel,
}

impl DispatchStrategy {
    /// Returns true if this strategy needs a task executor.
    #[must_use]
    pub const fn is_parallel(self) -> bool {
        matches!(self, Self::Parallel | Self::ResistantParallel)
    }

    /// Builds the invoker for this strategy.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a parallel strategy has no executor.
    pub fn build(
        self,
        executor: Option<Arc<dyn TaskExecutor>>,
        handler: Arc<dyn InvocationFailureHandler>,
    ) -> NotifyResult<Arc<dyn DispatchInvoker>> {
        let needs_executor = || {
            NotifyError::from(crate::error::ValidationError::InvalidConfig {
                reason: "parallel dispatch requires a task executor".to_string(),
            })
        };
        Ok(match self {
            Self::Sequential => Arc::new(SequentialInvoker),
            Self::ResistantSequential => Arc::new(ResistantSequentialInvoker::new(handler)),
            Self::Parallel => Arc::new(ParallelInvoker::new(executor.ok_or_else(needs_executor)?)),
            Self::ResistantParallel => Arc::new(ResistantParallelInvoker::new(
                executor.ok_or_else(needs_executor)?,
                handler,
            )),
        })
    }
}
