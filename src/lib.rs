//! # kyronotify - per-resource notification subscription and dispatch
//!
//! `kyronotify` sits between a *resource connector* (a producer of domain
//! events: metrics thresholds, state changes, alarms) and *adapters* (any
//! number of consumers). Each resource owns one [`NotificationRepository`].
//!
//! ## Core Concepts
//!
//! - **Category**: a named kind of event plus options, enabled under a
//!   caller-chosen identifier ([`CategoryDescriptor`])
//! - **Message**: one immutable, sequence-stamped event ([`Message`])
//! - **Listener**: a subscriber invoked for every fired message
//!   ([`NotificationListener`])
//! - **Mailbox**: a bounded, drop-on-full queue drained by polling ([`Mailbox`])
//! - **Dispatch strategy**: sequential or parallel, fail-fast or
//!   exception-resistant ([`DispatchStrategy`])
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use kyronotify::{CategoryDescriptor, NotificationRepository, PassthroughConnector, Severity};
//!
//! let repo = NotificationRepository::new("host-1", Arc::new(PassthroughConnector))?;
//! repo.enable_category(
//!     "cpu-high",
//!     CategoryDescriptor::builder("cpu.load")
//!         .severity(Severity::Warning)
//!         .option("threshold", 0.9)
//!         .build()?,
//! )?;
//!
//! let mailbox = repo.new_mailbox(64)?;
//! repo.fire("cpu.load", "load above threshold", serde_json::json!({ "load": 0.95 }))?;
//!
//! let message = mailbox.poll().expect("delivered");
//! assert_eq!(message.identifier, "cpu-high");
//! assert_eq!(message.sequence, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod category;
pub mod error;
pub mod message;
pub mod value;

// Subscription and dispatch
pub mod dispatch;
pub mod listener;
pub mod mailbox;
pub mod registry;
pub mod repository;
pub mod sequence;

pub use category::{CategoryDescriptor, CategoryDescriptorBuilder, Fingerprint, Severity};
pub use dispatch::{
    DispatchInvoker, DispatchStrategy, InvocationFailure, InvocationFailureHandler, LoggingFailureHandler,
    ParallelInvoker, PoolConfig, ResistantParallelInvoker, ResistantSequentialInvoker, SequentialInvoker,
    TaskExecutor, WorkerPool,
};
pub use error::{ConnectorError, DispatchError, ListenerError, NotifyError, NotifyResult, ValidationError};
pub use listener::{
    FnListener, Handback, ListenerDirectory, ListenerHandle, ListenerRegistration, NotificationFilter,
    NotificationListener, SubscriptionId,
};
pub use mailbox::Mailbox;
pub use message::Message;
pub use registry::{
    CategoryConnector, CategoryLifecycleEvent, CategoryLifecycleSink, CategoryRegistry, EnabledCategory,
    FailureReporter, LoggingFailureReporter, NoopLifecycleSink, PassthroughConnector,
};
pub use repository::{NotificationBatch, NotificationRepository, RepositoryBuilder, RepositoryConfig};
pub use sequence::{ClusterSequence, CounterService, InMemoryCounterService, LocalSequence, SequenceGenerator};
pub use value::OptionValue;
