//! Notification repository: the per-resource facade.
//!
//! Producers (resource connectors) enable categories and fire messages;
//! consumers (adapters) subscribe listeners or mailboxes. The repository owns
//! its registry, listener directory and sequence generator for the lifetime
//! of the resource.
//!
//! # Locking
//! `fire` holds the registry read lock only while copying matching entries and
//! the directory read lock only while taking a snapshot. No lock is held while
//! listeners run, so a slow listener never stalls subscribe/enable/disable.
//! Unsubscribing or disabling affects future `fire` calls only; a fan-out that
//! already took its snapshot completes with it.
//!
//! `enable_category` and `subscribe` hold a shared lifecycle gate for their
//! whole call and `close` takes it exclusively, so nothing can be added to a
//! repository once `close` has started. Connectors must not call back into
//! the repository from `open_category`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::CategoryDescriptor;
use crate::dispatch::{
    DispatchInvoker, DispatchStrategy, InvocationFailureHandler, LoggingFailureHandler, PoolConfig, TaskExecutor,
    WorkerPool,
};
use crate::error::{NotifyError, NotifyResult, ValidationError};
use crate::listener::{
    Handback, ListenerDirectory, ListenerHandle, ListenerSnapshot, NotificationFilter, SubscriptionId,
};
use crate::mailbox::Mailbox;
use crate::message::Message;
use crate::registry::{
    CategoryConnector, CategoryLifecycleSink, CategoryRegistry, EnabledCategory, FailureReporter,
    LoggingFailureReporter, NoopLifecycleSink,
};
use crate::sequence::{LocalSequence, SequenceGenerator};

/// Repository configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Capacity of mailboxes created without an explicit capacity.
    pub default_mailbox_capacity: usize,
    /// Invoker used when the builder is not given one.
    pub dispatch: DispatchStrategy,
    /// Worker pool for parallel strategies when no executor is supplied.
    pub pool: PoolConfig,
    /// Start in the suspended state.
    pub start_suspended: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_mailbox_capacity: 1024,
            dispatch: DispatchStrategy::Sequential,
            pool: PoolConfig::default(),
            start_suspended: false,
        }
    }
}

impl RepositoryConfig {
    /// Parses a JSON configuration; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the document does not parse.
    pub fn from_json_str(json: &str) -> NotifyResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            NotifyError::Validation(ValidationError::InvalidConfig {
                reason: format!("invalid repository config: {e}"),
            })
        })
    }
}

/// Builder for [`NotificationRepository`].
pub struct RepositoryBuilder {
    resource: String,
    connector: Arc<dyn CategoryConnector>,
    config: RepositoryConfig,
    sequence: Option<Arc<dyn SequenceGenerator>>,
    invoker: Option<Arc<dyn DispatchInvoker>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    failure_handler: Option<Arc<dyn InvocationFailureHandler>>,
    lifecycle: Option<Arc<dyn CategoryLifecycleSink>>,
    reporter: Option<Arc<dyn FailureReporter>>,
}

impl RepositoryBuilder {
    #[must_use]
    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Sequence generator (default: a fresh [`LocalSequence`]).
    #[must_use]
    pub fn sequence(mut self, sequence: Arc<dyn SequenceGenerator>) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Explicit invoker; overrides `config.dispatch`.
    #[must_use]
    pub fn invoker(mut self, invoker: Arc<dyn DispatchInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Executor for parallel strategies; without one a [`WorkerPool`] is started.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Handler for exception-resistant strategies (default: log).
    #[must_use]
    pub fn failure_handler(mut self, handler: Arc<dyn InvocationFailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    #[must_use]
    pub fn lifecycle_sink(mut self, sink: Arc<dyn CategoryLifecycleSink>) -> Self {
        self.lifecycle = Some(sink);
        self
    }

    #[must_use]
    pub fn failure_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Builds the repository.
    ///
    /// # Errors
    ///
    /// Validation errors for a blank resource id, or an internal error if the
    /// dispatch pool cannot be started.
    pub fn build(self) -> NotifyResult<NotificationRepository> {
        let resource = self.resource.trim().to_string();
        if resource.is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "resource identifier cannot be empty".to_string(),
            }
            .into());
        }

        let invoker = match self.invoker {
            Some(invoker) => invoker,
            None => {
                let handler = self
                    .failure_handler
                    .unwrap_or_else(|| Arc::new(LoggingFailureHandler));
                let executor = match self.executor {
                    Some(executor) => Some(executor),
                    None if self.config.dispatch.is_parallel() => {
                        let pool = WorkerPool::start(format!("kyronotify-{resource}"), &self.config.pool)?;
                        Some(Arc::new(pool) as Arc<dyn TaskExecutor>)
                    }
                    None => None,
                };
                self.config.dispatch.build(executor, handler)?
            }
        };

        let registry = CategoryRegistry::with_hooks(
            self.connector,
            self.lifecycle.unwrap_or_else(|| Arc::new(NoopLifecycleSink)),
            self.reporter.unwrap_or_else(|| Arc::new(LoggingFailureReporter)),
        );

        tracing::debug!(resource = %resource, dispatch = ?self.config.dispatch, "notify.repository.created");
        Ok(NotificationRepository {
            suspended: AtomicBool::new(self.config.start_suspended),
            resource,
            config: self.config,
            registry,
            listeners: ListenerDirectory::new(),
            sequence: self.sequence.unwrap_or_else(|| Arc::new(LocalSequence::new())),
            invoker,
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
        })
    }
}

/// Per-resource subscription and dispatch engine.
pub struct NotificationRepository {
    resource: String,
    config: RepositoryConfig,
    registry: CategoryRegistry,
    listeners: ListenerDirectory,
    sequence: Arc<dyn SequenceGenerator>,
    invoker: Arc<dyn DispatchInvoker>,
    suspended: AtomicBool,
    gate: RwLock<()>,
    closed: AtomicBool,
    dispatched: AtomicU64,
}

impl NotificationRepository {
    /// Starts building a repository for `resource`.
    #[must_use]
    pub fn builder(resource: impl Into<String>, connector: Arc<dyn CategoryConnector>) -> RepositoryBuilder {
        RepositoryBuilder {
            resource: resource.into(),
            connector,
            config: RepositoryConfig::default(),
            sequence: None,
            invoker: None,
            executor: None,
            failure_handler: None,
            lifecycle: None,
            reporter: None,
        }
    }

    /// Creates a repository with default configuration.
    ///
    /// # Errors
    ///
    /// See [`RepositoryBuilder::build`].
    pub fn new(resource: impl Into<String>, connector: Arc<dyn CategoryConnector>) -> NotifyResult<Self> {
        Self::builder(resource, connector).build()
    }

    /// Identifier of the resource this repository serves.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub const fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Shared side of the lifecycle gate; fails once the repository is closed.
    fn open_gate(&self) -> NotifyResult<RwLockReadGuard<'_, ()>> {
        let gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(NotifyError::Closed {
                resource: self.resource.clone(),
            });
        }
        Ok(gate)
    }

    // ---------------------------------------------------------------------
    // Producer side
    // ---------------------------------------------------------------------

    /// Enables `identifier` with `descriptor`. See [`CategoryRegistry::enable`].
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close); otherwise as the registry.
    pub fn enable_category(
        &self,
        identifier: &str,
        descriptor: CategoryDescriptor,
    ) -> NotifyResult<Arc<CategoryDescriptor>> {
        let _gate = self.open_gate()?;
        self.registry.enable(identifier, descriptor)
    }

    /// Disables `identifier`, returning its metadata if it was enabled.
    pub fn disable_category(&self, identifier: &str) -> Option<Arc<CategoryDescriptor>> {
        self.registry.disable(identifier)
    }

    /// Fires one event of `category`.
    ///
    /// Builds one message per enabled identifier whose descriptor names
    /// `category`; all of them share one sequence number and timestamp.
    /// Returns how many messages were dispatched.
    ///
    /// # Errors
    ///
    /// [`DispatchStrategy::Sequential`] returns the first listener failure.
    /// [`DispatchStrategy::Parallel`] returns [`NotifyError::Dispatch`] when the
    /// worker pool rejects a submission. The resistant strategies never fail.
    pub fn fire(&self, category: &str, text: impl Into<String>, payload: serde_json::Value) -> NotifyResult<usize> {
        if self.is_suspended() || self.is_closed() {
            return Ok(0);
        }

        let matching = self.registry.matching(category);
        if matching.is_empty() {
            return Ok(0);
        }

        let text = text.into();
        let messages = self.stamp(&matching, &text, &payload);
        let listeners = self.listeners.snapshot();
        self.dispatch(&messages, &listeners)
    }

    /// Starts a batch of staged messages flushed together.
    #[must_use]
    pub fn batch(&self) -> NotificationBatch<'_> {
        NotificationBatch {
            repository: self,
            staged: Vec::new(),
        }
    }

    /// Builds one message per entry with a single sequence number and timestamp.
    fn stamp<'e>(
        &self,
        entries: impl IntoIterator<Item = &'e EnabledCategory>,
        text: &str,
        payload: &serde_json::Value,
    ) -> Vec<Arc<Message>> {
        let sequence = self.sequence.next();
        let timestamp: DateTime<Utc> = Utc::now();
        entries
            .into_iter()
            .map(|entry| {
                Arc::new(Message {
                    id: Uuid::new_v4(),
                    identifier: entry.identifier().to_string(),
                    category: entry.category().to_string(),
                    source: self.resource.clone(),
                    sequence,
                    timestamp,
                    severity: entry.metadata().severity(),
                    text: text.to_string(),
                    payload: payload.clone(),
                })
            })
            .collect()
    }

    fn dispatch(&self, messages: &[Arc<Message>], listeners: &ListenerSnapshot) -> NotifyResult<usize> {
        for message in messages {
            self.dispatched.fetch_add(1, Ordering::Relaxed);
            self.invoker.invoke(message, listeners)?;
        }
        Ok(messages.len())
    }

    /// Toggles suspension without touching categories or listeners.
    pub fn set_suspended(&self, suspended: bool) {
        let previous = self.suspended.swap(suspended, Ordering::AcqRel);
        if previous != suspended {
            tracing::debug!(resource = %self.resource, suspended, "notify.repository.suspension");
        }
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Removes every category and listener. Terminal and idempotent.
    ///
    /// Waits for in-flight `enable_category`/`subscribe` calls to finish, so
    /// whatever they added is removed too.
    pub fn close(&self) {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let categories = self.registry.remove_all();
        let listeners = self.listeners.len();
        self.listeners.clear();
        tracing::debug!(resource = %self.resource, categories, listeners, "notify.repository.closed");
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Consumer side
    // ---------------------------------------------------------------------

    /// Subscribes `listener` with an optional filter and handback.
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close).
    pub fn subscribe(
        &self,
        listener: ListenerHandle,
        filter: Option<NotificationFilter>,
        handback: Option<Handback>,
    ) -> NotifyResult<SubscriptionId> {
        let _gate = self.open_gate()?;
        Ok(self.listeners.add(listener, filter, handback))
    }

    /// Removes every registration of `listener`.
    ///
    /// # Errors
    ///
    /// `ListenerNotFound` if `listener` is not subscribed.
    pub fn unsubscribe(&self, listener: &ListenerHandle) -> NotifyResult<()> {
        self.listeners.remove(listener).map(|_| ())
    }

    /// Creates and subscribes a mailbox of `capacity`.
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close).
    pub fn new_mailbox(&self, capacity: usize) -> NotifyResult<Arc<Mailbox>> {
        self.attach_mailbox(Mailbox::new(capacity))
    }

    /// Creates and subscribes a mailbox that only retains messages admitted by `filter`.
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close).
    pub fn new_filtered_mailbox(&self, filter: NotificationFilter) -> NotifyResult<Arc<Mailbox>> {
        self.attach_mailbox(Mailbox::filtered(self.config.default_mailbox_capacity, filter))
    }

    /// Creates and subscribes a mailbox scoped to one category.
    ///
    /// # Errors
    ///
    /// `Closed` after [`close`](Self::close).
    pub fn new_category_mailbox(&self, category: impl Into<String>) -> NotifyResult<Arc<Mailbox>> {
        self.attach_mailbox(Mailbox::for_category(self.config.default_mailbox_capacity, category))
    }

    fn attach_mailbox(&self, mailbox: Mailbox) -> NotifyResult<Arc<Mailbox>> {
        let mailbox = Arc::new(mailbox);
        self.subscribe(mailbox.as_listener(), None, None)?;
        Ok(mailbox)
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    /// Enabled identifiers.
    #[must_use]
    pub fn list_categories(&self) -> BTreeSet<String> {
        self.registry.all_identifiers()
    }

    /// Metadata of an enabled identifier.
    #[must_use]
    pub fn category(&self, identifier: &str) -> Option<Arc<CategoryDescriptor>> {
        self.registry.lookup(identifier)
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Messages handed to the invoker since creation.
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

impl Drop for NotificationRepository {
    fn drop(&mut self) {
        // Every enabled category gets a close_category call.
        self.close();
    }
}

impl std::fmt::Debug for NotificationRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRepository")
            .field("resource", &self.resource)
            .field("categories", &self.registry.len())
            .field("listeners", &self.listeners.len())
            .field("suspended", &self.is_suspended())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct Staged {
    category: String,
    text: String,
    payload: serde_json::Value,
}

/// Messages staged for one registry read and one listener snapshot.
///
/// Dropping a batch without [`flush`](Self::flush) discards it.
pub struct NotificationBatch<'a> {
    repository: &'a NotificationRepository,
    staged: Vec<Staged>,
}

impl NotificationBatch<'_> {
    /// Stages one event of `category`.
    pub fn stage(&mut self, category: impl Into<String>, text: impl Into<String>, payload: serde_json::Value) -> &mut Self {
        self.staged.push(Staged {
            category: category.into(),
            text: text.into(),
            payload,
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Dispatches every staged event in staging order.
    ///
    /// Each staged event gets its own sequence number. Returns how many
    /// messages were dispatched.
    ///
    /// # Errors
    ///
    /// As [`NotificationRepository::fire`].
    pub fn flush(self) -> NotifyResult<usize> {
        let repository = self.repository;
        if self.staged.is_empty() || repository.is_suspended() || repository.is_closed() {
            return Ok(0);
        }

        let enabled = repository.registry.enabled();
        let mut messages = Vec::new();
        for staged in &self.staged {
            let matching: Vec<&EnabledCategory> = enabled
                .iter()
                .filter(|e| e.metadata().matches(&staged.category))
                .collect();
            if matching.is_empty() {
                continue;
            }
            messages.extend(repository.stamp(matching, &staged.text, &staged.payload));
        }

        if messages.is_empty() {
            return Ok(0);
        }
        let listeners = repository.listeners.snapshot();
        repository.dispatch(&messages, &listeners)
    }
}
