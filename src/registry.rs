//! Category registry: which categories are enabled, and with what configuration.
//!
//! The registry owns the enable/disable/reconfigure protocol. Every mutation
//! runs under the write lock for its whole critical section, including the
//! connector's open/close callbacks, so no reader ever observes a half-updated
//! entry and no two threads open or close the same identifier concurrently.
//!
//! Lifecycle sinks and failure reporters are also invoked under the write
//! lock. They must not call back into the registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crossbeam_channel::{Sender, TrySendError};

use crate::category::{CategoryDescriptor, Fingerprint};
use crate::error::{ConnectorError, NotifyError, NotifyResult, ValidationError};

/// Maximum accepted length of a category identifier.
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Resource-specific callbacks that bring a category to life.
///
/// Implemented by the connector that understands what a category means for
/// its resource (which counters to poll, which log to tail, ...).
pub trait CategoryConnector: Send + Sync {
    /// Opens `identifier` for `descriptor` and returns the live metadata.
    ///
    /// The returned descriptor is what `enable` hands back to callers; a
    /// connector may enrich it (e.g. with a description) or return it as is.
    fn open_category(
        &self,
        identifier: &str,
        descriptor: CategoryDescriptor,
    ) -> Result<CategoryDescriptor, ConnectorError>;

    /// Releases whatever `open_category` acquired. Best effort.
    fn close_category(&self, identifier: &str, metadata: &CategoryDescriptor) -> Result<(), ConnectorError>;
}

/// Connector that accepts every category and holds no resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughConnector;

impl CategoryConnector for PassthroughConnector {
    fn open_category(
        &self,
        _identifier: &str,
        descriptor: CategoryDescriptor,
    ) -> Result<CategoryDescriptor, ConnectorError> {
        Ok(descriptor)
    }

    fn close_category(&self, _identifier: &str, _metadata: &CategoryDescriptor) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Category-added / category-removed lifecycle event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum CategoryLifecycleEvent {
    Added {
        identifier: String,
        metadata: Arc<CategoryDescriptor>,
    },
    Removed {
        identifier: String,
        metadata: Arc<CategoryDescriptor>,
    },
}

impl CategoryLifecycleEvent {
    /// Identifier the event refers to.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Added { identifier, .. } | Self::Removed { identifier, .. } => identifier,
        }
    }

    #[must_use]
    pub const fn is_added(&self) -> bool {
        matches!(self, Self::Added { .. })
    }
}

/// Receiver of category lifecycle events.
pub trait CategoryLifecycleSink: Send + Sync {
    /// Called once per added or removed category.
    fn on_category_event(&self, event: &CategoryLifecycleEvent);
}

/// Discards lifecycle events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLifecycleSink;

impl CategoryLifecycleSink for NoopLifecycleSink {
    fn on_category_event(&self, _event: &CategoryLifecycleEvent) {}
}

impl CategoryLifecycleSink for Sender<CategoryLifecycleEvent> {
    fn on_category_event(&self, event: &CategoryLifecycleEvent) {
        // Never block the registry on a slow management consumer.
        if let Err(TrySendError::Full(event)) = self.try_send(event.clone()) {
            tracing::warn!(
                identifier = event.identifier(),
                added = event.is_added(),
                "notify.category.lifecycle_dropped"
            );
        }
    }
}

/// Reporting hook for connector failures.
pub trait FailureReporter: Send + Sync {
    /// The connector refused to open `identifier`.
    fn report_enable_failure(&self, identifier: &str, cause: &ConnectorError);

    /// The connector failed to close `identifier`; bookkeeping already completed.
    fn report_close_failure(&self, identifier: &str, cause: &ConnectorError) {
        tracing::warn!(identifier, error = %cause, "notify.category.close_failed");
    }
}

/// Reports connector failures through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFailureReporter;

impl FailureReporter for LoggingFailureReporter {
    fn report_enable_failure(&self, identifier: &str, cause: &ConnectorError) {
        tracing::error!(identifier, error = %cause, "notify.category.enable_failed");
    }
}

/// A registry entry.
#[derive(Debug, Clone)]
pub struct EnabledCategory {
    identifier: String,
    metadata: Arc<CategoryDescriptor>,
    fingerprint: Fingerprint,
}

impl EnabledCategory {
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Live metadata returned by the connector.
    #[must_use]
    pub const fn metadata(&self) -> &Arc<CategoryDescriptor> {
        &self.metadata
    }

    /// Fingerprint of the descriptor the category was enabled with.
    #[must_use]
    pub const fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Category name messages are matched on.
    #[must_use]
    pub fn category(&self) -> &str {
        self.metadata.category()
    }
}

fn validate_identifier(identifier: &str) -> Result<&str, ValidationError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(ValidationError::EmptyIdentifier);
    }
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "identifier".to_string(),
            max_length: MAX_IDENTIFIER_LEN,
        });
    }
    Ok(identifier)
}

/// Per-resource map from identifier to enabled category.
pub struct CategoryRegistry {
    connector: Arc<dyn CategoryConnector>,
    lifecycle: Arc<dyn CategoryLifecycleSink>,
    reporter: Arc<dyn FailureReporter>,
    entries: RwLock<HashMap<String, EnabledCategory>>,
}

impl CategoryRegistry {
    /// Creates an empty registry with no lifecycle sink and logging failure reports.
    #[must_use]
    pub fn new(connector: Arc<dyn CategoryConnector>) -> Self {
        Self::with_hooks(connector, Arc::new(NoopLifecycleSink), Arc::new(LoggingFailureReporter))
    }

    /// Creates an empty registry with explicit hooks.
    #[must_use]
    pub fn with_hooks(
        connector: Arc<dyn CategoryConnector>,
        lifecycle: Arc<dyn CategoryLifecycleSink>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        Self {
            connector,
            lifecycle,
            reporter,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, EnabledCategory>> {
        // Entries are only inserted after callbacks succeed, so a poisoned map is still consistent.
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, EnabledCategory>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enables `identifier` with `descriptor`.
    ///
    /// - Absent: opens the category, stores it, emits `Added`
    /// - Present with an equal fingerprint: returns the existing metadata, no events
    /// - Present with a different fingerprint: emits `Removed`, closes the old
    ///   entry, then opens and stores the new one and emits `Added`
    ///
    /// # Errors
    ///
    /// `Validation` for a bad identifier. `EnableFailure` when the connector
    /// rejects the category; the failure is also sent to the reporter and the
    /// identifier is left without an entry.
    pub fn enable(&self, identifier: &str, descriptor: CategoryDescriptor) -> NotifyResult<Arc<CategoryDescriptor>> {
        let identifier = validate_identifier(identifier)?;
        let fingerprint = descriptor.fingerprint();

        let mut entries = self.write();
        if let Some(existing) = entries.get(identifier) {
            if existing.fingerprint == fingerprint {
                return Ok(Arc::clone(&existing.metadata));
            }
        }

        if let Some(previous) = entries.remove(identifier) {
            tracing::debug!(
                identifier,
                old = %previous.fingerprint,
                new = %fingerprint,
                "notify.category.reconfigure"
            );
            self.retire(&previous);
        }

        let metadata = match self.connector.open_category(identifier, descriptor) {
            Ok(metadata) => Arc::new(metadata),
            Err(cause) => {
                self.reporter.report_enable_failure(identifier, &cause);
                return Err(NotifyError::EnableFailure {
                    identifier: identifier.to_string(),
                    source: cause,
                });
            }
        };

        entries.insert(
            identifier.to_string(),
            EnabledCategory {
                identifier: identifier.to_string(),
                metadata: Arc::clone(&metadata),
                fingerprint,
            },
        );
        tracing::debug!(identifier, category = metadata.category(), "notify.category.added");
        self.lifecycle.on_category_event(&CategoryLifecycleEvent::Added {
            identifier: identifier.to_string(),
            metadata: Arc::clone(&metadata),
        });

        Ok(metadata)
    }

    /// Disables `identifier`, returning its metadata if it was enabled.
    pub fn disable(&self, identifier: &str) -> Option<Arc<CategoryDescriptor>> {
        let identifier = identifier.trim();
        let mut entries = self.write();
        let removed = entries.remove(identifier)?;
        self.retire(&removed);
        Some(removed.metadata)
    }

    /// Emits `Removed` for an entry already taken out of the map, then closes it.
    fn retire(&self, entry: &EnabledCategory) {
        tracing::debug!(identifier = %entry.identifier, category = entry.category(), "notify.category.removed");
        self.lifecycle.on_category_event(&CategoryLifecycleEvent::Removed {
            identifier: entry.identifier.clone(),
            metadata: Arc::clone(&entry.metadata),
        });
        if let Err(cause) = self.connector.close_category(&entry.identifier, &entry.metadata) {
            self.reporter.report_close_failure(&entry.identifier, &cause);
        }
    }

    /// Closes and removes every entry. Returns how many were removed.
    pub fn remove_all(&self) -> usize {
        let mut entries = self.write();
        let drained: Vec<EnabledCategory> = entries.drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            self.retire(entry);
        }
        drained.len()
    }

    /// Metadata for `identifier`, if enabled.
    #[must_use]
    pub fn lookup(&self, identifier: &str) -> Option<Arc<CategoryDescriptor>> {
        self.read().get(identifier.trim()).map(|e| Arc::clone(&e.metadata))
    }

    /// Snapshot of all enabled identifiers.
    #[must_use]
    pub fn all_identifiers(&self) -> BTreeSet<String> {
        self.read().keys().cloned().collect()
    }

    /// Copies every entry whose category name equals `category`, ordered by identifier.
    #[must_use]
    pub fn matching(&self, category: &str) -> Vec<EnabledCategory> {
        let mut matching: Vec<EnabledCategory> = self
            .read()
            .values()
            .filter(|e| e.metadata.matches(category))
            .cloned()
            .collect();
        matching.sort_unstable_by(|a, b| a.identifier.cmp(&b.identifier));
        matching
    }

    /// Copies every entry, ordered by identifier.
    #[must_use]
    pub fn enabled(&self) -> Vec<EnabledCategory> {
        let mut enabled: Vec<EnabledCategory> = self.read().values().cloned().collect();
        enabled.sort_unstable_by(|a, b| a.identifier.cmp(&b.identifier));
        enabled
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl std::fmt::Debug for CategoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryRegistry")
            .field("identifiers", &self.all_identifiers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crossbeam_channel::{unbounded, Receiver};

    use crate::category::Severity;

    /// Connector that records calls and can be told to reject a category name.
    #[derive(Default)]
    struct RecordingConnector {
        opened: AtomicUsize,
        closed: Mutex<Vec<String>>,
        reject: Option<String>,
        fail_close: bool,
    }

    impl CategoryConnector for RecordingConnector {
        fn open_category(
            &self,
            _identifier: &str,
            descriptor: CategoryDescriptor,
        ) -> Result<CategoryDescriptor, ConnectorError> {
            if self.reject.as_deref() == Some(descriptor.category()) {
                return Err(ConnectorError::Unsupported {
                    category: descriptor.category().to_string(),
                });
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(descriptor)
        }

        fn close_category(&self, identifier: &str, _metadata: &CategoryDescriptor) -> Result<(), ConnectorError> {
            self.closed.lock().unwrap().push(identifier.to_string());
            if self.fail_close {
                return Err(ConnectorError::backend("device gone"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        enable_failures: Mutex<Vec<(String, ConnectorError)>>,
        close_failures: Mutex<Vec<String>>,
    }

    impl FailureReporter for RecordingReporter {
        fn report_enable_failure(&self, identifier: &str, cause: &ConnectorError) {
            self.enable_failures
                .lock()
                .unwrap()
                .push((identifier.to_string(), cause.clone()));
        }

        fn report_close_failure(&self, identifier: &str, _cause: &ConnectorError) {
            self.close_failures.lock().unwrap().push(identifier.to_string());
        }
    }

    struct Fixture {
        registry: CategoryRegistry,
        connector: Arc<RecordingConnector>,
        reporter: Arc<RecordingReporter>,
        events: Receiver<CategoryLifecycleEvent>,
    }

    fn fixture(connector: RecordingConnector) -> Fixture {
        let connector = Arc::new(connector);
        let reporter = Arc::new(RecordingReporter::default());
        let (tx, events) = unbounded();
        let registry = CategoryRegistry::with_hooks(
            Arc::clone(&connector) as Arc<dyn CategoryConnector>,
            Arc::new(tx),
            Arc::clone(&reporter) as Arc<dyn FailureReporter>,
        );
        Fixture {
            registry,
            connector,
            reporter,
            events,
        }
    }

    fn descriptor(category: &str, threshold: f64) -> CategoryDescriptor {
        CategoryDescriptor::builder(category)
            .severity(Severity::Warning)
            .option("threshold", threshold)
            .build()
            .unwrap()
    }

    #[test]
    fn enable_is_idempotent_for_equal_fingerprint() {
        let fx = fixture(RecordingConnector::default());
        let first = fx.registry.enable("cpu-alerts", descriptor("cpu.load", 0.9)).unwrap();
        assert!(fx.events.try_recv().unwrap().is_added());

        let second = fx.registry.enable("cpu-alerts", descriptor("cpu.load", 0.9)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(fx.events.try_recv().is_err(), "no lifecycle events on idempotent enable");
        assert_eq!(fx.connector.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reconfigure_emits_removed_then_added() {
        let fx = fixture(RecordingConnector::default());
        fx.registry.enable("cpu-alerts", descriptor("cpu.load", 0.9)).unwrap();
        let _ = fx.events.try_recv().unwrap();

        let updated = fx.registry.enable("cpu-alerts", descriptor("cpu.load", 0.5)).unwrap();
        let removed = fx.events.try_recv().unwrap();
        let added = fx.events.try_recv().unwrap();
        assert!(matches!(removed, CategoryLifecycleEvent::Removed { .. }));
        assert!(added.is_added());
        assert!(fx.events.try_recv().is_err());

        assert_eq!(fx.registry.len(), 1);
        assert_eq!(fx.registry.lookup("cpu-alerts"), Some(updated));
        assert_eq!(fx.connector.closed.lock().unwrap().as_slice(), ["cpu-alerts"]);
    }

    #[test]
    fn enable_failure_is_reported_and_leaves_no_entry() {
        let fx = fixture(RecordingConnector {
            reject: Some("gpu.temp".to_string()),
            ..RecordingConnector::default()
        });

        let err = fx.registry.enable("gpu", CategoryDescriptor::new("gpu.temp").unwrap()).unwrap_err();
        assert!(err.is_enable_failure());
        assert!(fx.registry.lookup("gpu").is_none());
        assert!(fx.events.try_recv().is_err());

        let failures = fx.reporter.enable_failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "gpu");
    }

    #[test]
    fn enable_rejects_blank_identifier() {
        let fx = fixture(RecordingConnector::default());
        let err = fx.registry.enable("   ", descriptor("cpu.load", 0.1)).unwrap_err();
        assert!(matches!(err, NotifyError::Validation(ValidationError::EmptyIdentifier)));
        assert_eq!(fx.connector.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disable_returns_metadata_once() {
        let fx = fixture(RecordingConnector::default());
        let meta = fx.registry.enable("cpu-alerts", descriptor("cpu.load", 0.9)).unwrap();
        let _ = fx.events.try_recv();

        assert_eq!(fx.registry.disable("cpu-alerts"), Some(meta));
        assert!(matches!(
            fx.events.try_recv().unwrap(),
            CategoryLifecycleEvent::Removed { .. }
        ));
        assert!(fx.registry.disable("cpu-alerts").is_none());
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn close_failure_is_reported_but_entry_is_removed() {
        let fx = fixture(RecordingConnector {
            fail_close: true,
            ..RecordingConnector::default()
        });
        fx.registry.enable("disk", descriptor("disk.usage", 0.8)).unwrap();
        assert!(fx.registry.disable("disk").is_some());
        assert!(fx.registry.lookup("disk").is_none());
        assert_eq!(fx.reporter.close_failures.lock().unwrap().as_slice(), ["disk"]);
    }

    #[test]
    fn full_lifecycle_channel_does_not_fail_enable() {
        let (tx, events) = crossbeam_channel::bounded(1);
        let registry = CategoryRegistry::with_hooks(
            Arc::new(RecordingConnector::default()),
            Arc::new(tx),
            Arc::new(RecordingReporter::default()),
        );
        registry.enable("hot", descriptor("cpu.load", 0.9)).unwrap();
        registry.enable("disk", descriptor("disk.usage", 0.8)).unwrap();

        assert_eq!(registry.enabled().len(), 2);
        let queued: Vec<CategoryLifecycleEvent> = events.try_iter().collect();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].identifier(), "hot");
    }

    #[test]
    fn several_identifiers_share_one_category() {
        let fx = fixture(RecordingConnector::default());
        fx.registry.enable("hot", descriptor("cpu.load", 0.9)).unwrap();
        fx.registry.enable("warm", descriptor("cpu.load", 0.5)).unwrap();
        fx.registry.enable("disk", descriptor("disk.usage", 0.5)).unwrap();

        let mut ids: Vec<String> = fx
            .registry
            .matching("cpu.load")
            .iter()
            .map(|e| e.identifier().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, ["hot", "warm"]);
        assert!(fx.registry.matching("net.rx").is_empty());
    }

    #[test]
    fn remove_all_is_idempotent() {
        let fx = fixture(RecordingConnector::default());
        fx.registry.enable("a", descriptor("cpu.load", 0.1)).unwrap();
        fx.registry.enable("b", descriptor("cpu.load", 0.2)).unwrap();
        while fx.events.try_recv().is_ok() {}

        assert_eq!(fx.registry.remove_all(), 2);
        assert_eq!(fx.events.try_iter().filter(|e| !e.is_added()).count(), 2);
        assert_eq!(fx.registry.remove_all(), 0);
        assert!(fx.registry.all_identifiers().is_empty());
        assert_eq!(fx.connector.closed.lock().unwrap().len(), 2);
    }
}
