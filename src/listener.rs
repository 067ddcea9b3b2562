//! Listener capability and the per-resource listener directory.
//!
//! Listeners are held by strong reference. The directory never decides when a
//! listener goes away: callers must `unsubscribe` before disposing of one, or
//! the registration (and whatever it captures) stays alive with the repository.

use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ListenerError, NotifyError, NotifyResult};
use crate::message::Message;

/// Consumer of dispatched messages.
pub trait NotificationListener: Send + Sync {
    /// Handles one message. `handback` is the value supplied at subscription.
    ///
    /// # Errors
    ///
    /// A returned error is a listener invocation failure; what happens next is
    /// decided by the dispatch strategy in use.
    fn handle_notification(&self, message: &Message, handback: Option<&Handback>) -> Result<(), ListenerError>;

    /// Human-readable name (for logs and failure reports).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle to a listener. Identity is the pointed-to allocation.
pub type ListenerHandle = Arc<dyn NotificationListener>;

/// Opaque value handed back to the listener with every message.
pub type Handback = Arc<dyn Any + Send + Sync>;

/// Predicate deciding whether a registration receives a message.
pub type NotificationFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Returns true if both handles refer to the same listener.
#[must_use]
pub fn same_listener(a: &ListenerHandle, b: &ListenerHandle) -> bool {
    // Compare data pointers only; vtable pointers are not unique per type.
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Adapts a closure into a [`NotificationListener`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use kyronotify::{FnListener, ListenerHandle};
///
/// let printer: ListenerHandle = Arc::new(FnListener::new("printer", |msg, _| {
///     println!("{}: {}", msg.sequence, msg.text);
///     Ok(())
/// }));
/// assert_eq!(printer.name(), "printer");
/// ```
pub struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&Message, Option<&Handback>) -> Result<(), ListenerError> + Send + Sync,
{
    #[must_use]
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> NotificationListener for FnListener<F>
where
    F: Fn(&Message, Option<&Handback>) -> Result<(), ListenerError> + Send + Sync,
{
    fn handle_notification(&self, message: &Message, handback: Option<&Handback>) -> Result<(), ListenerError> {
        (self.f)(message, handback)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> std::fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnListener").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Unique identifier for a registration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscribed listener with its optional filter and handback.
#[derive(Clone)]
pub struct ListenerRegistration {
    id: SubscriptionId,
    listener: ListenerHandle,
    filter: Option<NotificationFilter>,
    handback: Option<Handback>,
}

impl ListenerRegistration {
    #[must_use]
    pub fn new(listener: ListenerHandle, filter: Option<NotificationFilter>, handback: Option<Handback>) -> Self {
        Self {
            id: SubscriptionId::new(),
            listener,
            filter,
            handback,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub const fn listener(&self) -> &ListenerHandle {
        &self.listener
    }

    #[must_use]
    pub fn handback(&self) -> Option<&Handback> {
        self.handback.as_ref()
    }

    /// Returns true if the filter (if any) admits `message`.
    #[must_use]
    pub fn accepts(&self, message: &Message) -> bool {
        self.filter.as_ref().map_or(true, |f| f(message))
    }

    /// Returns true if this registration wraps `listener`.
    #[must_use]
    pub fn wraps(&self, listener: &ListenerHandle) -> bool {
        same_listener(&self.listener, listener)
    }

    /// Delivers `message` to the listener with this registration's handback.
    ///
    /// # Errors
    ///
    /// Whatever the listener returns.
    pub fn deliver(&self, message: &Message) -> Result<(), ListenerError> {
        self.listener.handle_notification(message, self.handback.as_ref())
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .field("listener", &self.listener.name())
            .field("filtered", &self.filter.is_some())
            .field("handback", &self.handback.is_some())
            .finish()
    }
}

/// Immutable view of the registrations at one instant.
pub type ListenerSnapshot = Arc<Vec<ListenerRegistration>>;

/// Per-resource collection of listener registrations.
///
/// Copy-on-write: a snapshot is an `Arc` clone, and writers copy the vector
/// only while a snapshot is still held by an in-flight dispatch.
#[derive(Debug, Default)]
pub struct ListenerDirectory {
    registrations: RwLock<ListenerSnapshot>,
}

impl ListenerDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a registration.
    pub fn add(
        &self,
        listener: ListenerHandle,
        filter: Option<NotificationFilter>,
        handback: Option<Handback>,
    ) -> SubscriptionId {
        let registration = ListenerRegistration::new(listener, filter, handback);
        let id = registration.id();
        tracing::debug!(subscription = %id, listener = registration.listener().name(), "notify.listener.added");

        let mut guard = self.registrations.write().unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut *guard).push(registration);
        id
    }

    /// Removes every registration wrapping `listener`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// `ListenerNotFound` if no registration wraps `listener`.
    pub fn remove(&self, listener: &ListenerHandle) -> NotifyResult<usize> {
        let mut guard = self.registrations.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|r| r.wraps(listener)) {
            return Err(NotifyError::ListenerNotFound {
                listener: listener.name().to_string(),
            });
        }

        let registrations = Arc::make_mut(&mut *guard);
        let before = registrations.len();
        registrations.retain(|r| !r.wraps(listener));
        let removed = before - registrations.len();
        drop(guard);

        tracing::debug!(listener = listener.name(), removed, "notify.listener.removed");
        Ok(removed)
    }

    /// Current registrations, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> ListenerSnapshot {
        Arc::clone(&*self.registrations.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Removes all registrations.
    pub fn clear(&self) {
        let mut guard = self.registrations.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(Vec::new());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use chrono::Utc;

    use crate::category::Severity;

    pub(crate) fn message(category: &str, sequence: u64, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            identifier: category.to_string(),
            category: category.to_string(),
            source: "test-resource".to_string(),
            sequence,
            timestamp: Utc::now(),
            severity: Severity::Info,
            text: text.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    fn noop(name: &str) -> ListenerHandle {
        Arc::new(FnListener::new(name, |_, _| Ok(())))
    }

    #[test]
    fn remove_drops_every_registration_of_a_listener() {
        let dir = ListenerDirectory::new();
        let a = noop("a");
        let b = noop("b");
        dir.add(Arc::clone(&a), None, None);
        dir.add(Arc::clone(&b), None, None);
        dir.add(Arc::clone(&a), None, Some(Arc::new(42u32)));

        assert_eq!(dir.remove(&a).unwrap(), 2);
        assert_eq!(dir.len(), 1);
        assert!(dir.snapshot()[0].wraps(&b));
    }

    #[test]
    fn remove_unknown_listener_fails() {
        let dir = ListenerDirectory::new();
        let a = noop("a");
        dir.add(Arc::clone(&a), None, None);
        dir.remove(&a).unwrap();

        let err = dir.remove(&a).unwrap_err();
        assert!(err.is_listener_not_found());
        assert!(format!("{err}").contains('a'));
    }

    #[test]
    fn identity_is_by_allocation_not_name() {
        let a1 = noop("same");
        let a2 = noop("same");
        assert!(same_listener(&a1, &Arc::clone(&a1)));
        assert!(!same_listener(&a1, &a2));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let dir = ListenerDirectory::new();
        let a = noop("a");
        dir.add(Arc::clone(&a), None, None);

        let snap = dir.snapshot();
        dir.add(noop("b"), None, None);
        dir.clear();

        assert_eq!(snap.len(), 1);
        assert!(dir.is_empty());
    }

    #[test]
    fn filter_and_handback_are_applied() {
        let hits = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        let listener: ListenerHandle = Arc::new(FnListener::new("hb", move |msg, hb| {
            let tag = hb.and_then(|h| h.downcast_ref::<&'static str>()).copied();
            sink.lock().unwrap().push((msg.text.clone(), tag));
            Ok(())
        }));
        let filter: NotificationFilter = Arc::new(|m: &Message| m.category == "cpu.load");
        let reg = ListenerRegistration::new(listener, Some(filter), Some(Arc::new("ctx")));

        let ok = message("cpu.load", 0, "m1");
        let other = message("disk.usage", 1, "m2");
        assert!(reg.accepts(&ok));
        assert!(!reg.accepts(&other));
        reg.deliver(&ok).unwrap();

        assert_eq!(hits.lock().unwrap().as_slice(), [("m1".to_string(), Some("ctx"))]);
    }
}
