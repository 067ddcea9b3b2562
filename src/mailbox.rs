//! Bounded, drop-on-full mailboxes for poll-based consumers.
//!
//! A [`Mailbox`] is a listener: once subscribed, the dispatch path offers it
//! every message and the consumer drains it at its own pace. Offering never
//! blocks. When the mailbox is full the new message is dropped, so the oldest
//! accepted messages are the ones retained.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::ListenerError;
use crate::listener::{Handback, ListenerHandle, NotificationFilter, NotificationListener};
use crate::message::Message;

/// Bounded FIFO of messages that is also a listener.
pub struct Mailbox {
    name: String,
    capacity: usize,
    tx: Sender<Arc<Message>>,
    rx: Receiver<Arc<Message>>,
    filter: Option<NotificationFilter>,
    dropped: AtomicU64,
}

impl Mailbox {
    /// Creates a mailbox holding at most `capacity` messages (at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Creates a mailbox that only retains messages admitted by `filter`.
    #[must_use]
    pub fn filtered(capacity: usize, filter: NotificationFilter) -> Self {
        Self::build(capacity, Some(filter))
    }

    /// Creates a mailbox that only retains messages of `category`.
    #[must_use]
    pub fn for_category(capacity: usize, category: impl Into<String>) -> Self {
        let category = category.into();
        let name = format!("mailbox:{category}");
        let mut mailbox = Self::filtered(capacity, Arc::new(move |m: &Message| m.matches_category(&category)));
        mailbox.name = name;
        mailbox
    }

    fn build(capacity: usize, filter: Option<NotificationFilter>) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            name: "mailbox".to_string(),
            capacity,
            tx,
            rx,
            filter,
            dropped: AtomicU64::new(0),
        }
    }

    /// Renames the mailbox (used in logs and failure reports).
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attempts to enqueue `message` without blocking.
    ///
    /// Returns false if the filter rejected the message or the mailbox was full.
    /// Only the latter counts as a drop.
    pub fn offer(&self, message: Arc<Message>) -> bool {
        if let Some(filter) = &self.filter {
            if !filter(&message) {
                return false;
            }
        }

        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(rejected) | TrySendError::Disconnected(rejected)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // Log the first drop and then every power of two to keep overload quiet.
                if dropped.is_power_of_two() {
                    tracing::warn!(
                        mailbox = %self.name,
                        capacity = self.capacity,
                        dropped,
                        sequence = rejected.sequence,
                        "notify.mailbox.dropped"
                    );
                }
                false
            }
        }
    }

    /// Removes and returns the oldest message, if any.
    #[must_use]
    pub fn poll(&self) -> Option<Arc<Message>> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout` for a message.
    #[must_use]
    pub fn poll_timeout(&self, timeout: Duration) -> Option<Arc<Message>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Removes and returns every queued message, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<Arc<Message>> {
        self.rx.try_iter().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Messages dropped because the mailbox was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// This mailbox as a listener handle, for subscribe/unsubscribe.
    #[must_use]
    pub fn as_listener(self: &Arc<Self>) -> ListenerHandle {
        Arc::clone(self) as ListenerHandle
    }
}

impl NotificationListener for Mailbox {
    fn handle_notification(&self, message: &Message, _handback: Option<&Handback>) -> Result<(), ListenerError> {
        // Drops are the backpressure policy, not a listener failure.
        self.offer(Arc::new(message.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("dropped", &self.dropped())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Instant;

    use crate::listener::tests::message;

    fn msg(text: &str, seq: u64) -> Arc<Message> {
        Arc::new(message("cpu.load", seq, text))
    }

    #[test]
    fn full_mailbox_drops_newest_and_keeps_oldest() {
        let mailbox = Mailbox::new(2);
        assert!(mailbox.offer(msg("a", 0)));
        assert!(mailbox.offer(msg("b", 1)));
        assert!(!mailbox.offer(msg("c", 2)));

        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.dropped(), 1);
        assert_eq!(mailbox.poll().unwrap().text, "a");
        assert_eq!(mailbox.poll().unwrap().text, "b");
        assert!(mailbox.poll().is_none());
    }

    #[test]
    fn offer_never_blocks_past_capacity() {
        let mailbox = Mailbox::new(8);
        let started = Instant::now();
        for seq in 0..10_000 {
            mailbox.offer(msg("x", seq));
        }
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(mailbox.len(), mailbox.capacity());
        assert_eq!(mailbox.dropped(), 10_000 - 8);

        let kept: Vec<u64> = mailbox.drain().iter().map(|m| m.sequence).collect();
        assert_eq!(kept, (0..8).collect::<Vec<_>>());
        assert_eq!(mailbox.remaining_capacity(), 8);
    }

    #[test]
    fn filtered_mailbox_ignores_unmatched_messages() {
        let mailbox = Mailbox::for_category(1, "disk.usage");
        assert!(!mailbox.offer(msg("cpu", 0)));
        assert_eq!(mailbox.dropped(), 0, "filtered messages are not drops");

        assert!(mailbox.offer(Arc::new(message("disk.usage", 1, "disk"))));
        assert_eq!(mailbox.poll().unwrap().text, "disk");
        assert_eq!(mailbox.name(), "mailbox:disk.usage");
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mailbox = Mailbox::new(0).named("tiny");
        assert_eq!(mailbox.capacity(), 1);
        assert!(mailbox.offer(msg("a", 0)));
        assert!(!mailbox.offer(msg("b", 1)));
    }

    #[test]
    fn poll_timeout_receives_from_another_thread() {
        let mailbox = Arc::new(Mailbox::new(4));
        let producer = Arc::clone(&mailbox);
        let handle = thread::spawn(move || {
            producer.offer(msg("late", 5));
        });

        let got = mailbox.poll_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.sequence, 5);
        handle.join().unwrap();
        assert!(mailbox.poll_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn mailbox_as_listener_keeps_identity() {
        let mailbox = Arc::new(Mailbox::new(4));
        let a = mailbox.as_listener();
        let b = mailbox.as_listener();
        assert!(crate::listener::same_listener(&a, &b));

        a.handle_notification(&message("cpu.load", 0, "via listener"), None).unwrap();
        assert_eq!(mailbox.len(), 1);
    }
}
