//! The dispatched notification unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::Severity;

/// A fired notification message.
///
/// Messages are built once per matching enabled category and shared by
/// reference across every listener of a fan-out.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    /// Subscription key under which the category was enabled.
    pub identifier: String,
    /// Category name taken from the enabled descriptor.
    pub category: String,
    /// Resource that produced the message.
    pub source: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub text: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Message {
    /// Epoch milliseconds of the message timestamp.
    #[must_use]
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Returns true if this message was produced for `category`.
    #[must_use]
    pub fn matches_category(&self, category: &str) -> bool {
        self.category == category
    }
}
