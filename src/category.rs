//! Category descriptors and configuration fingerprints.
//!
//! A [`CategoryDescriptor`] names a class of events a resource can emit and
//! carries the options a subscriber asked for. Two descriptors with equal
//! [`Fingerprint`]s are treated as the same configuration, which is what makes
//! repeated `enable` calls idempotent.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::OptionValue;

/// Maximum accepted length of a category name.
pub const MAX_CATEGORY_LEN: usize = 256;

/// Event severity, ordered from least to most verbose.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Unknown,
    Panic,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Severity {
    /// Lower-case name of this severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Panic => "panic",
            Self::Alert => "alert",
            Self::Critical => "critical",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "panic" | "emergency" => Ok(Self::Panic),
            "alert" => Ok(Self::Alert),
            "critical" => Ok(Self::Critical),
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "notice" => Ok(Self::Notice),
            "info" | "informational" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(ValidationError::InvalidConfig {
                reason: format!("unknown severity '{other}'"),
            }),
        }
    }
}

/// Order-independent digest of a category configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Raw fingerprint value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn fold_hash(hash: &blake3::Hash) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(word)
}

/// Immutable description of an event category and its configuration.
///
/// # Examples
///
/// ```
/// use kyronotify::{CategoryDescriptor, Severity};
///
/// let a = CategoryDescriptor::builder("cpu.load")
///     .severity(Severity::Warning)
///     .option("threshold", 0.9)
///     .option("window", 60i64)
///     .build()
///     .unwrap();
///
/// let b = CategoryDescriptor::builder("cpu.load")
///     .option("window", 60i64)
///     .option("threshold", 0.9)
///     .build()
///     .unwrap();
///
/// // Severity and description are not part of the configuration fingerprint.
/// assert_eq!(a.fingerprint(), b.fingerprint());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDescriptor {
    category: String,
    #[serde(default)]
    severity: Severity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, OptionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl CategoryDescriptor {
    /// Creates a descriptor with no options.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the name is empty or too long.
    pub fn new(category: impl Into<String>) -> Result<Self, ValidationError> {
        Self::builder(category).build()
    }

    /// Starts building a descriptor for `category`.
    #[must_use]
    pub fn builder(category: impl Into<String>) -> CategoryDescriptorBuilder {
        CategoryDescriptorBuilder {
            category: category.into(),
            severity: Severity::Unknown,
            options: BTreeMap::new(),
            description: None,
        }
    }

    /// The category name messages are matched against.
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Options in key order.
    #[must_use]
    pub const fn options(&self) -> &BTreeMap<String, OptionValue> {
        &self.options
    }

    #[must_use]
    pub fn option(&self, key: &str) -> Option<&OptionValue> {
        self.options.get(key)
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Computes the configuration fingerprint.
    ///
    /// The category name and each (key, value) pair are hashed independently
    /// and XOR-folded, so option order never matters but a value stays bound
    /// to its key.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let mut h = blake3::Hasher::new();
        h.update(b"category\0");
        h.update(self.category.as_bytes());
        let mut acc = fold_hash(&h.finalize());

        for (key, value) in &self.options {
            let mut h = blake3::Hasher::new();
            h.update(b"option\0");
            h.update(&(key.len() as u64).to_le_bytes());
            h.update(key.as_bytes());
            value.hash_into(&mut h);
            acc ^= fold_hash(&h.finalize());
        }

        Fingerprint(acc)
    }

    /// Returns true if this descriptor describes `category`.
    #[must_use]
    pub fn matches(&self, category: &str) -> bool {
        self.category == category
    }
}

/// Builder for [`CategoryDescriptor`].
#[derive(Debug, Clone)]
pub struct CategoryDescriptorBuilder {
    category: String,
    severity: Severity,
    options: BTreeMap<String, OptionValue>,
    description: Option<String>,
}

impl CategoryDescriptorBuilder {
    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets an option, replacing any previous value for `key`.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validates and builds the descriptor.
    ///
    /// # Errors
    ///
    /// Returns `EmptyCategory` for a blank name and `FieldTooLong` when the
    /// name exceeds [`MAX_CATEGORY_LEN`].
    pub fn build(self) -> Result<CategoryDescriptor, ValidationError> {
        let category = self.category.trim().to_string();
        if category.is_empty() {
            return Err(ValidationError::EmptyCategory);
        }
        if category.len() > MAX_CATEGORY_LEN {
            return Err(ValidationError::FieldTooLong {
                field: "category".to_string(),
                max_length: MAX_CATEGORY_LEN,
            });
        }
        Ok(CategoryDescriptor {
            category,
            severity: self.severity,
            options: self.options,
            description: self.description,
        })
    }
}
