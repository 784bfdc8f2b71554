//! Item, key and message types.

use crate::filter::Attributes;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// Bounds every item key must satisfy.
pub trait ItemKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> ItemKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Bounds every item payload must satisfy.
///
/// Payloads expose named attributes so sort criteria and attribute filters
/// can be evaluated without knowing the concrete type.
pub trait ItemData: Clone + Debug + Send + Sync + Attributes + 'static {}

impl<T> ItemData for T where T: Clone + Debug + Send + Sync + Attributes + 'static {}

/// Severity attached to a per-row message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSeverity {
    Error,
    Warning,
    Info,
    Confirmation,
}

/// User-visible message attached to an item, typically a submission error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMessage {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub severity: MessageSeverity,
}

impl ItemMessage {
    /// Build an error-severity message with a summary only.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            detail: None,
            severity: MessageSeverity::Error,
        }
    }
}

/// Metadata carried alongside item data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata<K> {
    pub key: K,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ItemMessage>,
}

impl<K> ItemMetadata<K> {
    pub fn new(key: K) -> Self {
        Self { key, message: None }
    }
}

/// One addressable row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item<K, D> {
    pub data: D,
    pub metadata: ItemMetadata<K>,
}

impl<K, D> Item<K, D> {
    /// Build an item with no message.
    pub fn new(key: K, data: D) -> Self {
        Self {
            data,
            metadata: ItemMetadata::new(key),
        }
    }

    /// Item key.
    pub fn key(&self) -> &K {
        &self.metadata.key
    }

    /// Replace the key, keeping data and message.
    pub fn with_key(self, key: K) -> Self {
        Self {
            data: self.data,
            metadata: ItemMetadata {
                key,
                message: self.metadata.message,
            },
        }
    }
}
