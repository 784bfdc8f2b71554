//! Staged edit types.

use super::item::Item;
use serde::{Deserialize, Serialize};

/// Kind of a staged edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOperation {
    Add,
    Remove,
    Update,
}

/// Submission status of a staged edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditStatus {
    Unsubmitted,
    Submitting,
    Submitted,
}

/// A staged add, remove or update of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditItem<K, D> {
    pub operation: EditOperation,
    pub item: Item<K, D>,
}

impl<K, D> EditItem<K, D> {
    pub fn new(operation: EditOperation, item: Item<K, D>) -> Self {
        Self { operation, item }
    }

    pub fn key(&self) -> &K {
        self.item.key()
    }

    /// `true` for adds and updates, the edits that carry display data.
    pub fn carries_data(&self) -> bool {
        matches!(self.operation, EditOperation::Add | EditOperation::Update)
    }
}
