//! In-memory ledger of staged edits keyed by item identity.
//!
//! Each key has at most one live unsubmitted edit and at most one submitting
//! edit. Conflicting staging calls fail synchronously with
//! [`ProviderError::EditConflict`]; nothing is queued.

use crate::error::ProviderError;
use crate::models::{EditItem, EditOperation, EditStatus, Item, ItemKey, ItemMessage};
use std::collections::{HashMap, HashSet};


#[derive(Debug, Clone)]
struct BufferedEdit<K, D> {
    edit: EditItem<K, D>,
    seq: u64,
}

/// Side-map state reconciling a local submission with the source's own
/// mutation event, which may arrive before or after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMark {
    /// Submission finished; the source has not reported the mutation yet.
    Submitted,
    /// The source reported the mutation while the edit was still submitting.
    Mutated,
}

/// What a staging call did, used to shape the mutation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// A new add was staged.
    Added,
    /// A pending remove was turned into an update of the new value.
    RemoveTransformed,
    /// A pending add was discarded; nothing reaches the source.
    AddCancelled,
    /// A remove was staged, replacing any pending update.
    Removed,
    /// A pending add or update was overwritten in place.
    ReplacedInPlace(EditOperation),
    /// A new update was staged.
    Updated,
}

/// How a source mutation lines up with local submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMatch {
    /// The edit was already submitted; its cleanup is now final.
    Confirmed,
    /// The edit is still submitting; a later `Submitted` finalizes it.
    InFlight,
}

/// Ledger of unsubmitted and submitting edits.
#[derive(Debug, Clone)]
pub struct EditBuffer<K, D> {
    unsubmitted: HashMap<K, BufferedEdit<K, D>>,
    submitting: HashMap<K, BufferedEdit<K, D>>,
    transformed: HashSet<K>,
    changed: HashSet<K>,
    item_status: HashMap<K, SubmitMark>,
    next_seq: u64,
}

impl<K, D> Default for EditBuffer<K, D> {
    fn default() -> Self {
        Self {
            unsubmitted: HashMap::new(),
            submitting: HashMap::new(),
            transformed: HashSet::new(),
            changed: HashSet::new(),
            item_status: HashMap::new(),
            next_seq: 0,
        }
    }
}

fn ordered<K: Clone, D: Clone>(edits: &HashMap<K, BufferedEdit<K, D>>) -> Vec<EditItem<K, D>> {
    let mut entries: Vec<&BufferedEdit<K, D>> = edits.values().collect();
    entries.sort_by_key(|entry| entry.seq);
    entries.into_iter().map(|entry| entry.edit.clone()).collect()
}

impl<K: ItemKey, D: Clone> EditBuffer<K, D> {
    pub fn new() -> Self {
        Self::default()
    }

    fn stage(&mut self, operation: EditOperation, item: Item<K, D>) {
        let key = item.key().clone();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.unsubmitted.insert(
            key,
            BufferedEdit {
                edit: EditItem::new(operation, item),
                seq,
            },
        );
    }

    fn pending_op(&self, key: &K) -> Option<EditOperation> {
        self.unsubmitted.get(key).map(|entry| entry.edit.operation)
    }

    fn submitting_op(&self, key: &K) -> Option<EditOperation> {
        self.submitting.get(key).map(|entry| entry.edit.operation)
    }

    /// Stage an add.
    ///
    /// # Errors
    /// Returns [`ProviderError::EditConflict`] when an add or update for the
    /// key is already pending or submitting.
    pub fn add_item(&mut self, item: Item<K, D>) -> Result<StageOutcome, ProviderError> {
        let key = item.key().clone();
        let pending = self.pending_op(&key);
        let submitting = self.submitting_op(&key);
        if matches!(pending, Some(EditOperation::Add | EditOperation::Update))
            || matches!(submitting, Some(EditOperation::Add | EditOperation::Update))
        {
            return Err(ProviderError::conflict(&key, "an add or update is already staged"));
        }
        if pending == Some(EditOperation::Remove) {
            if let Some(entry) = self.unsubmitted.get_mut(&key) {
                entry.edit = EditItem::new(EditOperation::Update, item);
            }
            self.transformed.insert(key.clone());
            self.changed.insert(key);
            return Ok(StageOutcome::RemoveTransformed);
        }
        self.stage(EditOperation::Add, item);
        Ok(StageOutcome::Added)
    }

    /// Stage a remove.
    ///
    /// # Errors
    /// Returns [`ProviderError::EditConflict`] when a remove is already
    /// pending or submitting, or when the key's add is still submitting.
    pub fn remove_item(&mut self, item: Item<K, D>) -> Result<StageOutcome, ProviderError> {
        let key = item.key().clone();
        let pending = self.pending_op(&key);
        let submitting = self.submitting_op(&key);
        if pending == Some(EditOperation::Remove) || submitting == Some(EditOperation::Remove) {
            return Err(ProviderError::conflict(&key, "a remove is already staged"));
        }
        if submitting == Some(EditOperation::Add) {
            return Err(ProviderError::conflict(&key, "the item's add is still submitting"));
        }
        if pending == Some(EditOperation::Add) {
            self.unsubmitted.remove(&key);
            self.changed.remove(&key);
            return Ok(StageOutcome::AddCancelled);
        }
        self.unsubmitted.remove(&key);
        self.transformed.remove(&key);
        self.changed.remove(&key);
        self.stage(EditOperation::Remove, item);
        Ok(StageOutcome::Removed)
    }

    /// Stage an update.
    ///
    /// # Errors
    /// Returns [`ProviderError::EditConflict`] when a remove is pending or
    /// submitting, or when an add or update for the key is submitting.
    pub fn update_item(&mut self, item: Item<K, D>) -> Result<StageOutcome, ProviderError> {
        let key = item.key().clone();
        let pending = self.pending_op(&key);
        let submitting = self.submitting_op(&key);
        if pending == Some(EditOperation::Remove) || submitting == Some(EditOperation::Remove) {
            return Err(ProviderError::conflict(&key, "the item is staged for removal"));
        }
        if let Some(entry) = self.unsubmitted.get_mut(&key) {
            let operation = entry.edit.operation;
            entry.edit = EditItem::new(operation, item);
            self.changed.insert(key);
            return Ok(StageOutcome::ReplacedInPlace(operation));
        }
        if submitting.is_some() {
            return Err(ProviderError::conflict(&key, "an add or update is already submitting"));
        }
        self.changed.insert(key);
        self.stage(EditOperation::Update, item);
        Ok(StageOutcome::Updated)
    }

    /// Record that the source reported its own mutation for `key`.
    ///
    /// # Returns
    /// `Some` when a local submission accounts for the mutation.
    pub fn set_item_mutated(&mut self, key: &K) -> Option<MutationMatch> {
        if self.item_status.get(key) == Some(&SubmitMark::Submitted) {
            self.item_status.remove(key);
            return Some(MutationMatch::Confirmed);
        }
        if self.submitting.contains_key(key) {
            self.item_status.insert(key.clone(), SubmitMark::Mutated);
            return Some(MutationMatch::InFlight);
        }
        None
    }

    /// Advance the submission status of the edit for `edit`'s key.
    ///
    /// - `Submitting` moves the unsubmitted edit into the submitting set.
    /// - `Submitted` drops the submitting edit.
    /// - `Unsubmitted` moves it back, annotated with `message`.
    ///
    /// # Returns
    /// The edit whose status changed.
    ///
    /// # Errors
    /// Returns [`ProviderError::NotFound`] when there is no edit in the
    /// expected state, or [`ProviderError::EditConflict`] when another edit
    /// for the key is already submitting.
    pub fn set_item_status(
        &mut self,
        edit: &EditItem<K, D>,
        status: EditStatus,
        message: Option<ItemMessage>,
    ) -> Result<EditItem<K, D>, ProviderError> {
        let key = edit.key().clone();
        match status {
            EditStatus::Submitting => {
                if self.submitting.contains_key(&key) {
                    return Err(ProviderError::conflict(&key, "another edit is already submitting"));
                }
                let mut entry = self.unsubmitted.remove(&key).ok_or(ProviderError::NotFound)?;
                entry.edit.item.metadata.message = None;
                let moved = entry.edit.clone();
                self.item_status.remove(&key);
                self.submitting.insert(key, entry);
                Ok(moved)
            }
            EditStatus::Submitted => {
                let entry = self.submitting.remove(&key).ok_or(ProviderError::NotFound)?;
                if self.item_status.remove(&key) != Some(SubmitMark::Mutated) {
                    self.item_status.insert(key.clone(), SubmitMark::Submitted);
                }
                if !self.unsubmitted.contains_key(&key) {
                    self.transformed.remove(&key);
                    self.changed.remove(&key);
                }
                Ok(entry.edit)
            }
            EditStatus::Unsubmitted => {
                let mut entry = self.submitting.remove(&key).ok_or(ProviderError::NotFound)?;
                self.item_status.remove(&key);
                match self.unsubmitted.get_mut(&key) {
                    Some(newer) => {
                        newer.edit.item.metadata.message = message;
                        Ok(newer.edit.clone())
                    }
                    None => {
                        entry.edit.item.metadata.message = message;
                        let restaged = entry.edit.clone();
                        self.unsubmitted.insert(key, entry);
                        Ok(restaged)
                    }
                }
            }
        }
    }

    /// Unsubmitted edits in staging order.
    pub fn unsubmitted_items(&self) -> Vec<EditItem<K, D>> {
        ordered(&self.unsubmitted)
    }

    /// Submitting edits in staging order.
    pub fn submitting_items(&self) -> Vec<EditItem<K, D>> {
        ordered(&self.submitting)
    }

    /// Unsubmitted edits whose key has nothing in flight.
    pub fn submittable_items(&self) -> Vec<EditItem<K, D>> {
        let mut entries: Vec<&BufferedEdit<K, D>> = self
            .unsubmitted
            .iter()
            .filter(|(key, _)| !self.submitting.contains_key(*key))
            .map(|(_, entry)| entry)
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.edit.clone()).collect()
    }

    /// Every live edit, unsubmitted first, one per key (first seen wins).
    pub fn effective_edits(&self) -> Vec<EditItem<K, D>> {
        let mut seen = HashSet::new();
        self.unsubmitted_items()
            .into_iter()
            .chain(self.submitting_items())
            .filter(|edit| seen.insert(edit.key().clone()))
            .collect()
    }

    /// Live edits in no particular order, borrowed; one per key like
    /// [`Self::effective_edits`].
    pub fn live_edits(&self) -> impl Iterator<Item = &EditItem<K, D>> {
        self.unsubmitted.values().map(|entry| &entry.edit).chain(
            self.submitting
                .iter()
                .filter(|(key, _)| !self.unsubmitted.contains_key(*key))
                .map(|(_, entry)| &entry.edit),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.unsubmitted.is_empty() && self.submitting.is_empty()
    }

    /// Live edit for `key`, unsubmitted before submitting.
    pub fn get_item(&self, key: &K) -> Option<&EditItem<K, D>> {
        self.unsubmitted
            .get(key)
            .or_else(|| self.submitting.get(key))
            .map(|entry| &entry.edit)
    }

    /// `true` when the key's update came from an add over a pending remove.
    pub fn is_update_transformed(&self, key: &K) -> bool {
        self.transformed.contains(key)
    }

    /// Keys updated locally whose pre-edit data may be needed.
    pub fn changed_keys(&self) -> impl Iterator<Item = &K> {
        self.changed.iter()
    }

    pub fn is_changed(&self, key: &K) -> bool {
        self.changed.contains(key)
    }

    /// Status of the most current edit for `key`.
    pub fn edit_item_status(&self, key: &K) -> Option<EditStatus> {
        if self.unsubmitted.contains_key(key) {
            Some(EditStatus::Unsubmitted)
        } else if self.submitting.contains_key(key) {
            Some(EditStatus::Submitting)
        } else if self.item_status.get(key) == Some(&SubmitMark::Submitted) {
            Some(EditStatus::Submitted)
        } else {
            None
        }
    }

    pub fn submit_mark(&self, key: &K) -> Option<SubmitMark> {
        self.item_status.get(key).copied()
    }

    /// Drop every unsubmitted edit; submitting edits stay.
    ///
    /// # Returns
    /// The dropped edits in staging order.
    pub fn reset_all_unsubmitted_items(&mut self) -> Vec<EditItem<K, D>> {
        let dropped = ordered(&self.unsubmitted);
        for edit in &dropped {
            self.forget_local_flags(edit.key());
        }
        self.unsubmitted.clear();
        dropped
    }

    /// Drop the unsubmitted edit for `key`, if any.
    pub fn reset_unsubmitted_item(&mut self, key: &K) -> Option<EditItem<K, D>> {
        let entry = self.unsubmitted.remove(key)?;
        self.forget_local_flags(key);
        Some(entry.edit)
    }

    fn forget_local_flags(&mut self, key: &K) {
        if !self.submitting.contains_key(key) {
            self.transformed.remove(key);
            self.changed.remove(key);
        }
    }

    /// Rename a finished add's key to the server-assigned one.
    pub fn remap_key(&mut self, from: &K, to: K) {
        if let Some(mark) = self.item_status.remove(from) {
            self.item_status.insert(to, mark);
        }
    }
}
