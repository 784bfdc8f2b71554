//! Mutation and refresh events dispatched by sources and by the provider.

use super::edit::EditItem;
use super::item::{Item, ItemMetadata};
use serde::{Deserialize, Serialize};

/// One operation (add, remove or update) inside a mutation event.
///
/// Vectors are parallel: entry `i` of `data`, `metadata`, `add_before_keys`
/// and `indexes` describes `keys[i]`. Optional vectors are left empty when
/// the emitter has nothing to say (removes usually carry keys only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "K: Deserialize<'de>, D: Deserialize<'de>"))]
pub struct MutationOperation<K, D> {
    pub keys: Vec<K>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<D>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<ItemMetadata<K>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_before_keys: Vec<Option<K>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<usize>,
}

impl<K, D> Default for MutationOperation<K, D> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            data: Vec::new(),
            metadata: Vec::new(),
            add_before_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }
}

impl<K: Clone + PartialEq, D: Clone> MutationOperation<K, D> {
    /// Operation over full items.
    pub fn from_items(items: impl IntoIterator<Item = Item<K, D>>) -> Self {
        let mut op = Self::default();
        for item in items {
            op.push_item(item);
        }
        op
    }

    /// Operation carrying keys only.
    pub fn from_keys(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn push_item(&mut self, item: Item<K, D>) {
        self.keys.push(item.metadata.key.clone());
        self.data.push(item.data);
        self.metadata.push(item.metadata);
    }

    /// Push an inserted item with its `add_before_keys` hint.
    pub fn push_insert(&mut self, item: Item<K, D>, before: Option<K>) {
        // Hints only line up when every entry has one.
        if self.add_before_keys.len() == self.keys.len() {
            self.add_before_keys.push(before);
        }
        self.push_item(item);
    }

    pub fn push_key(&mut self, key: K) {
        self.keys.push(key);
    }

    /// Record the visible index of the entry just pushed.
    ///
    /// Indexes only line up when every entry has one, so a missing index
    /// for an earlier entry (or `None` here) clears the vector.
    pub fn set_last_index(&mut self, index: Option<usize>) {
        match index {
            Some(index) if self.indexes.len() + 1 == self.keys.len() => self.indexes.push(index),
            _ => self.indexes.clear(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// Data for entry `index`, when this operation carries data.
    pub fn data_at(&self, index: usize) -> Option<&D> {
        self.data.get(index)
    }

    /// Item for entry `index`, when this operation carries data.
    pub fn item_at(&self, index: usize) -> Option<Item<K, D>> {
        let data = self.data.get(index)?.clone();
        let metadata = self
            .metadata
            .get(index)
            .cloned()
            .unwrap_or_else(|| ItemMetadata::new(self.keys[index].clone()));
        Some(Item { data, metadata })
    }

    /// Keep only the entries whose key satisfies `keep`, preserving the
    /// parallel vectors.
    pub fn retain_keys(&mut self, mut keep: impl FnMut(&K) -> bool) {
        let mask: Vec<bool> = self.keys.iter().map(&mut keep).collect();
        retain_by_mask(&mut self.keys, &mask);
        retain_by_mask(&mut self.data, &mask);
        retain_by_mask(&mut self.metadata, &mask);
        retain_by_mask(&mut self.add_before_keys, &mask);
        retain_by_mask(&mut self.indexes, &mask);
    }
}

fn retain_by_mask<T>(values: &mut Vec<T>, mask: &[bool]) {
    if values.len() != mask.len() {
        // Optional vectors that do not line up are dropped rather than
        // misaligned.
        if !values.is_empty() {
            values.clear();
        }
        return;
    }
    let mut index = 0;
    values.retain(|_| {
        let keep = mask[index];
        index += 1;
        keep
    });
}

/// Detail of a `mutate` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "K: Deserialize<'de>, D: Deserialize<'de>"))]
pub struct MutationDetail<K, D> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add: Option<MutationOperation<K, D>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<MutationOperation<K, D>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<MutationOperation<K, D>>,
}

impl<K, D> Default for MutationDetail<K, D> {
    fn default() -> Self {
        Self {
            add: None,
            remove: None,
            update: None,
        }
    }
}

impl<K: Clone + PartialEq, D: Clone> MutationDetail<K, D> {
    pub fn add(op: MutationOperation<K, D>) -> Self {
        Self {
            add: Some(op),
            ..Self::default()
        }
    }

    pub fn remove(op: MutationOperation<K, D>) -> Self {
        Self {
            remove: Some(op),
            ..Self::default()
        }
    }

    pub fn update(op: MutationOperation<K, D>) -> Self {
        Self {
            update: Some(op),
            ..Self::default()
        }
    }

    /// `true` when no operation carries any key.
    pub fn is_empty(&self) -> bool {
        [&self.add, &self.remove, &self.update]
            .into_iter()
            .all(|op| op.as_ref().map_or(true, MutationOperation::is_empty))
    }

    /// Drop operations that ended up without keys.
    pub fn prune_empty(&mut self) {
        for op in [&mut self.add, &mut self.remove, &mut self.update] {
            if op.as_ref().is_some_and(MutationOperation::is_empty) {
                *op = None;
            }
        }
    }
}

/// Event published on a source's or provider's event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ProviderEvent<K, D> {
    /// Items were added, removed or updated.
    Mutate(MutationDetail<K, D>),
    /// Everything may have changed; dependents should refetch.
    Refresh,
    /// The set of submittable edits changed.
    SubmittableChange(Vec<EditItem<K, D>>),
}

impl<K, D> ProviderEvent<K, D> {
    pub fn is_refresh(&self) -> bool {
        matches!(self, Self::Refresh)
    }

    pub fn as_mutation(&self) -> Option<&MutationDetail<K, D>> {
        match self {
            Self::Mutate(detail) => Some(detail),
            _ => None,
        }
    }
}
