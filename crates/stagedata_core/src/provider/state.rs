//! Mutable state shared by a provider and its iterators.

use crate::buffer::EditBuffer;
use crate::merge::MergeState;
use crate::models::{FetchListParameters, ItemData, ItemKey, SortCriterion};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Client-side key assignment for staged adds.
pub type KeyGenerator<K, D> = Arc<dyn Fn(&D) -> K + Send + Sync>;

/// Everything a provider mutates, guarded by one mutex.
///
/// The lock is never held across an `.await`, so every step boundary leaves
/// the buffer and merge states coherent for interleaved operations.
pub(crate) struct ProviderState<K, D> {
    pub(crate) buffer: EditBuffer<K, D>,
    pub(crate) iterations: HashMap<u64, MergeState<K, D>>,
    pub(crate) latest_iteration: Option<u64>,
    next_iteration_id: u64,
    /// Upstream data of locally updated keys, fetched once per key.
    pub(crate) data_before_updated: HashMap<K, D>,
    /// Keys whose pre-edit data the source did not have.
    pub(crate) before_misses: HashSet<K>,
    pub(crate) last_sort_criteria: Vec<SortCriterion>,
    /// Server-assigned key to the temporary key it replaced.
    pub(crate) generated_keys: HashMap<K, K>,
    pub(crate) key_generator: Option<KeyGenerator<K, D>>,
}

impl<K: ItemKey, D: ItemData> ProviderState<K, D> {
    pub(crate) fn new() -> Self {
        Self {
            buffer: EditBuffer::new(),
            iterations: HashMap::new(),
            latest_iteration: None,
            next_iteration_id: 0,
            data_before_updated: HashMap::new(),
            before_misses: HashSet::new(),
            last_sort_criteria: Vec::new(),
            generated_keys: HashMap::new(),
            key_generator: None,
        }
    }

    pub(crate) fn begin_iteration(&mut self, params: FetchListParameters<D>) -> u64 {
        let id = self.next_iteration_id;
        self.next_iteration_id += 1;
        self.last_sort_criteria = params.sort_criteria.clone();
        self.iterations.insert(id, MergeState::new(params));
        self.latest_iteration = Some(id);
        id
    }

    pub(crate) fn end_iteration(&mut self, id: u64) {
        self.iterations.remove(&id);
        if self.latest_iteration == Some(id) {
            self.latest_iteration = None;
        }
    }

    /// Visible index of `key` in the most recent iteration.
    pub(crate) fn latest_index(&self, key: &K) -> Option<usize> {
        let merge = self.iterations.get(&self.latest_iteration?)?;
        merge.visible_index(key, &self.buffer)
    }

    /// Drop merged entries for keys whose staged add went away.
    pub(crate) fn forget_adds<'a>(&mut self, keys: impl IntoIterator<Item = &'a K>) {
        for key in keys {
            for merge in self.iterations.values_mut() {
                merge.remove_entry(key);
            }
        }
    }
}
