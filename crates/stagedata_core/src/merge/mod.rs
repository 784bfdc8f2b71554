//! Merge engine: splices staged edits into pages fetched from the wrapped
//! source.
//!
//! A [`MergeState`] belongs to one iteration. Base items are kept with their
//! upstream data; staged edits are applied when an entry is displayed, so a
//! pass never needs to undo earlier substitutions. Only structural changes
//! (spliced adds, cancelled adds, renamed keys) mutate the entry list.

use crate::buffer::EditBuffer;
use crate::filter::{compare_by_criteria, DataFilter};
use crate::models::{
    EditOperation, FetchListParameters, FetchListResult, Item, ItemData, ItemKey, MutationDetail,
    MutationOperation,
};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[cfg(test)]
mod tests;

/// Where a merged entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Delivered by the source iterator.
    Base,
    /// Spliced in from a staged add.
    StagedAdd,
    /// Inserted from a source `mutate` event.
    External,
}

#[derive(Debug, Clone)]
pub(crate) struct MergedEntry<K, D> {
    pub(crate) item: Item<K, D>,
    pub(crate) origin: EntryOrigin,
}

/// Rows whose place in the caller's view changed after a re-sort.
#[derive(Debug, Clone)]
pub struct PositionChanges<K, D> {
    /// Rows to show again, each before the given key (`None` appends).
    pub moved: Vec<(Item<K, D>, Option<K>)>,
    /// Rows withdrawn from view; a later page hands them out again.
    pub withdrawn: Vec<K>,
}

impl<K: ItemKey, D: ItemData> PositionChanges<K, D> {
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.withdrawn.is_empty()
    }

    /// `true` when `key` is among the moved or withdrawn rows.
    pub fn touches(&self, key: &K) -> bool {
        self.withdrawn.contains(key) || self.moved.iter().any(|(item, _)| item.key() == key)
    }

    /// Express the changes as `remove` plus `add` operations on `detail`.
    pub fn append_to(self, detail: &mut MutationDetail<K, D>) {
        if self.is_empty() {
            return;
        }
        let remove = detail.remove.get_or_insert_with(MutationOperation::default);
        for key in &self.withdrawn {
            remove.push_key(key.clone());
        }
        for (item, _) in &self.moved {
            remove.push_key(item.key().clone());
        }
        if self.moved.is_empty() {
            return;
        }
        let add = detail.add.get_or_insert_with(MutationOperation::default);
        for (item, before) in self.moved {
            add.push_insert(item, before);
        }
    }
}

/// Per-iteration merge bookkeeping.
pub struct MergeState<K, D> {
    entries: Vec<MergedEntry<K, D>>,
    merged_keys: HashSet<K>,
    merged_add_keys: HashSet<K>,
    base_keys: HashSet<K>,
    first_base_key: Option<K>,
    base_frontier: Option<D>,
    delivered: HashSet<K>,
    next_offset: usize,
    last_sort_index: HashMap<K, usize>,
    base_total: Option<usize>,
    base_done: bool,
    base_pages: usize,
    params: FetchListParameters<D>,
}

/// Lookup of pre-edit data, cached by the provider across passes.
pub(crate) type BeforeData<'a, K, D> = &'a HashMap<K, D>;

/// Net change to a source's filtered row count caused by staged edits.
///
/// Computed from scratch on every pass, so an item contributes at most once
/// however many times it was edited.
///
/// - add: `+1` when it passes the filter and the key is not already upstream
/// - remove: `-1` when its last known upstream data passed the filter
/// - update: `±1` when the edit moves the row across the filter boundary
pub(crate) fn filtered_count_delta<K: ItemKey, D: ItemData>(
    buffer: &EditBuffer<K, D>,
    filter: Option<&dyn DataFilter<D>>,
    before: impl Fn(&K) -> Option<D>,
    upstream_has: impl Fn(&K) -> bool,
) -> i64 {
    let passes = |data: &D| filter.map_or(true, |f| f.filter(data));
    let mut delta = 0i64;
    for edit in buffer.live_edits() {
        let key = edit.key();
        match edit.operation {
            EditOperation::Add => {
                if !upstream_has(key) && passes(&edit.item.data) {
                    delta += 1;
                }
            }
            EditOperation::Remove => {
                let data = before(key).unwrap_or_else(|| edit.item.data.clone());
                if passes(&data) {
                    delta -= 1;
                }
            }
            EditOperation::Update => {
                if filter.is_none() {
                    continue;
                }
                if let Some(previous) = before(key) {
                    match (passes(&previous), passes(&edit.item.data)) {
                        (true, false) => delta -= 1,
                        (false, true) => delta += 1,
                        _ => {}
                    }
                }
            }
        }
    }
    delta
}

pub(crate) fn apply_delta(total: Option<usize>, delta: i64) -> Option<usize> {
    total.map(|total| (total as i64 + delta).max(0) as usize)
}

/// Positions (into `values`) of one longest strictly increasing subsequence.
///
/// Entries outside it are the minimal set that must move for `values` to
/// become sorted. Among equally long subsequences, the one keeping the most
/// `pinned` positions wins.
pub(crate) fn longest_increasing_positions(values: &[usize], pinned: &[bool]) -> Vec<bool> {
    if values.windows(2).all(|pair| pair[0] < pair[1]) {
        return vec![true; values.len()];
    }
    let is_pinned = |position: usize| usize::from(pinned.get(position).copied().unwrap_or(false));
    // (length, pinned count) of the best subsequence ending at each position.
    let mut best: Vec<(usize, usize)> = Vec::with_capacity(values.len());
    let mut previous: Vec<Option<usize>> = vec![None; values.len()];
    for position in 0..values.len() {
        let mut score = (1, is_pinned(position));
        for earlier in 0..position {
            if values[earlier] >= values[position] {
                continue;
            }
            let candidate = (best[earlier].0 + 1, best[earlier].1 + is_pinned(position));
            if candidate > score {
                score = candidate;
                previous[position] = Some(earlier);
            }
        }
        best.push(score);
    }
    let mut keep = vec![false; values.len()];
    let mut cursor = (0..values.len()).max_by_key(|&position| best[position]);
    while let Some(position) = cursor {
        keep[position] = true;
        cursor = previous[position];
    }
    keep
}

impl<K: ItemKey, D: ItemData> MergeState<K, D> {
    pub fn new(params: FetchListParameters<D>) -> Self {
        Self {
            entries: Vec::new(),
            merged_keys: HashSet::new(),
            merged_add_keys: HashSet::new(),
            base_keys: HashSet::new(),
            first_base_key: None,
            base_frontier: None,
            delivered: HashSet::new(),
            next_offset: 0,
            last_sort_index: HashMap::new(),
            base_total: None,
            base_done: false,
            base_pages: 0,
            params,
        }
    }

    pub fn params(&self) -> &FetchListParameters<D> {
        &self.params
    }

    fn filter(&self) -> Option<&dyn DataFilter<D>> {
        self.params.filter.as_deref()
    }

    fn sorted(&self) -> bool {
        !self.params.sort_criteria.is_empty()
    }

    fn passes(&self, data: &D) -> bool {
        self.filter().map_or(true, |f| f.filter(data))
    }

    pub fn first_base_key(&self) -> Option<&K> {
        self.first_base_key.as_ref()
    }

    /// Number of entries handed to the caller so far.
    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    pub fn base_done(&self) -> bool {
        self.base_done
    }

    /// `true` once at least one base page has been merged.
    pub fn started(&self) -> bool {
        self.base_pages > 0
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.merged_keys.contains(key)
    }

    pub fn is_delivered(&self, key: &K) -> bool {
        self.delivered.contains(key)
    }

    fn position_of(&self, key: &K) -> Option<usize> {
        self.entries.iter().position(|entry| entry.item.key() == key)
    }

    /// Upstream data for `key`, ignoring staged edits.
    pub fn base_data(&self, key: &K) -> Option<&D> {
        self.entries
            .iter()
            .find(|entry| entry.item.key() == key && entry.origin != EntryOrigin::StagedAdd)
            .map(|entry| &entry.item.data)
    }

    /// Data used for ordering: staged data when present, upstream otherwise.
    fn sort_data<'a>(&'a self, entry: &'a MergedEntry<K, D>, buffer: &'a EditBuffer<K, D>) -> &'a D {
        match buffer.get_item(entry.item.key()) {
            Some(edit) if edit.carries_data() => &edit.item.data,
            _ => &entry.item.data,
        }
    }

    /// What the caller sees for `entry`, or `None` when it is hidden.
    fn display(&self, entry: &MergedEntry<K, D>, buffer: &EditBuffer<K, D>) -> Option<Item<K, D>> {
        let item = match buffer.get_item(entry.item.key()) {
            Some(edit) if edit.operation == EditOperation::Remove => return None,
            Some(edit) => edit.item.clone(),
            None if entry.origin == EntryOrigin::StagedAdd => return None,
            None => entry.item.clone(),
        };
        self.passes(&item.data).then_some(item)
    }

    /// Visible item for `key` as the caller would see it.
    pub fn display_item(&self, key: &K, buffer: &EditBuffer<K, D>) -> Option<Item<K, D>> {
        let position = self.position_of(key)?;
        self.display(&self.entries[position], buffer)
    }

    /// Merge a freshly fetched base page, then splice pending adds.
    pub fn merge_page(&mut self, page: FetchListResult<K, D>, buffer: &EditBuffer<K, D>) {
        self.base_pages += 1;
        self.base_done = page.done;
        if page.total_filtered_row_count.is_some() {
            self.base_total = page.total_filtered_row_count;
        }
        tracing::trace!(
            items = page.items.len(),
            done = page.done,
            "merging base page"
        );
        if let Some(last) = page.items.last() {
            self.base_frontier = Some(last.data.clone());
        }
        for item in page.items {
            let key = item.key().clone();
            if self.first_base_key.is_none() {
                self.first_base_key = Some(key.clone());
            }
            if self.merged_keys.contains(&key) {
                self.base_keys.insert(key.clone());
                // Already surfaced as a staged add or via an event; only
                // refresh upstream data for non-add entries.
                if let Some(position) = self.position_of(&key) {
                    if self.entries[position].origin != EntryOrigin::StagedAdd {
                        self.entries[position].item = item;
                    }
                }
                continue;
            }
            self.merged_keys.insert(key.clone());
            self.base_keys.insert(key);
            self.entries.push(MergedEntry {
                item,
                origin: EntryOrigin::Base,
            });
        }
        self.splice_adds(buffer);
        self.sort_entries(buffer);
    }

    /// Where an add carrying `data` belongs.
    fn insert_position(&self, data: &D, buffer: &EditBuffer<K, D>) -> usize {
        if self.sorted() {
            let criteria = &self.params.sort_criteria;
            return self
                .entries
                .iter()
                .position(|entry| {
                    compare_by_criteria(self.sort_data(entry, buffer), data, criteria)
                        == Ordering::Greater
                })
                .unwrap_or(self.entries.len());
        }
        self.first_base_key
            .as_ref()
            .and_then(|key| self.position_of(key))
            .unwrap_or(self.entries.len())
    }

    /// Splice staged adds not yet merged.
    ///
    /// Unsubmitted adds are visited before submitting ones. Adds failing the
    /// active filter are left out and reconsidered on the next pass.
    ///
    /// # Returns
    /// Keys spliced in by this call.
    pub fn splice_adds(&mut self, buffer: &EditBuffer<K, D>) -> Vec<K> {
        let mut spliced = Vec::new();
        for edit in buffer.effective_edits() {
            if edit.operation != EditOperation::Add {
                continue;
            }
            let key = edit.key();
            if self.merged_add_keys.contains(key) {
                continue;
            }
            if self.merged_keys.contains(key) {
                self.merged_add_keys.insert(key.clone());
                continue;
            }
            if !self.passes(&edit.item.data) {
                continue;
            }
            let position = self.insert_position(&edit.item.data, buffer);
            self.entries.insert(
                position,
                MergedEntry {
                    item: edit.item.clone(),
                    origin: EntryOrigin::StagedAdd,
                },
            );
            self.merged_keys.insert(key.clone());
            self.merged_add_keys.insert(key.clone());
            spliced.push(key.clone());
        }
        spliced
    }

    /// Eagerly splice one staged add while the iteration is running.
    ///
    /// # Returns
    /// `Some(add_before_key)` when the row was inserted and can be announced
    /// through a mutation event right away; it then counts as delivered.
    /// `None` when it was not inserted or waits for a later page.
    pub fn insert_staged_add(
        &mut self,
        item: &Item<K, D>,
        buffer: &EditBuffer<K, D>,
    ) -> Option<Option<K>> {
        let key = item.key().clone();
        if self.merged_keys.contains(&key) || !self.passes(&item.data) {
            return None;
        }
        let had_pending = self.deliverable_count(buffer) > 0;
        let position = self.insert_position(&item.data, buffer);
        self.entries.insert(
            position,
            MergedEntry {
                item: item.clone(),
                origin: EntryOrigin::StagedAdd,
            },
        );
        self.merged_keys.insert(key.clone());
        self.merged_add_keys.insert(key.clone());
        if !self.surface(&key, had_pending, buffer) {
            return None;
        }
        Some(self.before_key(&key, buffer))
    }

    /// Mark a freshly inserted row delivered when the caller can be told
    /// about it now: it sits between delivered rows, or it is next in line
    /// and nothing else is waiting.
    fn surface(&mut self, key: &K, had_pending: bool, buffer: &EditBuffer<K, D>) -> bool {
        if !self.started() {
            return false;
        }
        let between = self.before_key(key, buffer).is_some();
        let next_in_line = !had_pending
            && self
                .position_of(key)
                .is_some_and(|position| position < self.delivery_bound(buffer));
        if !(between || next_in_line) {
            return false;
        }
        self.delivered.insert(key.clone());
        self.next_offset += 1;
        self.reindex_delivered(buffer);
        true
    }

    /// Key of the next delivered, visible entry after `key`.
    pub fn before_key(&self, key: &K, buffer: &EditBuffer<K, D>) -> Option<K> {
        let position = self.position_of(key)?;
        self.entries[position + 1..]
            .iter()
            .find(|entry| {
                self.delivered.contains(entry.item.key()) && self.display(entry, buffer).is_some()
            })
            .map(|entry| entry.item.key().clone())
    }

    /// Visible position of `key` among delivered entries.
    pub fn visible_index(&self, key: &K, buffer: &EditBuffer<K, D>) -> Option<usize> {
        self.entries
            .iter()
            .filter(|entry| {
                self.delivered.contains(entry.item.key()) && self.display(entry, buffer).is_some()
            })
            .position(|entry| entry.item.key() == key)
    }

    /// Announce a merged row that became visible again, e.g. a reverted
    /// remove or an update entering the filter.
    ///
    /// # Returns
    /// The `add_before_key` hint when the caller should be told now; `None`
    /// when the row is hidden or a later page hands it out.
    pub fn resurface(&mut self, key: &K, buffer: &EditBuffer<K, D>) -> Option<Option<K>> {
        self.display_item(key, buffer)?;
        if self.delivered.contains(key) {
            return Some(self.before_key(key, buffer));
        }
        let before = self.before_key(key, buffer)?;
        self.mark_delivered(key, buffer);
        Some(Some(before))
    }

    /// Record that `key` was surfaced through a mutation event.
    pub fn mark_delivered(&mut self, key: &K, buffer: &EditBuffer<K, D>) {
        if self.merged_keys.contains(key) && self.delivered.insert(key.clone()) {
            self.next_offset += 1;
            self.reindex_delivered(buffer);
        }
    }

    /// Record that `key` was withdrawn from the caller's view.
    pub fn mark_undelivered(&mut self, key: &K, buffer: &EditBuffer<K, D>) {
        if self.delivered.remove(key) {
            self.next_offset = self.next_offset.saturating_sub(1);
            self.reindex_delivered(buffer);
        }
    }

    /// Drop an entry entirely (cancelled add, upstream removal).
    pub fn remove_entry(&mut self, key: &K) -> bool {
        let Some(position) = self.position_of(key) else {
            return false;
        };
        self.entries.remove(position);
        self.merged_keys.remove(key);
        self.merged_add_keys.remove(key);
        self.base_keys.remove(key);
        if self.delivered.remove(key) {
            self.next_offset = self.next_offset.saturating_sub(1);
        }
        self.last_sort_index.remove(key);
        if self.first_base_key.as_ref() == Some(key) {
            self.first_base_key = self
                .entries
                .iter()
                .find(|entry| entry.origin == EntryOrigin::Base)
                .map(|entry| entry.item.key().clone());
        }
        true
    }

    /// Replace upstream data for an existing entry.
    pub fn replace_base(&mut self, item: Item<K, D>) -> bool {
        let Some(position) = self.position_of(item.key()) else {
            return false;
        };
        let entry = &mut self.entries[position];
        entry.item = item;
        if entry.origin == EntryOrigin::StagedAdd {
            entry.origin = EntryOrigin::External;
        }
        true
    }

    /// Insert a row reported by the source, before `before` when known.
    ///
    /// # Returns
    /// Like [`Self::insert_staged_add`]: `Some(add_before_key)` when the row
    /// can be announced right away, `None` when it is already merged or
    /// waits for a later page.
    pub fn insert_external(
        &mut self,
        item: Item<K, D>,
        before: Option<&K>,
        buffer: &EditBuffer<K, D>,
    ) -> Option<Option<K>> {
        let key = item.key().clone();
        if self.merged_keys.contains(&key) {
            return None;
        }
        let had_pending = self.deliverable_count(buffer) > 0;
        let position = match before.and_then(|before| self.position_of(before)) {
            Some(position) => position,
            None if self.sorted() => self.insert_position(&item.data, buffer),
            None => self.entries.len(),
        };
        self.entries.insert(
            position,
            MergedEntry {
                item,
                origin: EntryOrigin::External,
            },
        );
        self.merged_keys.insert(key.clone());
        if !self.surface(&key, had_pending, buffer) {
            return None;
        }
        Some(self.before_key(&key, buffer))
    }

    /// Fold a finished submission into upstream data so the row does not
    /// flicker back to stale data before the source reports the change.
    pub fn apply_submitted(&mut self, operation: EditOperation, item: &Item<K, D>) {
        match operation {
            EditOperation::Remove => {
                self.remove_entry(item.key());
            }
            EditOperation::Add | EditOperation::Update => {
                if let Some(position) = self.position_of(item.key()) {
                    let entry = &mut self.entries[position];
                    entry.item = item.clone();
                    entry.item.metadata.message = None;
                    if entry.origin == EntryOrigin::StagedAdd {
                        entry.origin = EntryOrigin::External;
                    }
                }
            }
        }
    }

    /// Rename `from` to the server-assigned `to`.
    ///
    /// # Returns
    /// `false` when `to` was already merged, in which case the `from` entry
    /// is dropped instead.
    pub fn rename_key(&mut self, from: &K, to: &K) -> bool {
        if self.merged_keys.contains(to) {
            self.remove_entry(from);
            return false;
        }
        let Some(position) = self.position_of(from) else {
            return false;
        };
        let entry = &mut self.entries[position];
        entry.item.metadata.key = to.clone();
        for set in [
            &mut self.merged_keys,
            &mut self.merged_add_keys,
            &mut self.base_keys,
            &mut self.delivered,
        ] {
            if set.remove(from) {
                set.insert(to.clone());
            }
        }
        if let Some(index) = self.last_sort_index.remove(from) {
            self.last_sort_index.insert(to.clone(), index);
        }
        if self.first_base_key.as_ref() == Some(from) {
            self.first_base_key = Some(to.clone());
        }
        true
    }

    /// Stable re-sort by staged-or-upstream data.
    pub fn sort_entries(&mut self, buffer: &EditBuffer<K, D>) {
        if !self.sorted() {
            return;
        }
        let criteria = self.params.sort_criteria.clone();
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(|a, b| {
            compare_by_criteria(self.sort_data(a, buffer), self.sort_data(b, buffer), &criteria)
        });
        self.entries = entries;
    }

    fn reindex_delivered(&mut self, buffer: &EditBuffer<K, D>) {
        let order: Vec<K> = self
            .entries
            .iter()
            .filter(|entry| {
                self.delivered.contains(entry.item.key()) && self.display(entry, buffer).is_some()
            })
            .map(|entry| entry.item.key().clone())
            .collect();
        self.last_sort_index = order
            .into_iter()
            .enumerate()
            .map(|(index, key)| (key, index))
            .collect();
    }

    /// Re-sort and find delivered rows whose place changed.
    ///
    /// Delivered rows now sorted past the first row still waiting for
    /// delivery are withdrawn, since later pages land before them. Among
    /// the rest, rows outside the longest order-preserving subsequence are
    /// reported as moved, with the key they now precede.
    pub fn reconcile_positions(&mut self, buffer: &EditBuffer<K, D>) -> PositionChanges<K, D> {
        let mut changes = PositionChanges {
            moved: Vec::new(),
            withdrawn: Vec::new(),
        };
        if !self.sorted() {
            return changes;
        }
        self.sort_entries(buffer);
        let bound = self.delivery_bound(buffer);
        let frontier = self.entries[..bound]
            .iter()
            .position(|entry| {
                !self.delivered.contains(entry.item.key()) && self.display(entry, buffer).is_some()
            })
            .unwrap_or(bound);

        let mut tracked: Vec<(K, usize, bool)> = Vec::new();
        for (position, entry) in self.entries.iter().enumerate() {
            let key = entry.item.key();
            if !self.delivered.contains(key) || self.display(entry, buffer).is_none() {
                continue;
            }
            if position >= frontier {
                changes.withdrawn.push(key.clone());
            } else if let Some(index) = self.last_sort_index.get(key) {
                let unedited = !buffer.get_item(key).is_some_and(|edit| edit.carries_data());
                tracked.push((key.clone(), *index, unedited));
            }
        }
        for key in &changes.withdrawn {
            self.delivered.remove(key);
            self.next_offset = self.next_offset.saturating_sub(1);
        }

        // Rows whose data did not change keep their place when possible.
        let previous: Vec<usize> = tracked.iter().map(|(_, index, _)| *index).collect();
        let pinned: Vec<bool> = tracked.iter().map(|(_, _, unedited)| *unedited).collect();
        let keep = longest_increasing_positions(&previous, &pinned);
        let flagged: Vec<K> = tracked
            .into_iter()
            .zip(keep)
            .filter(|(_, keep)| !keep)
            .map(|((key, _, _), _)| key)
            .collect();
        self.reindex_delivered(buffer);

        // Re-add from the back so each hint names a row already in place.
        for key in flagged.iter().rev() {
            if let Some(item) = self.display_item(key, buffer) {
                let before = self.before_key(key, buffer);
                changes.moved.push((item, before));
            }
        }
        if !changes.is_empty() {
            tracing::debug!(
                moved = changes.moved.len(),
                withdrawn = changes.withdrawn.len(),
                "rows repositioned after re-sort"
            );
        }
        changes
    }

    /// Index bound past which entries wait for more base data.
    ///
    /// With sort criteria and an unfinished source, later pages only hold
    /// rows sorting at or after the last base row fetched so far. Anything
    /// sorting past that row (a staged add, or a row whose staged update
    /// moved it down) could still be preceded by rows not yet fetched.
    fn delivery_bound(&self, buffer: &EditBuffer<K, D>) -> usize {
        if !self.sorted() || self.base_done {
            return self.entries.len();
        }
        let Some(frontier) = &self.base_frontier else {
            return 0;
        };
        let criteria = &self.params.sort_criteria;
        self.entries
            .iter()
            .rposition(|entry| {
                compare_by_criteria(self.sort_data(entry, buffer), frontier, criteria)
                    != Ordering::Greater
            })
            .map_or(0, |position| position + 1)
    }

    /// Count of visible entries not yet delivered.
    pub fn deliverable_count(&self, buffer: &EditBuffer<K, D>) -> usize {
        self.entries[..self.delivery_bound(buffer)]
            .iter()
            .filter(|entry| {
                !self.delivered.contains(entry.item.key()) && self.display(entry, buffer).is_some()
            })
            .count()
    }

    /// Hand out up to `size` undelivered visible rows in merged order.
    pub fn take_page(&mut self, size: Option<usize>, buffer: &EditBuffer<K, D>) -> Vec<Item<K, D>> {
        let limit = size.unwrap_or(usize::MAX);
        let page: Vec<Item<K, D>> = self.entries[..self.delivery_bound(buffer)]
            .iter()
            .filter(|entry| !self.delivered.contains(entry.item.key()))
            .filter_map(|entry| self.display(entry, buffer))
            .take(limit)
            .collect();
        for item in &page {
            self.delivered.insert(item.key().clone());
        }
        self.next_offset += page.len();
        self.reindex_delivered(buffer);
        page
    }

    /// `true` once the source is exhausted and nothing is left to hand out.
    pub fn is_exhausted(&self, buffer: &EditBuffer<K, D>) -> bool {
        self.base_done && self.deliverable_count(buffer) == 0
    }

    /// Keys of staged updates whose pre-edit data is neither merged nor in
    /// `cache`; only needed while a filter and a source count are active.
    pub fn missing_before_data(
        &self,
        buffer: &EditBuffer<K, D>,
        cache: BeforeData<'_, K, D>,
        misses: &HashSet<K>,
    ) -> Vec<K> {
        if self.filter().is_none() || self.base_total.is_none() {
            return Vec::new();
        }
        buffer
            .effective_edits()
            .into_iter()
            .filter(|edit| edit.operation == EditOperation::Update)
            .map(|edit| edit.key().clone())
            .filter(|key| {
                !cache.contains_key(key) && !misses.contains(key) && self.base_data(key).is_none()
            })
            .collect()
    }

    /// Source count adjusted by staged edits.
    pub fn total_filtered_row_count(
        &self,
        buffer: &EditBuffer<K, D>,
        cache: BeforeData<'_, K, D>,
    ) -> Option<usize> {
        let delta = filtered_count_delta(
            buffer,
            self.filter(),
            |key| {
                cache
                    .get(key)
                    .or_else(|| {
                        self.merged_keys
                            .contains(key)
                            .then(|| self.base_data(key))
                            .flatten()
                    })
                    .cloned()
            },
            |key| self.base_keys.contains(key),
        );
        apply_delta(self.base_total, delta)
    }
}
