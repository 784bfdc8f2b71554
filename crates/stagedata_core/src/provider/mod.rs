//! Buffering data provider: stages local edits over a wrapped [`DataSource`]
//! and keeps every read consistent with them.
//!
//! The provider is a cheap handle around shared state. Clones share the same
//! buffer, iterations and event channel.

mod iter;
mod relay;
mod state;

#[cfg(test)]
mod tests;

pub use iter::BufferedIterator;
pub use state::KeyGenerator;
pub(crate) use state::ProviderState;

use crate::abort::abortable;
use crate::buffer::StageOutcome;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::merge::{apply_delta, MergeState};
use crate::models::{
    ContainsKeysResults, EditItem, EditOperation, EditStatus, FetchByKeysParameters,
    FetchByKeysResults, FetchByOffsetParameters, FetchByOffsetResults, FetchListParameters,
    FetchListResult, Item, ItemMessage, MutationDetail, MutationOperation, ProviderEvent,
    SortCriterion,
};
use crate::source::{Capability, DataSource, Emptiness};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

pub(crate) struct Shared<S: DataSource> {
    pub(crate) source: S,
    pub(crate) state: Mutex<ProviderState<S::Key, S::Data>>,
    pub(crate) events: broadcast::Sender<ProviderEvent<S::Key, S::Data>>,
    pub(crate) config: ProviderConfig,
}

impl<S: DataSource> Shared<S> {
    pub(crate) fn lock(
        &self,
    ) -> Result<MutexGuard<'_, ProviderState<S::Key, S::Data>>, ProviderError> {
        self.state.lock().map_err(|_| ProviderError::Poisoned)
    }

    pub(crate) fn dispatch(&self, event: ProviderEvent<S::Key, S::Data>) {
        if let ProviderEvent::Mutate(detail) = &event {
            if detail.is_empty() {
                return;
            }
        }
        // Nobody listening is not an error.
        let _ = self.events.send(event);
    }

    pub(crate) fn dispatch_mutation(&self, mut detail: MutationDetail<S::Key, S::Data>) {
        detail.prune_empty();
        self.dispatch(ProviderEvent::Mutate(detail));
    }
}

/// Decorator over a [`DataSource`] that buffers add/remove/update edits.
pub struct BufferingDataProvider<S: DataSource> {
    pub(crate) shared: Arc<Shared<S>>,
}

impl<S: DataSource> Clone for BufferingDataProvider<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn op_mut<K, D>(slot: &mut Option<MutationOperation<K, D>>) -> &mut MutationOperation<K, D> {
    slot.get_or_insert_with(MutationOperation::default)
}

impl<S: DataSource> BufferingDataProvider<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, ProviderConfig::default())
    }

    pub fn with_config(source: S, config: ProviderConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                source,
                state: Mutex::new(ProviderState::new()),
                events,
                config,
            }),
        }
    }

    /// Install the generator used by [`Self::add_new_item`].
    pub fn with_key_generator(
        self,
        generator: impl Fn(&S::Data) -> S::Key + Send + Sync + 'static,
    ) -> Self {
        match self.shared.lock() {
            Ok(mut state) => state.key_generator = Some(Arc::new(generator)),
            Err(err) => tracing::warn!(error = %err, "key generator not installed"),
        }
        self
    }

    pub fn source(&self) -> &S {
        &self.shared.source
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.shared.config
    }

    /// Subscribe to this provider's events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent<S::Key, S::Data>> {
        self.shared.events.subscribe()
    }

    /// Start a new merged iteration.
    ///
    /// # Errors
    /// Returns [`ProviderError::Poisoned`] when shared state is poisoned.
    pub fn fetch_first(
        &self,
        params: FetchListParameters<S::Data>,
    ) -> Result<BufferedIterator<S>, ProviderError> {
        let id = self.shared.lock()?.begin_iteration(params.clone());
        let base = self.shared.source.fetch_first(params.clone());
        tracing::debug!(iteration = id, sort = ?params.sort_criteria, "iteration started");
        Ok(BufferedIterator::new(id, base, Arc::clone(&self.shared), params))
    }

    /// Sort criteria of the most recent `fetch_first`.
    pub fn last_sort_criteria(&self) -> Result<Vec<SortCriterion>, ProviderError> {
        Ok(self.shared.lock()?.last_sort_criteria.clone())
    }

    /// Look up `params.keys`, answering from staged edits first.
    ///
    /// Keys staged for removal are reported as missing.
    pub async fn fetch_by_keys(
        &self,
        params: FetchByKeysParameters<S::Key>,
    ) -> Result<FetchByKeysResults<S::Key, S::Data>, ProviderError> {
        let signal = params.signal.clone();
        abortable(signal.as_ref(), async {
            let (mut results, remaining) = {
                let state = self.shared.lock()?;
                let mut results = HashMap::new();
                let mut remaining = Vec::new();
                for key in &params.keys {
                    match state.buffer.get_item(key) {
                        Some(edit) if edit.operation == EditOperation::Remove => {}
                        Some(edit) => {
                            results.insert(key.clone(), edit.item.clone());
                        }
                        None => remaining.push(key.clone()),
                    }
                }
                (results, remaining)
            };
            if !remaining.is_empty() {
                let mut delegated = params.clone();
                delegated.keys = remaining;
                let fetched = self.shared.source.fetch_by_keys(delegated).await?;
                results.extend(fetched.results);
            }
            Ok::<_, ProviderError>(FetchByKeysResults {
                fetch_parameters: params.clone(),
                results,
            })
        })
        .await
    }

    /// Which of `params.keys` exist once staged edits are applied.
    pub async fn contains_keys(
        &self,
        params: FetchByKeysParameters<S::Key>,
    ) -> Result<ContainsKeysResults<S::Key>, ProviderError> {
        let signal = params.signal.clone();
        abortable(signal.as_ref(), async {
            let (mut results, remaining) = {
                let state = self.shared.lock()?;
                let mut results = HashSet::new();
                let mut remaining = Vec::new();
                for key in &params.keys {
                    match state.buffer.get_item(key) {
                        Some(edit) if edit.operation == EditOperation::Remove => {}
                        Some(_) => {
                            results.insert(key.clone());
                        }
                        None => remaining.push(key.clone()),
                    }
                }
                (results, remaining)
            };
            if !remaining.is_empty() {
                let mut delegated = params.clone();
                delegated.keys = remaining;
                let fetched = self.shared.source.contains_keys(delegated).await?;
                results.extend(fetched.results);
            }
            Ok::<_, ProviderError>(ContainsKeysResults {
                fetch_parameters: params.clone(),
                results,
            })
        })
        .await
    }

    /// Fetch an offset window with staged edits applied.
    ///
    /// The window is cut from the same merged view an iteration with these
    /// parameters would produce: staged adds lead without sort criteria and
    /// sit at their sorted place with them, updated rows sort by their
    /// staged data, removed rows are skipped. Base windows are fetched from
    /// the start until the merged view covers `offset + size` rows or the
    /// source is done.
    pub async fn fetch_by_offset(
        &self,
        params: FetchByOffsetParameters<S::Data>,
    ) -> Result<FetchByOffsetResults<S::Key, S::Data>, ProviderError> {
        let signal = params.signal.clone();
        abortable(signal.as_ref(), self.fetch_window(params)).await
    }

    async fn fetch_window(
        &self,
        params: FetchByOffsetParameters<S::Data>,
    ) -> Result<FetchByOffsetResults<S::Key, S::Data>, ProviderError> {
        let size = params.size.unwrap_or(self.shared.config.page_size);
        let wanted = params.offset.saturating_add(size);
        let mut merge = MergeState::new(params.list_parameters());
        let mut base_offset = 0;
        let mut available = 0;

        loop {
            let mut window = params.clone();
            window.offset = base_offset;
            window.size = Some(size.max(wanted.saturating_sub(available)).max(1));
            let fetched = self.shared.source.fetch_by_offset(window).await?;
            let count = fetched.results.len();
            base_offset += count;
            let done = fetched.done || count == 0;
            let page = FetchListResult {
                items: fetched.results,
                done,
                fetch_parameters: merge.params().clone(),
                total_filtered_row_count: fetched.total_filtered_row_count,
            };
            {
                let state = self.shared.lock()?;
                merge.merge_page(page, &state.buffer);
                available = merge.deliverable_count(&state.buffer);
            }
            tracing::trace!(count, base_offset, available, done, "offset window merged");
            if done || available >= wanted {
                break;
            }
        }

        let missing = {
            let state = self.shared.lock()?;
            merge.missing_before_data(
                &state.buffer,
                &state.data_before_updated,
                &state.before_misses,
            )
        };
        if !missing.is_empty() {
            let mut fetched = self
                .shared
                .source
                .fetch_by_keys(FetchByKeysParameters::new(missing.clone()))
                .await?;
            let mut state = self.shared.lock()?;
            for key in missing {
                match fetched.results.remove(&key) {
                    Some(item) => {
                        state.data_before_updated.insert(key, item.data);
                    }
                    None => {
                        state.before_misses.insert(key);
                    }
                }
            }
        }

        let (results, done, total) = {
            let state = self.shared.lock()?;
            let merged = merge.take_page(None, &state.buffer);
            let done = merge.base_done() && merged.len() <= wanted;
            let total = merge.total_filtered_row_count(&state.buffer, &state.data_before_updated);
            let results: Vec<Item<S::Key, S::Data>> =
                merged.into_iter().skip(params.offset).take(size).collect();
            (results, done, total)
        };

        Ok(FetchByOffsetResults {
            fetch_parameters: params,
            results,
            done,
            total_filtered_row_count: total,
        })
    }

    pub fn get_capability(&self, name: &str) -> Option<Capability> {
        self.shared.source.get_capability(name)
    }

    /// Source size plus pending adds minus pending removes.
    pub async fn get_total_size(&self) -> Result<Option<usize>, ProviderError> {
        let total = self.shared.source.get_total_size().await?;
        let delta = {
            let state = self.shared.lock()?;
            state
                .buffer
                .effective_edits()
                .iter()
                .map(|edit| match edit.operation {
                    EditOperation::Add => 1,
                    EditOperation::Remove => -1,
                    EditOperation::Update => 0,
                })
                .sum::<i64>()
        };
        Ok(apply_delta(total, delta))
    }

    /// Emptiness with staged edits taken into account.
    pub fn is_empty(&self) -> Emptiness {
        let Ok(state) = self.shared.lock() else {
            return Emptiness::Unknown;
        };
        let edits = state.buffer.effective_edits();
        drop(state);
        if edits.iter().any(|edit| edit.operation == EditOperation::Add) {
            return Emptiness::No;
        }
        let removes_pending = edits.iter().any(|edit| edit.operation == EditOperation::Remove);
        match self.shared.source.is_empty() {
            Emptiness::No if removes_pending => Emptiness::Unknown,
            other => other,
        }
    }

    /// Stage an add of `item`.
    ///
    /// # Errors
    /// Returns [`ProviderError::EditConflict`] when an add or update for the
    /// key is already pending or submitting.
    pub fn add_item(&self, item: Item<S::Key, S::Data>) -> Result<(), ProviderError> {
        let key = item.key().clone();
        let (detail, submittable) = {
            let mut guard = self.shared.lock()?;
            let state = &mut *guard;
            let outcome = state.buffer.add_item(item.clone())?;
            tracing::debug!(key = ?key, ?outcome, "staged add");

            let latest = state.latest_iteration;
            let mut before: Option<Option<S::Key>> = None;
            match outcome {
                StageOutcome::RemoveTransformed => {
                    before = match latest.and_then(|id| state.iterations.get_mut(&id)) {
                        None => Some(None),
                        Some(merge) => merge.resurface(&key, &state.buffer),
                    };
                }
                _ => {
                    for (id, merge) in state.iterations.iter_mut() {
                        let inserted = merge.insert_staged_add(&item, &state.buffer);
                        if Some(*id) == latest && merge.started() {
                            before = inserted;
                        }
                    }
                    if latest.is_none() {
                        before = Some(None);
                    }
                }
            }

            let mut detail = MutationDetail::default();
            if let Some(before) = before {
                let add = op_mut(&mut detail.add);
                add.push_insert(item, before);
                add.set_last_index(state.latest_index(&key));
            }
            (detail, state.buffer.submittable_items())
        };
        self.shared.dispatch_mutation(detail);
        self.shared.dispatch(ProviderEvent::SubmittableChange(submittable));
        Ok(())
    }

    /// Stage an add of `data` under a key from the key generator.
    ///
    /// # Errors
    /// Returns [`ProviderError::MissingKeyGenerator`] when none is installed.
    pub fn add_new_item(&self, data: S::Data) -> Result<S::Key, ProviderError> {
        let generator = self
            .shared
            .lock()?
            .key_generator
            .clone()
            .ok_or(ProviderError::MissingKeyGenerator)?;
        let key = generator(&data);
        self.add_item(Item::new(key.clone(), data))?;
        Ok(key)
    }

    /// Stage a remove of `item`.
    ///
    /// Removing a pending add cancels it without reaching the source.
    ///
    /// # Errors
    /// Returns [`ProviderError::EditConflict`] when a remove is already
    /// staged or the key's add is still submitting.
    pub fn remove_item(&self, item: Item<S::Key, S::Data>) -> Result<(), ProviderError> {
        let key = item.key().clone();
        let (index, submittable) = {
            let mut state = self.shared.lock()?;
            let index = state.latest_index(&key);
            let outcome = state.buffer.remove_item(item.clone())?;
            tracing::debug!(key = ?key, ?outcome, "staged remove");
            if outcome == StageOutcome::AddCancelled {
                state.forget_adds([&key]);
            }
            (index, state.buffer.submittable_items())
        };
        let mut remove = MutationOperation::from_items([item]);
        remove.set_last_index(index);
        self.shared.dispatch_mutation(MutationDetail::remove(remove));
        self.shared.dispatch(ProviderEvent::SubmittableChange(submittable));
        Ok(())
    }

    /// Stage an update of `item`.
    ///
    /// With a filter, an update that leaves the filter surfaces as a remove
    /// and one that enters it as an add. With sort criteria, rows whose
    /// order changed surface as remove plus add at the new position.
    ///
    /// # Errors
    /// Returns [`ProviderError::EditConflict`] when the key is staged for
    /// removal or already submitting.
    pub fn update_item(&self, item: Item<S::Key, S::Data>) -> Result<(), ProviderError> {
        let key = item.key().clone();
        let (detail, submittable) = {
            let mut guard = self.shared.lock()?;
            let state = &mut *guard;
            let prior_index = state.latest_index(&key);
            let outcome = state.buffer.update_item(item.clone())?;
            tracing::debug!(key = ?key, ?outcome, "staged update");

            let mut detail = MutationDetail::default();
            let latest = state.latest_iteration;
            let buffer = &state.buffer;
            match latest.and_then(|id| state.iterations.get_mut(&id)) {
                None => detail.update = Some(MutationOperation::from_items([item.clone()])),
                Some(merge) => {
                    let shown = merge.display_item(&key, buffer);
                    let was_delivered = merge.is_delivered(&key);
                    if shown.is_none() && was_delivered {
                        merge.mark_undelivered(&key, buffer);
                        let remove = op_mut(&mut detail.remove);
                        remove.push_key(key.clone());
                        remove.set_last_index(prior_index);
                    }
                    let changes = merge.reconcile_positions(buffer);
                    let repositioned = changes.touches(&key);
                    changes.append_to(&mut detail);
                    match shown {
                        Some(shown) if was_delivered => {
                            if !repositioned {
                                op_mut(&mut detail.update).push_item(shown);
                            }
                        }
                        Some(shown) => {
                            if let Some(before) = merge.resurface(&key, buffer) {
                                let add = op_mut(&mut detail.add);
                                add.push_insert(shown, before);
                                add.set_last_index(merge.visible_index(&key, buffer));
                            }
                        }
                        None => {
                            let unmerged_add = outcome
                                == StageOutcome::ReplacedInPlace(EditOperation::Add)
                                && !merge.contains_key(&key);
                            if unmerged_add {
                                if let Some(before) = merge.insert_staged_add(&item, buffer) {
                                    let add = op_mut(&mut detail.add);
                                    add.push_insert(item.clone(), before);
                                    add.set_last_index(merge.visible_index(&key, buffer));
                                }
                            }
                        }
                    }
                }
            }
            (detail, state.buffer.submittable_items())
        };
        self.shared.dispatch_mutation(detail);
        self.shared.dispatch(ProviderEvent::SubmittableChange(submittable));
        Ok(())
    }

    /// Unsubmitted edits whose key has nothing in flight.
    pub fn submittable_items(&self) -> Result<Vec<EditItem<S::Key, S::Data>>, ProviderError> {
        Ok(self.shared.lock()?.buffer.submittable_items())
    }

    /// Status of the most current edit for `key`.
    pub fn edit_item_status(&self, key: &S::Key) -> Result<Option<EditStatus>, ProviderError> {
        Ok(self.shared.lock()?.buffer.edit_item_status(key))
    }

    /// `true` when the key's update came from an add over a pending remove.
    pub fn is_update_transformed(&self, key: &S::Key) -> Result<bool, ProviderError> {
        Ok(self.shared.lock()?.buffer.is_update_transformed(key))
    }

    /// `true` when no edit is unsubmitted or submitting.
    pub fn is_buffer_empty(&self) -> Result<bool, ProviderError> {
        Ok(self.shared.lock()?.buffer.is_empty())
    }

    /// Advance the submission status of `edit`.
    ///
    /// `new_keys` maps temporary keys of client-keyed adds to the keys the
    /// backend assigned; the merged row is renamed and surfaces as
    /// `remove(temp)` plus `add(server)`. Reverting to `Unsubmitted` with a
    /// `message` surfaces as an update carrying the message.
    ///
    /// # Errors
    /// Returns [`ProviderError::NotFound`] when the edit is not in the
    /// expected state, or [`ProviderError::EditConflict`] when another edit
    /// for the key is already submitting.
    pub fn set_item_status(
        &self,
        edit: &EditItem<S::Key, S::Data>,
        status: EditStatus,
        message: Option<ItemMessage>,
        new_keys: Option<&HashMap<S::Key, S::Key>>,
    ) -> Result<(), ProviderError> {
        let (detail, submittable) = {
            let mut guard = self.shared.lock()?;
            let state = &mut *guard;
            let changed = state.buffer.set_item_status(edit, status, message)?;
            let key = changed.key().clone();
            tracing::debug!(key = ?key, ?status, operation = ?changed.operation, "edit status changed");

            let mut detail = MutationDetail::default();
            match status {
                EditStatus::Submitting => {}
                EditStatus::Submitted => {
                    for merge in state.iterations.values_mut() {
                        merge.apply_submitted(changed.operation, &changed.item);
                    }
                    let server_key = new_keys
                        .and_then(|keys| keys.get(&key))
                        .filter(|server| **server != key)
                        .cloned();
                    if let (EditOperation::Add, Some(server)) = (changed.operation, server_key) {
                        let prior_index = state.latest_index(&key);
                        state.buffer.remap_key(&key, server.clone());
                        state.generated_keys.insert(server.clone(), key.clone());
                        let latest = state.latest_iteration;
                        let mut before = if latest.is_none() { Some(None) } else { None };
                        for (id, merge) in state.iterations.iter_mut() {
                            let renamed = merge.rename_key(&key, &server);
                            if renamed && Some(*id) == latest && merge.is_delivered(&server) {
                                before = Some(merge.before_key(&server, &state.buffer));
                            }
                        }
                        let remove = op_mut(&mut detail.remove);
                        remove.push_key(key.clone());
                        remove.set_last_index(prior_index);
                        if let Some(before) = before {
                            let renamed_item = changed.item.clone().with_key(server.clone());
                            let add = op_mut(&mut detail.add);
                            add.push_insert(renamed_item, before);
                            add.set_last_index(state.latest_index(&server));
                        }
                        tracing::debug!(temp = ?key, server = ?server, "key remapped");
                    }
                }
                EditStatus::Unsubmitted => {
                    if changed.carries_data() {
                        op_mut(&mut detail.update).push_item(changed.item.clone());
                    }
                }
            }
            (detail, state.buffer.submittable_items())
        };
        self.shared.dispatch_mutation(detail);
        self.shared.dispatch(ProviderEvent::SubmittableChange(submittable));
        Ok(())
    }

    /// Drop every unsubmitted edit and dispatch a single `refresh`.
    pub fn reset_all_unsubmitted_items(&self) -> Result<(), ProviderError> {
        let submittable = {
            let mut state = self.shared.lock()?;
            let dropped = state.buffer.reset_all_unsubmitted_items();
            let cancelled: Vec<S::Key> = dropped
                .iter()
                .filter(|edit| edit.operation == EditOperation::Add)
                .map(|edit| edit.key().clone())
                .collect();
            state.forget_adds(cancelled.iter());
            tracing::debug!(dropped = dropped.len(), "reset all unsubmitted edits");
            state.buffer.submittable_items()
        };
        self.shared.dispatch(ProviderEvent::Refresh);
        self.shared.dispatch(ProviderEvent::SubmittableChange(submittable));
        Ok(())
    }

    /// Drop the unsubmitted edit for `key` and restore the source's version.
    ///
    /// The row is fetched fresh from the source, so the caller sees current
    /// upstream data rather than what was cached when the edit was staged.
    ///
    /// # Returns
    /// `false` when `key` had no unsubmitted edit.
    pub async fn reset_unsubmitted_item(&self, key: &S::Key) -> Result<bool, ProviderError> {
        let (dropped, prior_index) = {
            let mut state = self.shared.lock()?;
            let prior_index = state.latest_index(key);
            let dropped = state.buffer.reset_unsubmitted_item(key);
            if let Some(edit) = &dropped {
                if edit.operation == EditOperation::Add {
                    state.forget_adds([key]);
                }
            }
            (dropped, prior_index)
        };
        let Some(dropped) = dropped else {
            return Ok(false);
        };
        tracing::debug!(key = ?key, operation = ?dropped.operation, "reset unsubmitted edit");

        let mut detail = MutationDetail::default();
        if dropped.operation == EditOperation::Add {
            let remove = op_mut(&mut detail.remove);
            remove.push_key(key.clone());
            remove.set_last_index(prior_index);
        } else {
            let mut fetched = self
                .shared
                .source
                .fetch_by_keys(FetchByKeysParameters::new(vec![key.clone()]))
                .await?;
            let fresh = fetched.results.remove(key);

            let mut guard = self.shared.lock()?;
            let state = &mut *guard;
            state.data_before_updated.remove(key);
            state.before_misses.remove(key);
            match fresh {
                None => {
                    for merge in state.iterations.values_mut() {
                        merge.remove_entry(key);
                    }
                    op_mut(&mut detail.remove).push_key(key.clone());
                }
                Some(fresh) => {
                    for merge in state.iterations.values_mut() {
                        merge.replace_base(fresh.clone());
                    }
                    // A submitting edit still decides what the caller sees.
                    let shown = match state.buffer.get_item(key) {
                        Some(edit) if edit.carries_data() => edit.item.clone(),
                        _ => fresh,
                    };
                    if dropped.operation == EditOperation::Update {
                        op_mut(&mut detail.update).push_item(shown);
                    } else {
                        let latest = state.latest_iteration;
                        let before = match latest.and_then(|id| state.iterations.get_mut(&id)) {
                            None => Some(None),
                            Some(merge) => merge.resurface(key, &state.buffer),
                        };
                        if let Some(before) = before {
                            let add = op_mut(&mut detail.add);
                            add.push_insert(shown, before);
                            add.set_last_index(state.latest_index(key));
                        }
                    }
                }
            }
        }
        let submittable = self.shared.lock()?.buffer.submittable_items();
        self.shared.dispatch_mutation(detail);
        self.shared.dispatch(ProviderEvent::SubmittableChange(submittable));
        Ok(true)
    }
}

impl<S> BufferingDataProvider<S>
where
    S: DataSource,
    S::Key: From<String>,
{
    /// Use random UUIDv4 strings for client-assigned keys.
    pub fn with_uuid_keys(self) -> Self {
        self.with_key_generator(|_| <S::Key as From<String>>::from(uuid::Uuid::new_v4().to_string()))
    }
}
