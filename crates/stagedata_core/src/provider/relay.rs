//! Reconciles the wrapped source's events with staged edits before passing
//! them on.

use super::{op_mut, BufferingDataProvider};
use crate::error::ProviderError;
use crate::models::{EditOperation, EditStatus, FetchByKeysParameters, MutationDetail, ProviderEvent};
use crate::source::DataSource;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

impl<S: DataSource> BufferingDataProvider<S> {
    /// Spawn a task that consumes the source's events and relays them.
    ///
    /// The task holds a weak reference and exits once every provider handle
    /// is dropped or the source's channel closes.
    pub fn relay_source_events(&self) -> JoinHandle<()> {
        let mut receiver = self.shared.source.subscribe();
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            loop {
                let received = receiver.recv().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let provider = BufferingDataProvider { shared };
                let event = match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "source events lagged; treating as refresh");
                        ProviderEvent::Refresh
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Err(err) = provider.handle_source_event(event).await {
                    tracing::warn!(error = %err, "failed to relay source event");
                }
            }
            tracing::debug!("source event relay stopped");
        })
    }

    /// Reconcile one source event and dispatch what remains of it.
    pub async fn handle_source_event(
        &self,
        event: ProviderEvent<S::Key, S::Data>,
    ) -> Result<(), ProviderError> {
        match event {
            ProviderEvent::Mutate(detail) => self.handle_source_mutation(detail),
            ProviderEvent::Refresh => self.handle_source_refresh().await,
            // Sources have no staged edits of their own to report.
            ProviderEvent::SubmittableChange(_) => Ok(()),
        }
    }

    /// Fold a source `mutate` into the merge states and forward the parts
    /// not already accounted for by local edits.
    ///
    /// - remove: suppressed when it confirms a local submission; a pending
    ///   local remove of the same key is dropped as redundant.
    /// - add: suppressed when it confirms a local submission or the row is
    ///   already shown; otherwise inserted at the source's hint.
    /// - update: upstream data is refreshed, but the event is suppressed
    ///   while a local edit still decides what the caller sees.
    pub fn handle_source_mutation(
        &self,
        detail: MutationDetail<S::Key, S::Data>,
    ) -> Result<(), ProviderError> {
        let (relayed, submittable) = {
            let mut guard = self.shared.lock()?;
            let state = &mut *guard;
            let mut relayed = MutationDetail::default();
            let mut buffer_changed = false;

            if let Some(mut remove) = detail.remove {
                remove.indexes = remove
                    .keys
                    .iter()
                    .map(|key| state.latest_index(key))
                    .collect::<Option<Vec<usize>>>()
                    .unwrap_or_default();
                let buffer = &mut state.buffer;
                let iterations = &mut state.iterations;
                let before_cache = &mut state.data_before_updated;
                let generated_keys = &mut state.generated_keys;
                remove.retain_keys(|key| {
                    let confirmed = buffer.set_item_mutated(key).is_some();
                    let redundant = buffer.edit_item_status(key) == Some(EditStatus::Unsubmitted)
                        && buffer
                            .get_item(key)
                            .is_some_and(|edit| edit.operation == EditOperation::Remove);
                    if redundant {
                        buffer.reset_unsubmitted_item(key);
                        buffer_changed = true;
                    }
                    for merge in iterations.values_mut() {
                        merge.remove_entry(key);
                    }
                    before_cache.remove(key);
                    generated_keys.remove(key);
                    !(confirmed || redundant)
                });
                relayed.remove = Some(remove);
            }

            if let Some(add) = detail.add {
                let latest = state.latest_iteration;
                for index in 0..add.len() {
                    let Some(item) = add.item_at(index) else {
                        tracing::warn!(key = ?add.keys[index], "source add without data dropped");
                        continue;
                    };
                    let key = item.key().clone();
                    // The first source add under a server-assigned key is the
                    // submission itself; later ones are genuine.
                    let confirmed = state.buffer.set_item_mutated(&key).is_some();
                    let remapped = state.generated_keys.remove(&key).is_some();
                    let local = confirmed || remapped;
                    let hint = add.add_before_keys.get(index).cloned().flatten();
                    let mut before = if latest.is_none() {
                        Some(hint.clone())
                    } else {
                        None
                    };
                    for (id, merge) in state.iterations.iter_mut() {
                        if merge.contains_key(&key) {
                            merge.replace_base(item.clone());
                            continue;
                        }
                        if local {
                            continue;
                        }
                        // Unsorted rows hinted past the merged prefix arrive
                        // with a later base page.
                        let sorted = !merge.params().sort_criteria.is_empty();
                        let placeable = sorted
                            || hint
                                .as_ref()
                                .map_or(merge.base_done(), |hint| merge.contains_key(hint));
                        if !placeable {
                            continue;
                        }
                        let hint = if sorted { None } else { hint.as_ref() };
                        let surfaced = merge.insert_external(item.clone(), hint, &state.buffer);
                        if Some(*id) == latest {
                            before = surfaced;
                        }
                    }
                    if local {
                        tracing::debug!(key = ?key, "source add matches a local submission");
                        continue;
                    }
                    if let Some(before) = before {
                        let shown = match state.buffer.get_item(&key) {
                            Some(edit) if edit.carries_data() => edit.item.clone(),
                            _ => item,
                        };
                        let relayed_add = op_mut(&mut relayed.add);
                        relayed_add.push_insert(shown, before);
                        relayed_add.set_last_index(state.latest_index(&key));
                    }
                }
            }

            if let Some(update) = detail.update {
                for index in 0..update.len() {
                    let Some(item) = update.item_at(index) else {
                        continue;
                    };
                    let key = item.key().clone();
                    let confirmed = state.buffer.set_item_mutated(&key).is_some();
                    let edited = state.buffer.get_item(&key).is_some();
                    for merge in state.iterations.values_mut() {
                        merge.replace_base(item.clone());
                    }
                    if edited {
                        state.data_before_updated.insert(key.clone(), item.data.clone());
                        state.before_misses.remove(&key);
                    }
                    if !(confirmed || edited) {
                        op_mut(&mut relayed.update).push_item(item);
                    }
                }
            }

            let submittable = buffer_changed.then(|| state.buffer.submittable_items());
            (relayed, submittable)
        };
        self.shared.dispatch_mutation(relayed);
        if let Some(submittable) = submittable {
            self.shared
                .dispatch(ProviderEvent::SubmittableChange(submittable));
        }
        Ok(())
    }

    /// Handle a source `refresh`.
    ///
    /// Cached pre-edit data is purged. With pruning enabled, unsubmitted
    /// removes and updates whose keys no longer exist upstream are dropped.
    pub async fn handle_source_refresh(&self) -> Result<(), ProviderError> {
        let candidates: Vec<S::Key> = if self.shared.config.prune_on_refresh {
            let state = self.shared.lock()?;
            state
                .buffer
                .unsubmitted_items()
                .into_iter()
                .filter(|edit| {
                    edit.operation != EditOperation::Add
                        && !state.buffer.is_update_transformed(edit.key())
                })
                .map(|edit| edit.key().clone())
                .collect()
        } else {
            Vec::new()
        };

        let missing: Vec<S::Key> = if candidates.is_empty() {
            Vec::new()
        } else {
            let found = self
                .shared
                .source
                .contains_keys(FetchByKeysParameters::new(candidates.clone()))
                .await?
                .results;
            candidates
                .into_iter()
                .filter(|key| !found.contains(key))
                .collect()
        };

        let submittable = {
            let mut state = self.shared.lock()?;
            for key in &missing {
                state.buffer.reset_unsubmitted_item(key);
                state.forget_adds([key]);
            }
            state.data_before_updated.clear();
            state.before_misses.clear();
            (!missing.is_empty()).then(|| state.buffer.submittable_items())
        };
        if !missing.is_empty() {
            tracing::warn!(count = missing.len(), "dropped edits for keys gone upstream");
        }
        self.shared.dispatch(ProviderEvent::Refresh);
        if let Some(submittable) = submittable {
            self.shared
                .dispatch(ProviderEvent::SubmittableChange(submittable));
        }
        Ok(())
    }
}
