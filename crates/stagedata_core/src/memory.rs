//! In-memory [`DataSource`] backed by a vector of items.
//!
//! Used by the CLI and by tests. Pages are computed from a snapshot taken on
//! the first `next()` call, so concurrent mutations show up in the next
//! iteration and through the event stream, never mid-iteration.

use crate::constants::{
    CAPABILITY_FETCH_BY_KEYS, CAPABILITY_FETCH_BY_OFFSET, CAPABILITY_FILTER, CAPABILITY_SORT,
    DEFAULT_EVENT_CAPACITY, DEFAULT_PAGE_SIZE,
};
use crate::error::ProviderError;
use crate::filter::compare_by_criteria;
use crate::models::{
    ContainsKeysResults, EditItem, EditOperation, FetchByKeysParameters, FetchByKeysResults,
    FetchByOffsetParameters, FetchByOffsetResults, FetchListParameters, FetchListResult, Item,
    ItemData, ItemKey, MutationDetail, MutationOperation, ProviderEvent,
};
use crate::source::{Capability, DataSource, Emptiness, SourceIterator};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

type Rows<K, D> = Arc<Mutex<Vec<Item<K, D>>>>;

fn lock_rows<K, D>(rows: &Rows<K, D>) -> Result<MutexGuard<'_, Vec<Item<K, D>>>, ProviderError> {
    rows.lock().map_err(|_| ProviderError::Poisoned)
}

/// Filtered and sorted copy of `rows`.
fn arrange<K: ItemKey, D: ItemData>(
    rows: &[Item<K, D>],
    params: &FetchListParameters<D>,
) -> Vec<Item<K, D>> {
    let mut view: Vec<Item<K, D>> = rows
        .iter()
        .filter(|item| params.filter.as_ref().map_or(true, |f| f.filter(&item.data)))
        .cloned()
        .collect();
    if !params.sort_criteria.is_empty() {
        view.sort_by(|a, b| compare_by_criteria(&a.data, &b.data, &params.sort_criteria));
    }
    view
}

/// Vector-backed source that emits `mutate` events for its own changes.
#[derive(Clone)]
pub struct MemoryDataSource<K = String, D = Value> {
    rows: Rows<K, D>,
    events: broadcast::Sender<ProviderEvent<K, D>>,
    page_size: usize,
    latency: Option<Duration>,
}

impl<K: ItemKey, D: ItemData> MemoryDataSource<K, D> {
    pub fn new(items: Vec<Item<K, D>>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            rows: Arc::new(Mutex::new(items)),
            events,
            page_size: DEFAULT_PAGE_SIZE,
            latency: None,
        }
    }

    /// Cap every page at `page_size` rows, whatever the caller requests.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay every fetch, to exercise abort signals.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Snapshot of all rows in storage order.
    pub fn items(&self) -> Result<Vec<Item<K, D>>, ProviderError> {
        Ok(lock_rows(&self.rows)?.clone())
    }

    pub fn len(&self) -> usize {
        lock_rows(&self.rows).map(|rows| rows.len()).unwrap_or(0)
    }

    fn emit(&self, event: ProviderEvent<K, D>) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Insert `item` before `before` (or at the end) and announce it.
    ///
    /// # Errors
    /// Returns [`ProviderError::EditConflict`] when the key already exists.
    pub fn insert(&self, item: Item<K, D>, before: Option<K>) -> Result<(), ProviderError> {
        {
            let mut rows = lock_rows(&self.rows)?;
            if rows.iter().any(|row| row.key() == item.key()) {
                return Err(ProviderError::conflict(item.key(), "key already exists"));
            }
            let position = before
                .as_ref()
                .and_then(|before| rows.iter().position(|row| row.key() == before))
                .unwrap_or(rows.len());
            rows.insert(position, item.clone());
        }
        let mut op = MutationOperation::default();
        op.push_insert(item, before);
        self.emit(ProviderEvent::Mutate(MutationDetail::add(op)));
        Ok(())
    }

    /// Remove `key` and announce it.
    ///
    /// # Errors
    /// Returns [`ProviderError::NotFound`] when the key does not exist.
    pub fn remove(&self, key: &K) -> Result<Item<K, D>, ProviderError> {
        let removed = {
            let mut rows = lock_rows(&self.rows)?;
            let position = rows
                .iter()
                .position(|row| row.key() == key)
                .ok_or(ProviderError::NotFound)?;
            rows.remove(position)
        };
        self.emit(ProviderEvent::Mutate(MutationDetail::remove(
            MutationOperation::from_keys([key.clone()]),
        )));
        Ok(removed)
    }

    /// Replace the row for `item`'s key and announce it.
    ///
    /// # Errors
    /// Returns [`ProviderError::NotFound`] when the key does not exist.
    pub fn update(&self, item: Item<K, D>) -> Result<(), ProviderError> {
        {
            let mut rows = lock_rows(&self.rows)?;
            let row = rows
                .iter_mut()
                .find(|row| row.key() == item.key())
                .ok_or(ProviderError::NotFound)?;
            *row = item.clone();
        }
        self.emit(ProviderEvent::Mutate(MutationDetail::update(
            MutationOperation::from_items([item]),
        )));
        Ok(())
    }

    /// Apply a submitted edit as a backend would.
    pub fn apply(&self, edit: &EditItem<K, D>) -> Result<(), ProviderError> {
        let mut item = edit.item.clone();
        item.metadata.message = None;
        match edit.operation {
            EditOperation::Add => self.insert(item, None),
            EditOperation::Remove => self.remove(edit.key()).map(|_| ()),
            EditOperation::Update => self.update(item),
        }
    }

    /// Tell subscribers to discard everything they fetched.
    pub fn refresh(&self) {
        self.emit(ProviderEvent::Refresh);
    }

    /// Replace every row without announcing individual mutations.
    pub fn reset(&self, items: Vec<Item<K, D>>) -> Result<(), ProviderError> {
        *lock_rows(&self.rows)? = items;
        self.refresh();
        Ok(())
    }
}

impl MemoryDataSource<String, Value> {
    /// Build a source from JSON objects keyed by `key_attribute`.
    ///
    /// String and number keys are accepted; numbers are stringified.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] when a row has no usable key or two
    /// rows share one.
    pub fn from_values(key_attribute: &str, rows: Vec<Value>) -> Result<Self, ProviderError> {
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let key = match row.get(key_attribute) {
                Some(Value::String(key)) => key.clone(),
                Some(Value::Number(key)) => key.to_string(),
                _ => {
                    return Err(ProviderError::Config(format!(
                        "row {} has no string or number '{}' attribute",
                        index, key_attribute
                    )))
                }
            };
            if !seen.insert(key.clone()) {
                return Err(ProviderError::Config(format!("duplicate key '{}'", key)));
            }
            items.push(Item::new(key, row));
        }
        Ok(Self::new(items))
    }
}

/// Cursor over a snapshot of a [`MemoryDataSource`].
pub struct MemoryIterator<K, D> {
    rows: Rows<K, D>,
    params: FetchListParameters<D>,
    snapshot: Option<Vec<Item<K, D>>>,
    cursor: usize,
    page_size: usize,
    latency: Option<Duration>,
}

impl<K: ItemKey, D: ItemData> SourceIterator for MemoryIterator<K, D> {
    type Key = K;
    type Data = D;

    async fn next(&mut self) -> Result<FetchListResult<K, D>, ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.snapshot.is_none() {
            let rows = lock_rows(&self.rows)?;
            self.snapshot = Some(arrange(&rows, &self.params));
        }
        let snapshot = self.snapshot.as_deref().unwrap_or_default();
        let size = self.params.size.unwrap_or(self.page_size).min(self.page_size).max(1);
        let end = (self.cursor + size).min(snapshot.len());
        let items = snapshot[self.cursor.min(end)..end].to_vec();
        self.cursor = end;
        tracing::trace!(items = items.len(), cursor = self.cursor, "memory page");
        Ok(FetchListResult {
            items,
            done: end >= snapshot.len(),
            fetch_parameters: self.params.clone(),
            total_filtered_row_count: Some(snapshot.len()),
        })
    }
}

impl<K: ItemKey, D: ItemData> DataSource for MemoryDataSource<K, D> {
    type Key = K;
    type Data = D;
    type Iter = MemoryIterator<K, D>;

    fn fetch_first(&self, params: FetchListParameters<D>) -> MemoryIterator<K, D> {
        MemoryIterator {
            rows: Arc::clone(&self.rows),
            params,
            snapshot: None,
            cursor: 0,
            page_size: self.page_size,
            latency: self.latency,
        }
    }

    async fn fetch_by_keys(
        &self,
        params: FetchByKeysParameters<K>,
    ) -> Result<FetchByKeysResults<K, D>, ProviderError> {
        self.simulate_latency().await;
        let results: HashMap<K, Item<K, D>> = {
            let rows = lock_rows(&self.rows)?;
            rows.iter()
                .filter(|row| params.keys.contains(row.key()))
                .map(|row| (row.key().clone(), row.clone()))
                .collect()
        };
        Ok(FetchByKeysResults {
            fetch_parameters: params,
            results,
        })
    }

    async fn fetch_by_offset(
        &self,
        params: FetchByOffsetParameters<D>,
    ) -> Result<FetchByOffsetResults<K, D>, ProviderError> {
        self.simulate_latency().await;
        let view = {
            let rows = lock_rows(&self.rows)?;
            arrange(&rows, &params.list_parameters())
        };
        let size = params.size.unwrap_or(self.page_size);
        let start = params.offset.min(view.len());
        let end = start.saturating_add(size).min(view.len());
        Ok(FetchByOffsetResults {
            results: view[start..end].to_vec(),
            done: end >= view.len(),
            total_filtered_row_count: Some(view.len()),
            fetch_parameters: params,
        })
    }

    async fn contains_keys(
        &self,
        params: FetchByKeysParameters<K>,
    ) -> Result<ContainsKeysResults<K>, ProviderError> {
        self.simulate_latency().await;
        let results: HashSet<K> = {
            let rows = lock_rows(&self.rows)?;
            rows.iter()
                .map(|row| row.key())
                .filter(|key| params.keys.contains(key))
                .cloned()
                .collect()
        };
        Ok(ContainsKeysResults {
            fetch_parameters: params,
            results,
        })
    }

    fn get_capability(&self, name: &str) -> Option<Capability> {
        let implementation = match name {
            CAPABILITY_FETCH_BY_OFFSET => "randomAccess",
            CAPABILITY_FETCH_BY_KEYS => "lookups",
            CAPABILITY_SORT | CAPABILITY_FILTER => "full",
            _ => return None,
        };
        Some(Capability::new(name, implementation))
    }

    async fn get_total_size(&self) -> Result<Option<usize>, ProviderError> {
        Ok(Some(lock_rows(&self.rows)?.len()))
    }

    fn is_empty(&self) -> Emptiness {
        match lock_rows(&self.rows) {
            Ok(rows) if rows.is_empty() => Emptiness::Yes,
            Ok(_) => Emptiness::No,
            Err(_) => Emptiness::Unknown,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent<K, D>> {
        self.events.subscribe()
    }
}
