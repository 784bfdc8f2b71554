//! Shared test-only helpers for stagedata_core.

use crate::memory::MemoryDataSource;
use crate::models::{Item, MutationDetail, ProviderEvent};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub(crate) type TestItem = Item<String, Value>;
pub(crate) type TestEvent = ProviderEvent<String, Value>;

/// Row `{ "id": key, "n": n }` keyed by `key`.
pub(crate) fn row(key: &str, n: i64) -> TestItem {
    Item::new(key.to_string(), json!({ "id": key, "n": n }))
}

/// Source with rows `r0..r{count}` where `n` equals the index.
pub(crate) fn numbered_source(count: usize, page_size: usize) -> MemoryDataSource {
    let items = (0..count).map(|i| row(&format!("r{}", i), i as i64)).collect();
    MemoryDataSource::new(items).with_page_size(page_size)
}

pub(crate) fn keys(items: &[TestItem]) -> Vec<String> {
    items.iter().map(|item| item.key().clone()).collect()
}

/// Every event currently queued on `receiver`.
///
/// # Panics
/// Panics when the receiver lagged, which means a test published more events
/// than the channel holds.
pub(crate) fn drain(receiver: &mut broadcast::Receiver<TestEvent>) -> Vec<TestEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Empty) => return events,
            Err(err) => panic!("event receiver failed: {err}"),
        }
    }
}

/// Mutation details among `events`, in order.
pub(crate) fn mutations(events: &[TestEvent]) -> Vec<MutationDetail<String, Value>> {
    events
        .iter()
        .filter_map(|event| event.as_mutation().cloned())
        .collect()
}
