//! Key lookups, offset windows and size queries.

use super::*;
use crate::abort::AbortController;
use crate::constants::CAPABILITY_FETCH_BY_OFFSET;
use crate::memory::MemoryDataSource;
use crate::source::{Capability, Emptiness};
use std::time::Duration;

fn lookup(keys: &[&str]) -> FetchByKeysParameters<String> {
    FetchByKeysParameters::new(keys.iter().map(|k| key(k)).collect())
}

#[tokio::test]
async fn key_lookups_prefer_staged_edits() {
    let provider = provider_over(3, 10);
    provider.add_item(row("x", 50)).expect("add");
    provider.update_item(row("r1", 11)).expect("update");
    provider.remove_item(row("r2", 2)).expect("remove");

    let found = provider
        .fetch_by_keys(lookup(&["x", "r0", "r1", "r2", "nope"]))
        .await
        .expect("lookup");
    assert_eq!(found.results.len(), 3);
    assert_eq!(found.results["x"].data["n"], 50);
    assert_eq!(found.results["r0"].data["n"], 0);
    assert_eq!(found.results["r1"].data["n"], 11);
    assert!(!found.results.contains_key("r2"));

    let present = provider
        .contains_keys(lookup(&["x", "r0", "r2", "nope"]))
        .await
        .expect("contains");
    let mut present: Vec<String> = present.results.into_iter().collect();
    present.sort();
    assert_eq!(present, vec!["r0", "x"]);
}

#[tokio::test]
async fn offset_windows_put_adds_first() {
    let provider = provider_over(5, 10);
    provider.add_item(row("x", 90)).expect("add");
    provider.add_item(row("y", 91)).expect("add");

    let first = provider
        .fetch_by_offset(FetchByOffsetParameters::window(0, 3))
        .await
        .expect("window");
    assert_eq!(keys(&first.results), vec!["x", "y", "r0"]);
    assert!(!first.done);
    assert_eq!(first.total_filtered_row_count, Some(7));

    let second = provider
        .fetch_by_offset(FetchByOffsetParameters::window(3, 3))
        .await
        .expect("window");
    assert_eq!(keys(&second.results), vec!["r1", "r2", "r3"]);

    let last = provider
        .fetch_by_offset(FetchByOffsetParameters::window(6, 3))
        .await
        .expect("window");
    assert_eq!(keys(&last.results), vec!["r4"]);
    assert!(last.done);
}

#[tokio::test]
async fn sorted_offset_windows_place_adds_by_value() {
    let provider = provider_over(5, 10);
    provider.add_item(row("x", 90)).expect("add");
    let sorted = |offset, size| {
        FetchByOffsetParameters::window(offset, size).with_sort(SortCriterion::ascending("n"))
    };

    let first = provider.fetch_by_offset(sorted(0, 3)).await.expect("window");
    assert_eq!(keys(&first.results), vec!["r0", "r1", "r2"]);
    assert!(!first.done);
    assert_eq!(first.total_filtered_row_count, Some(6));

    let last = provider.fetch_by_offset(sorted(3, 3)).await.expect("window");
    assert_eq!(keys(&last.results), vec!["r3", "r4", "x"]);
    assert!(last.done);

    let rows = collect_all(
        &provider,
        FetchListParameters::default().with_sort(SortCriterion::ascending("n")),
    )
    .await;
    assert_eq!(keys(&rows), vec!["r0", "r1", "r2", "r3", "r4", "x"]);
}

#[tokio::test]
async fn sorted_offset_window_orders_updates_by_staged_data() {
    let provider = provider_over(3, 10);
    provider.update_item(row("r0", 10)).expect("update");

    let window = provider
        .fetch_by_offset(
            FetchByOffsetParameters::window(0, 3).with_sort(SortCriterion::ascending("n")),
        )
        .await
        .expect("window");
    assert_eq!(keys(&window.results), vec!["r1", "r2", "r0"]);
    assert_eq!(window.results[2].data["n"], 10);
    assert!(window.done);
}

#[tokio::test]
async fn offset_window_refills_after_hidden_rows() {
    let provider = provider_over(5, 10);
    provider.remove_item(row("r1", 1)).expect("remove");
    provider.update_item(row("r2", 20)).expect("update");

    let window = provider
        .fetch_by_offset(FetchByOffsetParameters::window(0, 3))
        .await
        .expect("window");
    assert_eq!(keys(&window.results), vec!["r0", "r2", "r3"]);
    assert_eq!(window.results[1].data["n"], 20);
    assert_eq!(window.total_filtered_row_count, Some(4));
}

#[tokio::test]
async fn filtered_offset_window_skips_updates_leaving_the_filter() {
    let provider = provider_over(5, 10);
    provider.update_item(row("r3", 0)).expect("update");

    let window = provider
        .fetch_by_offset(FetchByOffsetParameters::window(0, 10).with_filter(min_n(2)))
        .await
        .expect("window");
    assert_eq!(keys(&window.results), vec!["r2", "r4"]);
    assert_eq!(window.total_filtered_row_count, Some(2));
}

#[tokio::test]
async fn total_size_counts_pending_adds_and_removes() {
    let provider = provider_over(4, 10);
    provider.add_item(row("x", 1)).expect("add");
    provider.add_item(row("y", 1)).expect("add");
    provider.remove_item(row("r0", 0)).expect("remove");
    provider.update_item(row("r1", 5)).expect("update");

    assert_eq!(provider.get_total_size().await.expect("size"), Some(5));
}

#[test]
fn emptiness_accounts_for_staged_edits() {
    let empty = provider_over(0, 10);
    assert_eq!(empty.is_empty(), Emptiness::Yes);
    empty.add_item(row("x", 1)).expect("add");
    assert_eq!(empty.is_empty(), Emptiness::No);

    let one = provider_over(1, 10);
    assert_eq!(one.is_empty(), Emptiness::No);
    one.remove_item(row("r0", 0)).expect("remove");
    assert_eq!(one.is_empty(), Emptiness::Unknown);
}

#[tokio::test]
async fn aborted_signal_rejects_lookup() {
    let provider = provider_over(2, 10);
    let controller = AbortController::new();
    controller.abort("gone");

    let err = provider
        .fetch_by_keys(lookup(&["r0"]).with_signal(controller.signal()))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Aborted(ref reason) if reason == "gone"));
}

#[tokio::test]
async fn abort_interrupts_slow_window() {
    let source = MemoryDataSource::new(vec![row("r0", 0)]).with_latency(Duration::from_secs(5));
    let provider = BufferingDataProvider::new(source);
    let controller = AbortController::new();
    let params = FetchByOffsetParameters::window(0, 1).with_signal(controller.signal());

    let abort = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.abort("navigated away");
    };
    let (result, ()) = tokio::join!(provider.fetch_by_offset(params), abort);
    let err = result.unwrap_err();
    assert!(err.is_abort());
}

#[test]
fn capabilities_come_from_the_source() {
    let provider = provider_over(1, 10);
    assert_eq!(
        provider.get_capability(CAPABILITY_FETCH_BY_OFFSET),
        Some(Capability::new(CAPABILITY_FETCH_BY_OFFSET, "randomAccess"))
    );
    assert_eq!(provider.get_capability("teleport"), None);
}
