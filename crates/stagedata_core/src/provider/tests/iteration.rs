//! Merged iteration tests.

use super::*;

#[tokio::test]
async fn short_pages_are_filled_from_later_base_pages() {
    let provider = provider_over(5, 1);
    let mut iter = provider
        .fetch_first(FetchListParameters::default().with_size(2))
        .expect("iterator");

    let first = iter.next().await.expect("page");
    assert_eq!(keys(&first.items), vec!["r0", "r1"]);
    assert!(!first.done);
    assert_eq!(first.total_filtered_row_count, Some(5));

    let second = iter.next().await.expect("page");
    assert_eq!(keys(&second.items), vec!["r2", "r3"]);
    assert!(!second.done);

    let last = iter.next().await.expect("page");
    assert_eq!(keys(&last.items), vec!["r4"]);
    assert!(last.done);

    let after = iter.next().await.expect("page");
    assert!(after.items.is_empty());
    assert!(after.done);
}

#[tokio::test]
async fn staged_adds_lead_unsorted_iteration() {
    let provider = provider_over(3, 10);
    provider.add_item(row("new", 99)).expect("add");

    let rows = collect_all(&provider, FetchListParameters::default()).await;
    assert_eq!(keys(&rows), vec!["new", "r0", "r1", "r2"]);
}

#[tokio::test]
async fn add_passing_filter_raises_total() {
    let provider = provider_over(5, 10);
    provider.add_item(row("new", 10)).expect("add");
    provider.add_item(row("low", 0)).expect("add");

    let mut iter = provider
        .fetch_first(FetchListParameters::default().with_filter(min_n(2)))
        .expect("iterator");
    let page = iter.next().await.expect("page");

    assert_eq!(keys(&page.items), vec!["new", "r2", "r3", "r4"]);
    assert_eq!(page.total_filtered_row_count, Some(4));
    assert!(page.done);
}

#[tokio::test]
async fn removes_hide_rows_and_lower_total() {
    let provider = provider_over(4, 10);
    provider.remove_item(row("r1", 1)).expect("remove");

    let mut iter = provider
        .fetch_first(FetchListParameters::default())
        .expect("iterator");
    let page = iter.next().await.expect("page");

    assert_eq!(keys(&page.items), vec!["r0", "r2", "r3"]);
    assert_eq!(page.total_filtered_row_count, Some(3));
}

#[tokio::test]
async fn update_entering_filter_uses_fetched_pre_edit_data() {
    let provider = provider_over(5, 10);
    provider.update_item(row("r0", 7)).expect("update");

    let mut iter = provider
        .fetch_first(FetchListParameters::default().with_filter(min_n(2)))
        .expect("iterator");
    let page = iter.next().await.expect("page");

    // r0 was outside the filter upstream and is inside it now.
    assert_eq!(page.total_filtered_row_count, Some(4));
    let state = provider.shared.lock().expect("state");
    assert_eq!(state.data_before_updated.get("r0").map(|d| d["n"].clone()), Some(json!(0)));
}

#[tokio::test]
async fn sorted_iteration_places_adds_by_value() {
    let provider = provider_over(4, 10);
    provider
        .add_item(Item::new(key("x"), json!({ "id": "x", "n": 1.5 })))
        .expect("add");

    let rows = collect_all(
        &provider,
        FetchListParameters::default().with_sort(SortCriterion::ascending("n")),
    )
    .await;
    assert_eq!(keys(&rows), vec!["r0", "r1", "x", "r2", "r3"]);
    assert_eq!(
        provider.last_sort_criteria().expect("criteria"),
        vec![SortCriterion::ascending("n")]
    );
}

#[tokio::test]
async fn row_sorted_past_unseen_rows_is_withdrawn_and_redelivered() {
    let provider = provider_over(4, 10);
    let mut events = provider.subscribe();
    let mut iter = provider
        .fetch_first(
            FetchListParameters::default()
                .with_size(2)
                .with_sort(SortCriterion::ascending("n")),
        )
        .expect("iterator");
    assert_eq!(keys(&iter.next().await.expect("page").items), vec!["r0", "r1"]);

    drain(&mut events);
    provider.update_item(row("r0", 10)).expect("update");
    let staged = mutations(&drain(&mut events));
    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].remove.as_ref().map(|op| op.keys.clone()), Some(vec![key("r0")]));
    assert!(staged[0].add.is_none());
    assert!(staged[0].update.is_none());

    let second = iter.next().await.expect("page");
    assert_eq!(keys(&second.items), vec!["r2", "r3"]);
    assert!(!second.done);
    let last = iter.next().await.expect("page");
    assert_eq!(keys(&last.items), vec!["r0"]);
    assert_eq!(last.items[0].data["n"], 10);
    assert!(last.done);
}

#[tokio::test]
async fn add_during_iteration_is_announced_before_first_row() {
    let provider = provider_over(4, 10);
    let mut events = provider.subscribe();
    let mut iter = provider
        .fetch_first(FetchListParameters::default().with_size(2))
        .expect("iterator");
    iter.next().await.expect("page");

    provider.add_item(row("x", 50)).expect("add");
    let staged = mutations(&drain(&mut events));
    let add = staged[0].add.as_ref().expect("add op");
    assert_eq!(add.keys, vec![key("x")]);
    assert_eq!(add.add_before_keys, vec![Some(key("r0"))]);

    let rest = iter.next().await.expect("page");
    assert_eq!(keys(&rest.items), vec!["r2", "r3"]);
    assert!(rest.done);
}

#[tokio::test]
async fn dropping_iterator_discards_merge_state() {
    let provider = provider_over(2, 10);
    let first = provider
        .fetch_first(FetchListParameters::default())
        .expect("iterator");
    let second = provider
        .fetch_first(FetchListParameters::default())
        .expect("iterator");
    assert_eq!(provider.shared.lock().expect("state").iterations.len(), 2);

    drop(first);
    {
        let state = provider.shared.lock().expect("state");
        assert_eq!(state.iterations.len(), 1);
        assert!(state.latest_iteration.is_some());
    }
    drop(second);
    let state = provider.shared.lock().expect("state");
    assert!(state.iterations.is_empty());
    assert!(state.latest_iteration.is_none());
}
