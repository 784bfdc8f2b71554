use super::*;
use crate::models::SortCriterion;
use serde_json::{json, Value};

fn row(key: u32, score: i64) -> Item<u32, Value> {
    Item::new(key, json!({ "id": key, "score": score }))
}

fn page(items: Vec<Item<u32, Value>>, done: bool, total: Option<usize>) -> FetchListResult<u32, Value> {
    FetchListResult {
        items,
        done,
        fetch_parameters: FetchListParameters::default(),
        total_filtered_row_count: total,
    }
}

fn keys(items: &[Item<u32, Value>]) -> Vec<u32> {
    items.iter().map(|item| *item.key()).collect()
}

fn min_score(min: i64) -> impl Fn(&Value) -> bool + Send + Sync {
    move |row: &Value| row["score"].as_i64().unwrap_or_default() >= min
}

#[test]
fn longest_increasing_positions_keeps_minimal_movers() {
    assert_eq!(
        longest_increasing_positions(&[0, 1, 2, 3], &[]),
        vec![true, true, true, true]
    );
    // Row 3 jumped to the front; only it has to move.
    assert_eq!(
        longest_increasing_positions(&[3, 0, 1, 2], &[]),
        vec![false, true, true, true]
    );
    assert!(longest_increasing_positions(&[], &[]).is_empty());
}

#[test]
fn longest_increasing_positions_breaks_ties_toward_pinned() {
    assert_eq!(
        longest_increasing_positions(&[1, 0, 2], &[true, false, true]),
        vec![true, false, true]
    );
    assert_eq!(
        longest_increasing_positions(&[1, 0, 2], &[false, true, true]),
        vec![false, true, true]
    );
}

#[test]
fn staged_adds_are_spliced_before_first_base_row() {
    let mut buffer = EditBuffer::new();
    buffer.add_item(row(10, 1)).unwrap();
    buffer.add_item(row(11, 1)).unwrap();
    let mut state = MergeState::new(FetchListParameters::default());

    state.merge_page(page(vec![row(1, 5), row(2, 6)], false, None), &buffer);
    let delivered = state.take_page(None, &buffer);

    assert_eq!(keys(&delivered), vec![10, 11, 1, 2]);
    assert_eq!(state.first_base_key(), Some(&1));
    assert_eq!(state.next_offset(), 4);
}

#[test]
fn adds_are_not_spliced_twice_across_pages() {
    let mut buffer = EditBuffer::new();
    buffer.add_item(row(10, 1)).unwrap();
    let mut state = MergeState::new(FetchListParameters::default());

    state.merge_page(page(vec![row(1, 5)], false, None), &buffer);
    let first = state.take_page(None, &buffer);
    state.merge_page(page(vec![row(2, 5)], true, None), &buffer);
    let second = state.take_page(None, &buffer);

    assert_eq!(keys(&first), vec![10, 1]);
    assert_eq!(keys(&second), vec![2]);
    assert!(state.is_exhausted(&buffer));
}

#[test]
fn removed_rows_are_hidden_and_updates_substituted() {
    let mut buffer = EditBuffer::new();
    buffer.remove_item(row(2, 0)).unwrap();
    buffer.update_item(row(3, 99)).unwrap();
    let mut state = MergeState::new(FetchListParameters::default());

    state.merge_page(page(vec![row(1, 1), row(2, 2), row(3, 3)], true, Some(3)), &buffer);
    let delivered = state.take_page(None, &buffer);

    assert_eq!(keys(&delivered), vec![1, 3]);
    assert_eq!(delivered[1].data["score"], 99);
    assert_eq!(
        state.total_filtered_row_count(&buffer, &HashMap::new()),
        Some(2)
    );
}

#[test]
fn filtered_add_raises_count_once() {
    let mut buffer = EditBuffer::new();
    buffer.add_item(row(4, 10)).unwrap();
    buffer.add_item(row(5, 0)).unwrap();
    let params = FetchListParameters::default().with_filter(min_score(5));
    let mut state = MergeState::new(params);

    state.merge_page(page(vec![row(1, 7), row(2, 8), row(3, 9)], true, Some(3)), &buffer);
    let delivered = state.take_page(None, &buffer);

    assert_eq!(keys(&delivered), vec![4, 1, 2, 3]);
    let cache = HashMap::new();
    assert_eq!(state.total_filtered_row_count(&buffer, &cache), Some(4));
    // Repeated passes recompute rather than accumulate.
    assert_eq!(state.total_filtered_row_count(&buffer, &cache), Some(4));
}

#[test]
fn update_leaving_filter_hides_row_and_lowers_count() {
    let mut buffer = EditBuffer::new();
    let params = FetchListParameters::default().with_filter(min_score(5));
    let mut state = MergeState::new(params);
    state.merge_page(page(vec![row(1, 7), row(2, 8)], true, Some(2)), &buffer);
    state.take_page(None, &buffer);

    buffer.update_item(row(2, 1)).unwrap();
    assert_eq!(state.display_item(&2, &buffer), None);
    assert_eq!(
        state.total_filtered_row_count(&buffer, &HashMap::new()),
        Some(1)
    );
}

#[test]
fn update_entering_filter_uses_cached_before_data() {
    let mut buffer = EditBuffer::new();
    buffer.update_item(row(9, 50)).unwrap();
    let params = FetchListParameters::default().with_filter(min_score(5));
    let mut state = MergeState::new(params);
    state.merge_page(page(vec![row(1, 7)], true, Some(1)), &buffer);

    let misses = HashSet::new();
    let mut cache = HashMap::new();
    assert_eq!(state.missing_before_data(&buffer, &cache, &misses), vec![9]);

    cache.insert(9, json!({ "id": 9, "score": 0 }));
    assert!(state.missing_before_data(&buffer, &cache, &misses).is_empty());
    assert_eq!(state.total_filtered_row_count(&buffer, &cache), Some(2));
}

#[test]
fn sorted_adds_land_at_their_position() {
    let mut buffer = EditBuffer::new();
    buffer.add_item(row(20, 15)).unwrap();
    let params = FetchListParameters::default().with_sort(SortCriterion::ascending("score"));
    let mut state = MergeState::new(params);

    state.merge_page(page(vec![row(1, 10), row(2, 20)], true, None), &buffer);
    let delivered = state.take_page(None, &buffer);
    assert_eq!(keys(&delivered), vec![1, 20, 2]);
}

#[test]
fn sorted_tail_adds_wait_for_more_base_rows() {
    let mut buffer = EditBuffer::new();
    buffer.add_item(row(20, 100)).unwrap();
    let params = FetchListParameters::default().with_sort(SortCriterion::ascending("score"));
    let mut state = MergeState::new(params);

    state.merge_page(page(vec![row(1, 10)], false, None), &buffer);
    assert_eq!(keys(&state.take_page(None, &buffer)), vec![1]);

    state.merge_page(page(vec![row(2, 50)], true, None), &buffer);
    assert_eq!(keys(&state.take_page(None, &buffer)), vec![2, 20]);
}

#[test]
fn moved_rows_are_reannounced_with_a_hint() {
    let mut buffer = EditBuffer::new();
    let params = FetchListParameters::default().with_sort(SortCriterion::ascending("score"));
    let mut state = MergeState::new(params);
    state.merge_page(page(vec![row(1, 1), row(2, 2), row(3, 3)], true, None), &buffer);
    state.take_page(None, &buffer);

    buffer.update_item(row(1, 10)).unwrap();
    let changes = state.reconcile_positions(&buffer);

    assert!(changes.withdrawn.is_empty());
    assert_eq!(changes.moved.len(), 1);
    let (item, before) = &changes.moved[0];
    assert_eq!(*item.key(), 1);
    assert_eq!(item.data["score"], 10);
    assert_eq!(*before, None);
    assert!(state.is_delivered(&1));
    assert!(state.take_page(None, &buffer).is_empty());

    let mut detail = MutationDetail::default();
    changes.append_to(&mut detail);
    assert_eq!(detail.remove.map(|op| op.keys), Some(vec![1]));
    assert_eq!(detail.add.map(|op| op.add_before_keys), Some(vec![None]));
}

#[test]
fn rows_sorted_past_undelivered_rows_are_withdrawn() {
    let mut buffer = EditBuffer::new();
    let params = FetchListParameters::default().with_sort(SortCriterion::ascending("score"));
    let mut state = MergeState::new(params);
    state.merge_page(
        page(vec![row(1, 1), row(2, 2), row(3, 3), row(4, 4)], true, None),
        &buffer,
    );
    assert_eq!(keys(&state.take_page(Some(2), &buffer)), vec![1, 2]);

    buffer.update_item(row(1, 10)).unwrap();
    let changes = state.reconcile_positions(&buffer);

    assert_eq!(changes.withdrawn, vec![1]);
    assert!(changes.moved.is_empty());
    assert!(!state.is_delivered(&1));
    assert_eq!(keys(&state.take_page(None, &buffer)), vec![3, 4, 1]);
}

#[test]
fn unchanged_order_flags_nothing() {
    let mut buffer = EditBuffer::new();
    let params = FetchListParameters::default().with_sort(SortCriterion::ascending("score"));
    let mut state = MergeState::new(params);
    state.merge_page(page(vec![row(1, 1), row(2, 2)], true, None), &buffer);
    state.take_page(None, &buffer);

    buffer.update_item(row(1, 2)).unwrap();
    assert!(state.reconcile_positions(&buffer).is_empty());
}

#[test]
fn eager_add_after_start_is_marked_delivered() {
    let mut buffer = EditBuffer::new();
    let mut state = MergeState::new(FetchListParameters::default());
    state.merge_page(page(vec![row(1, 1), row(2, 2)], false, None), &buffer);
    state.take_page(Some(1), &buffer);

    let added = row(30, 0);
    buffer.add_item(added.clone()).unwrap();
    let before = state.insert_staged_add(&added, &buffer);

    assert_eq!(before, Some(Some(1)));
    assert!(state.is_delivered(&30));
    assert_eq!(keys(&state.take_page(None, &buffer)), vec![2]);
}

#[test]
fn add_before_anything_is_delivered_waits_for_a_page() {
    let mut buffer = EditBuffer::new();
    let mut state = MergeState::new(FetchListParameters::default());
    state.merge_page(page(vec![row(1, 1)], false, None), &buffer);

    let added = row(30, 0);
    buffer.add_item(added.clone()).unwrap();
    assert_eq!(state.insert_staged_add(&added, &buffer), None);
    assert!(!state.is_delivered(&30));
    assert_eq!(keys(&state.take_page(None, &buffer)), vec![30, 1]);
}

#[test]
fn external_rows_between_delivered_rows_surface_immediately() {
    let buffer: EditBuffer<u32, Value> = EditBuffer::new();
    let mut state = MergeState::new(FetchListParameters::default());
    state.merge_page(page(vec![row(1, 1), row(2, 2), row(3, 3)], false, None), &buffer);
    state.take_page(Some(2), &buffer);

    assert_eq!(state.insert_external(row(9, 9), Some(&2), &buffer), Some(Some(2)));
    assert!(state.is_delivered(&9));
    assert_eq!(state.next_offset(), 3);
    assert_eq!(state.insert_external(row(9, 9), None, &buffer), None);
}

#[test]
fn base_row_matching_staged_add_is_not_duplicated() {
    let mut buffer = EditBuffer::new();
    buffer.add_item(row(7, 1)).unwrap();
    let mut state = MergeState::new(FetchListParameters::default());
    state.merge_page(page(vec![row(1, 1)], false, None), &buffer);
    state.merge_page(page(vec![row(7, 1), row(8, 1)], true, None), &buffer);

    assert_eq!(keys(&state.take_page(None, &buffer)), vec![7, 1, 8]);
}

#[test]
fn rename_key_moves_bookkeeping() {
    let mut buffer = EditBuffer::new();
    let mut state = MergeState::new(FetchListParameters::default());
    state.merge_page(page(vec![row(1, 1)], true, None), &buffer);
    state.take_page(None, &buffer);
    let added = row(100, 3);
    buffer.add_item(added.clone()).unwrap();
    state.insert_staged_add(&added, &buffer);
    let edit = buffer.get_item(&100).cloned().unwrap();
    buffer
        .set_item_status(&edit, crate::models::EditStatus::Submitting, None)
        .unwrap();
    let done = buffer
        .set_item_status(&edit, crate::models::EditStatus::Submitted, None)
        .unwrap();
    state.apply_submitted(done.operation, &done.item);

    assert!(state.rename_key(&100, &5));
    assert!(state.contains_key(&5));
    assert!(!state.contains_key(&100));
    assert!(state.is_delivered(&5));
    assert_eq!(state.display_item(&5, &buffer).map(|i| *i.key()), Some(5));
}

#[test]
fn edited_row_moved_among_delivered_rows_is_the_one_reannounced() {
    let mut buffer = EditBuffer::new();
    let params = FetchListParameters::default().with_sort(SortCriterion::ascending("score"));
    let mut state = MergeState::new(params);
    state.merge_page(page(vec![row(1, 10), row(2, 20), row(3, 30)], true, None), &buffer);
    state.take_page(None, &buffer);

    // Row 1 now sits between 2 and 3; moving either 1 or 2 would restore
    // order, but only 1 changed.
    buffer.update_item(row(1, 25)).unwrap();
    let changes = state.reconcile_positions(&buffer);

    assert!(changes.withdrawn.is_empty());
    assert_eq!(changes.moved.len(), 1);
    assert_eq!(*changes.moved[0].0.key(), 1);
    assert_eq!(changes.moved[0].1, Some(3));
}

#[test]
fn row_edited_past_last_fetched_row_is_withdrawn_before_source_is_done() {
    let mut buffer = EditBuffer::new();
    let params = FetchListParameters::default().with_sort(SortCriterion::ascending("score"));
    let mut state = MergeState::new(params);
    state.merge_page(page(vec![row(1, 1), row(2, 2)], false, None), &buffer);
    assert_eq!(keys(&state.take_page(None, &buffer)), vec![1, 2]);

    buffer.update_item(row(1, 10)).unwrap();
    let changes = state.reconcile_positions(&buffer);

    assert_eq!(changes.withdrawn, vec![1]);
    assert!(changes.moved.is_empty());
    assert_eq!(state.deliverable_count(&buffer), 0);

    state.merge_page(page(vec![row(3, 3), row(4, 4)], true, None), &buffer);
    assert_eq!(keys(&state.take_page(None, &buffer)), vec![3, 4, 1]);
}

#[test]
fn tail_row_edited_in_place_stays_delivered() {
    let mut buffer = EditBuffer::new();
    let params = FetchListParameters::default().with_sort(SortCriterion::ascending("score"));
    let mut state = MergeState::new(params);
    state.merge_page(page(vec![row(1, 1), row(2, 2)], false, None), &buffer);
    state.take_page(None, &buffer);

    buffer
        .update_item(Item::new(2, json!({ "id": 2, "score": 2, "note": "x" })))
        .unwrap();
    assert!(state.reconcile_positions(&buffer).is_empty());
    assert!(state.is_delivered(&2));
}

#[test]
fn add_for_key_the_source_delivers_is_counted_once() {
    let mut buffer = EditBuffer::new();
    buffer.add_item(row(7, 1)).unwrap();
    let cache = HashMap::new();
    let mut state = MergeState::new(FetchListParameters::default());

    state.merge_page(page(vec![row(1, 1)], false, Some(3)), &buffer);
    assert_eq!(state.total_filtered_row_count(&buffer, &cache), Some(4));

    state.merge_page(page(vec![row(7, 1), row(8, 1)], true, Some(3)), &buffer);
    assert_eq!(state.total_filtered_row_count(&buffer, &cache), Some(3));
}
