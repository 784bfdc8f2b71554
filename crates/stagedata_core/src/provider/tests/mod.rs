//! Buffering provider tests.

use super::*;
use crate::filter::{AttributeFilter, FilterOperator};
use crate::memory::MemoryDataSource;
use crate::models::SortCriterion;
use crate::test_support::{drain, keys, mutations, numbered_source, row, TestEvent, TestItem};
use serde_json::{json, Value};

type TestProvider = BufferingDataProvider<MemoryDataSource>;

fn provider_over(count: usize, page_size: usize) -> TestProvider {
    BufferingDataProvider::new(numbered_source(count, page_size))
}

/// Rows whose `n` is at least `min`.
fn min_n(min: i64) -> AttributeFilter {
    AttributeFilter::compare("n", FilterOperator::Ge, json!(min))
}

fn key(value: &str) -> String {
    value.to_string()
}

async fn collect_all(provider: &TestProvider, params: FetchListParameters<Value>) -> Vec<TestItem> {
    let mut iter = provider.fetch_first(params).expect("iterator");
    let mut items = Vec::new();
    loop {
        let page = iter.next().await.expect("page");
        items.extend(page.items);
        if page.done {
            return items;
        }
    }
}

mod fetch;
mod iteration;
