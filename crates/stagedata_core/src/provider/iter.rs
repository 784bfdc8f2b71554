//! Async iteration over the merged view of base pages and staged edits.

use super::Shared;
use crate::error::ProviderError;
use crate::models::{
    FetchByKeysParameters, FetchListParameters, FetchListResult, Item, MutationDetail,
};
use crate::source::{DataSource, SourceIterator};
use std::sync::Arc;

/// Iterator returned by [`super::BufferingDataProvider::fetch_first`].
///
/// Dropping it discards the iteration's merge state.
pub struct BufferedIterator<S: DataSource> {
    id: u64,
    base: S::Iter,
    shared: Arc<Shared<S>>,
    params: FetchListParameters<S::Data>,
    exhausted: bool,
}

impl<S: DataSource> BufferedIterator<S> {
    pub(crate) fn new(
        id: u64,
        base: S::Iter,
        shared: Arc<Shared<S>>,
        params: FetchListParameters<S::Data>,
    ) -> Self {
        Self {
            id,
            base,
            shared,
            params,
            exhausted: false,
        }
    }

    fn page(
        &self,
        items: Vec<Item<S::Key, S::Data>>,
        done: bool,
        total: Option<usize>,
    ) -> FetchListResult<S::Key, S::Data> {
        FetchListResult {
            items,
            done,
            fetch_parameters: self.params.clone(),
            total_filtered_row_count: total,
        }
    }

    /// Next merged page.
    ///
    /// With a requested `size`, base pages are fetched until `size` rows are
    /// deliverable or the source is done, so a short page means the end.
    /// Rows whose sort position changed since they were handed out are
    /// announced before the page is returned: as `remove` plus `add` with a
    /// hint when they moved among rows already shown, as `remove` alone
    /// when they now belong further down and come back in a later page.
    pub async fn next(&mut self) -> Result<FetchListResult<S::Key, S::Data>, ProviderError> {
        if self.exhausted {
            return Ok(self.page(Vec::new(), true, None));
        }
        let wanted = self.params.size.unwrap_or(1).max(1);

        loop {
            let needs_page = {
                let mut guard = self.shared.lock()?;
                let state = &mut *guard;
                let merge = state
                    .iterations
                    .get_mut(&self.id)
                    .ok_or(ProviderError::NotFound)?;
                merge.splice_adds(&state.buffer);
                !merge.started()
                    || (!merge.base_done() && merge.deliverable_count(&state.buffer) < wanted)
            };
            if !needs_page {
                break;
            }
            let page = self.base.next().await?;
            let mut guard = self.shared.lock()?;
            let state = &mut *guard;
            let merge = state
                .iterations
                .get_mut(&self.id)
                .ok_or(ProviderError::NotFound)?;
            merge.merge_page(page, &state.buffer);
        }

        let missing = {
            let state = self.shared.lock()?;
            state
                .iterations
                .get(&self.id)
                .map(|merge| {
                    merge.missing_before_data(
                        &state.buffer,
                        &state.data_before_updated,
                        &state.before_misses,
                    )
                })
                .unwrap_or_default()
        };
        if !missing.is_empty() {
            tracing::trace!(count = missing.len(), "fetching pre-edit data");
            let fetched = self
                .shared
                .source
                .fetch_by_keys(FetchByKeysParameters::new(missing.clone()))
                .await?;
            let mut state = self.shared.lock()?;
            for key in missing {
                match fetched.results.get(&key) {
                    Some(item) => {
                        state.data_before_updated.insert(key, item.data.clone());
                    }
                    None => {
                        state.before_misses.insert(key);
                    }
                }
            }
        }

        let (items, changes, total, done) = {
            let mut guard = self.shared.lock()?;
            let state = &mut *guard;
            let merge = state
                .iterations
                .get_mut(&self.id)
                .ok_or(ProviderError::NotFound)?;
            let changes = merge.reconcile_positions(&state.buffer);
            let items = merge.take_page(self.params.size, &state.buffer);
            let total = merge.total_filtered_row_count(&state.buffer, &state.data_before_updated);
            let done = merge.is_exhausted(&state.buffer);
            (items, changes, total, done)
        };
        self.exhausted = done;
        tracing::debug!(
            iteration = self.id,
            items = items.len(),
            done,
            "page delivered"
        );
        if !changes.is_empty() {
            let mut detail = MutationDetail::default();
            changes.append_to(&mut detail);
            self.shared.dispatch_mutation(detail);
        }
        Ok(self.page(items, done, total))
    }
}

impl<S: DataSource> Drop for BufferedIterator<S> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.end_iteration(self.id);
        }
    }
}
