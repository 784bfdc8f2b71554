//! Fetch parameters and results exchanged with data sources.

use super::item::Item;
use crate::abort::AbortSignal;
use crate::filter::DataFilter;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Sort direction for a single attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One sort key: attribute name plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub attribute: String,
    pub direction: SortDirection,
}

impl SortCriterion {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Parameters for a paged list fetch (`fetch_first`).
pub struct FetchListParameters<D> {
    /// Requested page size; sources pick their own when `None`.
    pub size: Option<usize>,
    pub sort_criteria: Vec<SortCriterion>,
    pub filter: Option<Arc<dyn DataFilter<D>>>,
}

impl<D> Default for FetchListParameters<D> {
    fn default() -> Self {
        Self {
            size: None,
            sort_criteria: Vec::new(),
            filter: None,
        }
    }
}

impl<D> Clone for FetchListParameters<D> {
    fn clone(&self) -> Self {
        Self {
            size: self.size,
            sort_criteria: self.sort_criteria.clone(),
            filter: self.filter.clone(),
        }
    }
}

impl<D> fmt::Debug for FetchListParameters<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchListParameters")
            .field("size", &self.size)
            .field("sort_criteria", &self.sort_criteria)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

impl<D> FetchListParameters<D> {
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_sort(mut self, criterion: SortCriterion) -> Self {
        self.sort_criteria.push(criterion);
        self
    }

    pub fn with_filter(mut self, filter: impl DataFilter<D> + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }
}

/// One page produced by a source iterator.
#[derive(Debug, Clone)]
pub struct FetchListResult<K, D> {
    pub items: Vec<Item<K, D>>,
    pub done: bool,
    pub fetch_parameters: FetchListParameters<D>,
    /// Row count after filtering, when the source knows it.
    pub total_filtered_row_count: Option<usize>,
}

impl<K, D> FetchListResult<K, D> {
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.items.iter().map(|item| item.key())
    }
}

/// Parameters for key lookups.
#[derive(Debug, Clone)]
pub struct FetchByKeysParameters<K> {
    pub keys: Vec<K>,
    pub signal: Option<AbortSignal>,
}

impl<K> FetchByKeysParameters<K> {
    pub fn new(keys: Vec<K>) -> Self {
        Self { keys, signal: None }
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Key lookup results keyed by the requested keys; missing keys are absent.
#[derive(Debug, Clone)]
pub struct FetchByKeysResults<K, D> {
    pub fetch_parameters: FetchByKeysParameters<K>,
    pub results: HashMap<K, Item<K, D>>,
}

/// Keys out of a `contains_keys` request that exist.
#[derive(Debug, Clone)]
pub struct ContainsKeysResults<K> {
    pub fetch_parameters: FetchByKeysParameters<K>,
    pub results: HashSet<K>,
}

/// Parameters for an offset window fetch.
pub struct FetchByOffsetParameters<D> {
    pub offset: usize,
    pub size: Option<usize>,
    pub sort_criteria: Vec<SortCriterion>,
    pub filter: Option<Arc<dyn DataFilter<D>>>,
    pub signal: Option<AbortSignal>,
}

impl<D> Default for FetchByOffsetParameters<D> {
    fn default() -> Self {
        Self {
            offset: 0,
            size: None,
            sort_criteria: Vec::new(),
            filter: None,
            signal: None,
        }
    }
}

impl<D> Clone for FetchByOffsetParameters<D> {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset,
            size: self.size,
            sort_criteria: self.sort_criteria.clone(),
            filter: self.filter.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl<D> fmt::Debug for FetchByOffsetParameters<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchByOffsetParameters")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("sort_criteria", &self.sort_criteria)
            .field("filter", &self.filter.is_some())
            .field("signal", &self.signal)
            .finish()
    }
}

impl<D> FetchByOffsetParameters<D> {
    pub fn window(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size: Some(size),
            ..Self::default()
        }
    }

    pub fn with_sort(mut self, criterion: SortCriterion) -> Self {
        self.sort_criteria.push(criterion);
        self
    }

    pub fn with_filter(mut self, filter: impl DataFilter<D> + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// List parameters equivalent to this window's sort and filter.
    pub fn list_parameters(&self) -> FetchListParameters<D> {
        FetchListParameters {
            size: self.size,
            sort_criteria: self.sort_criteria.clone(),
            filter: self.filter.clone(),
        }
    }
}

/// One offset window.
#[derive(Debug, Clone)]
pub struct FetchByOffsetResults<K, D> {
    pub fetch_parameters: FetchByOffsetParameters<D>,
    pub results: Vec<Item<K, D>>,
    pub done: bool,
    pub total_filtered_row_count: Option<usize>,
}
