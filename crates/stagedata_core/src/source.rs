//! Contract of the wrapped data source.

use crate::error::ProviderError;
use crate::models::{
    ContainsKeysResults, FetchByKeysParameters, FetchByKeysResults, FetchByOffsetParameters,
    FetchByOffsetResults, FetchListParameters, FetchListResult, ItemData, ItemKey, ProviderEvent,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::broadcast;

/// Answer to "is this source empty?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emptiness {
    Yes,
    No,
    Unknown,
}

/// Capability report for a named feature (`fetchByOffset`, `sort`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    /// Implementation detail such as `"randomAccess"` or `"full"`.
    pub implementation: String,
}

impl Capability {
    pub fn new(name: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implementation: implementation.into(),
        }
    }
}

/// Paged cursor returned by [`DataSource::fetch_first`].
pub trait SourceIterator: Send {
    type Key: ItemKey;
    type Data: ItemData;

    /// Next page. Calling again after a `done` page yields an empty done page.
    fn next(
        &mut self,
    ) -> impl Future<Output = Result<FetchListResult<Self::Key, Self::Data>, ProviderError>> + Send;
}

/// Authoritative, usually server-backed, collaborator wrapped by the
/// buffering provider.
pub trait DataSource: Send + Sync + 'static {
    type Key: ItemKey;
    type Data: ItemData;
    type Iter: SourceIterator<Key = Self::Key, Data = Self::Data> + 'static;

    /// Start a fresh paged iteration.
    fn fetch_first(&self, params: FetchListParameters<Self::Data>) -> Self::Iter;

    fn fetch_by_keys(
        &self,
        params: FetchByKeysParameters<Self::Key>,
    ) -> impl Future<Output = Result<FetchByKeysResults<Self::Key, Self::Data>, ProviderError>> + Send;

    fn fetch_by_offset(
        &self,
        params: FetchByOffsetParameters<Self::Data>,
    ) -> impl Future<Output = Result<FetchByOffsetResults<Self::Key, Self::Data>, ProviderError>> + Send;

    fn contains_keys(
        &self,
        params: FetchByKeysParameters<Self::Key>,
    ) -> impl Future<Output = Result<ContainsKeysResults<Self::Key>, ProviderError>> + Send;

    fn get_capability(&self, name: &str) -> Option<Capability>;

    /// Total row count, `None` when unknown.
    fn get_total_size(&self) -> impl Future<Output = Result<Option<usize>, ProviderError>> + Send;

    fn is_empty(&self) -> Emptiness;

    /// Subscribe to this source's `mutate` / `refresh` events.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent<Self::Key, Self::Data>>;
}
