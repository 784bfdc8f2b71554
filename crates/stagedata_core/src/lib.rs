//! Core library for stagedata: a buffering data provider that stages local
//! edits over a paged, key-addressable data source.

/// Cooperative cancellation for fetches.
pub mod abort;
/// Staged edit ledger.
pub mod buffer;
/// Configuration loading and defaults.
pub mod config;
/// Shared constants and defaults.
pub mod constants;
/// Provider error types.
pub mod error;
/// Attribute access, sorting and filters.
pub mod filter;
/// In-memory data source.
pub mod memory;
/// Merge engine for base pages and staged edits.
pub mod merge;
/// Data models for items, edits, events and fetch parameters.
pub mod models;
/// Buffering provider facade, iterator and event relay.
pub mod provider;
/// Wrapped data source contract.
pub mod source;

#[cfg(test)]
pub(crate) mod test_support;

pub use abort::{AbortController, AbortSignal};
pub use buffer::EditBuffer;
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use filter::{AttributeFilter, Attributes, DataFilter, FilterOperator};
pub use memory::MemoryDataSource;
pub use models::{
    EditItem, EditOperation, EditStatus, FetchByKeysParameters, FetchByOffsetParameters,
    FetchListParameters, FetchListResult, Item, ItemMessage, MutationDetail, MutationOperation,
    ProviderEvent, SortCriterion, SortDirection,
};
pub use provider::{BufferedIterator, BufferingDataProvider, KeyGenerator};
pub use source::{Capability, DataSource, Emptiness, SourceIterator};
