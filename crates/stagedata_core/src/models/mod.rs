//! Data models shared by the buffer, the merge engine and data sources.

/// Staged edits and their submission status.
pub mod edit;
/// Mutation and refresh events.
pub mod event;
/// Items, keys and per-row messages.
pub mod item;
/// Fetch parameters and results.
pub mod params;

pub use edit::{EditItem, EditOperation, EditStatus};
pub use event::{MutationDetail, MutationOperation, ProviderEvent};
pub use item::{Item, ItemData, ItemKey, ItemMessage, ItemMetadata, MessageSeverity};
pub use params::{
    ContainsKeysResults, FetchByKeysParameters, FetchByKeysResults, FetchByOffsetParameters,
    FetchByOffsetResults, FetchListParameters, FetchListResult, SortCriterion, SortDirection,
};
