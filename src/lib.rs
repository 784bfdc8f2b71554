//! Root crate facade for stagedata: the core provider plus an edit-script
//! runner used by the CLI and integration tests.

/// JSON edit scripts replayed through a buffering provider.
pub mod script;

pub use stagedata_core::{
    abort, buffer, config, constants, error, filter, memory, merge, models, provider, source,
    AbortController, AbortSignal, AttributeFilter, BufferedIterator, BufferingDataProvider,
    Capability, DataSource, EditItem, EditOperation, EditStatus, Emptiness, FetchByKeysParameters,
    FetchByOffsetParameters, FetchListParameters, FetchListResult, FilterOperator, Item,
    ItemMessage, MemoryDataSource, MutationDetail, MutationOperation, ProviderConfig,
    ProviderError, ProviderEvent, SortCriterion, SortDirection,
};
