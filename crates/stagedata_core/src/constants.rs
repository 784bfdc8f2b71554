//! Shared defaults used across stagedata crates.

/// Default capacity of the provider's event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default page size used by [`crate::MemoryDataSource`] when a fetch does not
/// request one.
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Environment variable overriding [`DEFAULT_EVENT_CAPACITY`].
pub const ENV_EVENT_CAPACITY: &str = "STAGEDATA_EVENT_CAPACITY";
/// Environment variable overriding [`DEFAULT_PAGE_SIZE`].
pub const ENV_PAGE_SIZE: &str = "STAGEDATA_PAGE_SIZE";
/// Environment flag controlling refresh-time pruning of stale edits.
pub const ENV_PRUNE_ON_REFRESH: &str = "STAGEDATA_PRUNE_ON_REFRESH";

/// Capability name for offset-based fetching.
pub const CAPABILITY_FETCH_BY_OFFSET: &str = "fetchByOffset";
/// Capability name for key-based fetching.
pub const CAPABILITY_FETCH_BY_KEYS: &str = "fetchByKeys";
/// Capability name for sorting.
pub const CAPABILITY_SORT: &str = "sort";
/// Capability name for filtering.
pub const CAPABILITY_FILTER: &str = "filter";
