//! Embaixada offline sync core
//!
//! This crate keeps the app usable without a network:
//! - Durable read cache with TTL and stale fallback
//! - Persistent FIFO of pending writes with bounded retries
//! - Processor that drains the queue when connectivity returns
//! - Cache-first query strategy for screens
//! - Connectivity monitoring over a pluggable platform signal

pub mod cache;
pub mod connectivity;
pub mod operation;
pub mod processor;
pub mod query;
pub mod queue;
pub mod retry;

// Re-export main types
pub use cache::{CacheEntry, CacheMeta, CacheStats, OfflineCache, Stale, CACHE_META_KEY, CACHE_PREFIX, DEFAULT_TTL};
pub use connectivity::{
    ConnectivityMonitor, Listener, ManualSignal, NetworkSignal, NetworkState, SignalHub, Subscription,
};
pub use operation::{
    router_fn, FnRouter, OperationRouter, OperationUpdate, Payload, ProcessResult, SyncOperation,
    SyncOperationKind,
};
pub use processor::{SyncProcessor, SyncStatus};
pub use query::{CachedQuery, Fetcher, QueryPhase, QueryState};
pub use queue::{SyncQueue, QUEUE_KEY};
pub use retry::{is_retryable, RetryConfig, RetryExecutor, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
