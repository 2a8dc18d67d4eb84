//! Remote artifact sources and the local cache they are mirrored into.
//!
//! - `spec`: configured source descriptors and GitHub coordinates
//! - `fetcher`: remote listing/download behind the [`RemoteFetcher`] seam
//! - `cache`: on-disk mirror and the [`CacheSnapshot`] built from it
//! - `sync`: [`SourceSyncManager`], isolated per source

pub mod cache;
pub mod fetcher;
mod spec;
pub mod sync;

pub use cache::{CacheEntry, CacheSnapshot, SkippedArtifact, SourceCache, StagedSource};
pub use fetcher::{GitHubFetcher, MemoryFetcher, RemoteFetcher, RemoteFile};
pub use spec::{GitHubRepo, SourceDescriptor};
pub use sync::{
    NoopObserver, SourceOutcome, SourceSyncManager, SyncObserver, SyncProgress, SyncSummary,
};
