//! mpm Core Library
//!
//! Deploys agent definitions and skill bundles from remote sources into a
//! project or user scope: sync into a local cache, reconcile against what was
//! deployed before, back up and journal every mutation, verify the result.

pub mod api;
pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod fs;
pub mod orchestration;
pub mod source;
pub mod types;

/// Re-exports of commonly used types
pub mod prelude {
    // Scope and context
    pub use crate::context::DeploymentContext;
    pub use crate::types::{ArtifactKind, ConfigScope};

    // Configuration
    pub use crate::config::{ConfigStore, MpmConfig, ReverifyPolicy};

    // Sources
    pub use crate::source::{
        CacheSnapshot, GitHubFetcher, RemoteFetcher, SourceDescriptor, SourceSyncManager,
        SyncObserver, SyncSummary,
    };

    // Deployment
    pub use crate::deploy::{
        BackupManager, DeploymentResult, DeploymentVerifier, EngineRegistry, OperationJournal,
        ReconciliationEngine, VerificationResult,
    };

    // Startup
    pub use crate::orchestration::{StartupOrchestrator, StartupReport};

    // Errors
    pub use crate::error::{ConfigError, FetchError, ReconcileError, ScopeError};
}
