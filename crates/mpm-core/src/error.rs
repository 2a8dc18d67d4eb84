//! Typed boundary errors.
//!
//! Internal plumbing propagates `anyhow::Error` with context; these enums are
//! what callers match on at component boundaries.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ArtifactKind;

/// Invalid or unsupported scope input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    /// Scope string is not accepted at this entry point.
    #[error("Invalid scope '{0}'. Currently only 'project' is supported.")]
    InvalidScope(String),
}

/// Configuration could not be loaded or failed validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Remote listing or download failure for one source.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("unsupported source url '{0}' (expected https://github.com/<owner>/<repo> or github:<owner>/<repo>)")]
    UnsupportedUrl(String),

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("malformed listing from {url}: {message}")]
    MalformedListing { url: String, message: String },
}

/// Phase-level reconciliation failure: the whole pass for one kind could not run.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("another {kind} reconciliation holds the lock at {path}: {message}")]
    Locked {
        kind: ArtifactKind,
        path: PathBuf,
        message: String,
    },

    #[error("target directory {path} is not writable: {source}")]
    TargetUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest error: {0:#}")]
    Manifest(anyhow::Error),

    #[error("cache snapshot holds {found} artifacts but this engine deploys {expected}s")]
    KindMismatch {
        expected: ArtifactKind,
        found: ArtifactKind,
    },
}
