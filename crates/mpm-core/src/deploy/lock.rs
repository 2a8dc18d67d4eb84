//! Exclusive per-(scope, kind) lock around reconciliation.
//!
//! Implemented as an advisory file lock under the scope's config directory,
//! so it also serializes separate `mpm` processes.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::context::DeploymentContext;
use crate::error::ReconcileError;
use crate::types::ArtifactKind;

#[derive(Debug, Clone)]
pub struct DeployLock {
    path: PathBuf,
    kind: ArtifactKind,
}

/// Held for the duration of a reconciliation; the lock is released on drop.
#[derive(Debug)]
pub struct DeployLockGuard {
    file: File,
    path: PathBuf,
}

impl DeployLock {
    pub fn new(path: PathBuf, kind: ArtifactKind) -> Self {
        Self { path, kind }
    }

    pub fn for_context(ctx: &DeploymentContext, kind: ArtifactKind) -> Self {
        Self::new(
            ctx.config_dir()
                .join("locks")
                .join(format!("{}.lock", kind.dir_name())),
            kind,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is available.
    pub fn acquire(&self) -> Result<DeployLockGuard, ReconcileError> {
        let file = self.open()?;
        file.lock_exclusive().map_err(|e| self.locked(e.to_string()))?;
        tracing::debug!(kind = %self.kind, lock = %self.path.display(), "Acquired deploy lock");
        Ok(DeployLockGuard {
            file,
            path: self.path.clone(),
        })
    }

    /// Fail immediately if another reconciliation holds the lock.
    pub fn try_acquire(&self) -> Result<DeployLockGuard, ReconcileError> {
        let file = self.open()?;
        file.try_lock_exclusive()
            .map_err(|e| self.locked(e.to_string()))?;
        Ok(DeployLockGuard {
            file,
            path: self.path.clone(),
        })
    }

    fn open(&self) -> Result<File, ReconcileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.locked(e.to_string()))?;
        }
        File::create(&self.path).map_err(|e| self.locked(e.to_string()))
    }

    fn locked(&self, message: String) -> ReconcileError {
        ReconcileError::Locked {
            kind: self.kind,
            path: self.path.clone(),
            message,
        }
    }
}

impl Drop for DeployLockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), error = %err, "Failed to release deploy lock");
        }
    }
}
