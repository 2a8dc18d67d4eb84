//! Deployment: reconciliation of cached artifacts into a scope's target dirs.

pub mod backup;
pub mod journal;
pub mod lock;
pub mod manifest;
pub mod reconcile;
pub mod registry;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::types::ArtifactKind;

pub use backup::{BackupManager, BackupRecord};
pub use journal::{JournalAction, JournalEntry, JournalOutcome, OperationId, OperationJournal};
pub use lock::{DeployLock, DeployLockGuard};
pub use manifest::{Manifest, ManifestEntry, ManifestStore};
pub use reconcile::{ArtifactError, DeploymentResult, ReconcileOptions, ReconciliationEngine};
pub use registry::EngineRegistry;
pub use verify::{DeploymentVerifier, VerificationCheck, VerificationResult};

/// Deployed location of an artifact inside a kind's directory.
pub fn artifact_path(kind: ArtifactKind, dir: &Path, artifact_id: &str) -> PathBuf {
    match kind {
        ArtifactKind::Agent => dir.join(format!("{}.md", artifact_id)),
        ArtifactKind::Skill => dir.join(artifact_id),
    }
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Collision-free id: UTC time, pid, process-wide sequence, short hash of `salt`.
///
/// Lexicographic order follows creation order within a process.
pub(crate) fn unique_id(salt: &str) -> String {
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let digest = blake3::hash(salt.as_bytes()).to_hex().to_string();
    format!(
        "{}-{}-{:06}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%6fZ"),
        std::process::id(),
        sequence,
        &digest[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_paths_follow_layout() {
        let dir = Path::new("/p/.claude/agents");
        assert_eq!(
            artifact_path(ArtifactKind::Agent, dir, "qa"),
            PathBuf::from("/p/.claude/agents/qa.md")
        );
        assert_eq!(
            artifact_path(ArtifactKind::Skill, Path::new("/p/.claude/skills"), "pdf"),
            PathBuf::from("/p/.claude/skills/pdf")
        );
    }

    #[test]
    fn unique_ids_are_distinct_for_same_salt() {
        let a = unique_id("/t/qa.md");
        let b = unique_id("/t/qa.md");
        assert_ne!(a, b);
        assert!(!a.contains('/'));
    }
}
