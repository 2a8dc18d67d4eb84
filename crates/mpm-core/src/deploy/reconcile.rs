//! Cache vs. manifest reconciliation for one (scope, kind).
//!
//! ```text
//! desired  D = snapshot ids - disabled
//! managed  M = manifest ids
//! remove     = M - D
//! deploy     = D - M
//! update     = D ∩ M, hash differs
//! unchanged  = D ∩ M, hash matches (and target still present)
//! ```
//!
//! Removals run before writes. Each mutation is journaled, backed up when
//! something exists to protect, and isolated: one failing artifact lands in
//! `errors` and the pass continues. The manifest only records successes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MpmConfig;
use crate::context::DeploymentContext;
use crate::error::ReconcileError;
use crate::fs::materialize::{copy_file_atomic, move_path, remove_path, replace_dir_with_copy};
use crate::source::{CacheEntry, CacheSnapshot};
use crate::types::ArtifactKind;

use super::artifact_path;
use super::backup::BackupManager;
use super::journal::{JournalAction, JournalOutcome, OperationJournal};
use super::lock::{DeployLock, DeployLockGuard};
use super::manifest::{Manifest, ManifestEntry, ManifestStore};

/// Per-scope settings that shape the desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Artifact ids never deployed; removed if currently managed.
    pub disabled: BTreeSet<String>,
    /// Back up and take over pre-existing unmanaged targets.
    pub adopt_unmanaged: bool,
}

impl ReconcileOptions {
    pub fn from_config(config: &MpmConfig, kind: ArtifactKind) -> Self {
        let section = config.artifact(kind);
        Self {
            disabled: section.disabled.iter().cloned().collect(),
            adopt_unmanaged: section.adopt_unmanaged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactError {
    pub artifact_id: String,
    pub message: String,
}

/// Outcome of one reconciliation pass.
///
/// `deployed`, `removed` and `unchanged` are pairwise disjoint; together with
/// the ids in `errors` they cover every id considered. `updated` is the
/// subset of `deployed` that replaced existing content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub deployed: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
    pub errors: Vec<ArtifactError>,
}

impl DeploymentResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        !self.deployed.is_empty() || !self.removed.is_empty()
    }

    /// Every id this pass looked at.
    pub fn considered(&self) -> BTreeSet<String> {
        self.deployed
            .iter()
            .chain(&self.removed)
            .chain(&self.unchanged)
            .chain(self.errors.iter().map(|e| &e.artifact_id))
            .cloned()
            .collect()
    }

    fn fail(&mut self, artifact_id: &str, err: anyhow::Error) {
        self.errors.push(ArtifactError {
            artifact_id: artifact_id.to_string(),
            message: format!("{:#}", err),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    /// Not managed, nothing at the target.
    Deploy,
    /// Managed, content changed.
    Update,
    /// Managed and current, but the target vanished.
    Restore,
    /// Not managed, target exists and adoption is enabled.
    Adopt,
}

impl Change {
    fn action(self) -> JournalAction {
        match self {
            Change::Deploy | Change::Restore => JournalAction::Deploy,
            Change::Update | Change::Adopt => JournalAction::Update,
        }
    }

    fn replaces_content(self) -> bool {
        matches!(self, Change::Update | Change::Adopt)
    }
}

/// Reconciles the deployed artifacts of one kind in one context.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    context: DeploymentContext,
    kind: ArtifactKind,
    options: ReconcileOptions,
}

impl ReconciliationEngine {
    pub fn new(context: DeploymentContext, kind: ArtifactKind, options: ReconcileOptions) -> Self {
        Self {
            context,
            kind,
            options,
        }
    }

    pub fn context(&self) -> &DeploymentContext {
        &self.context
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Where artifact `artifact_id` is deployed.
    pub fn target_path(&self, artifact_id: &str) -> PathBuf {
        artifact_path(self.kind, &self.context.artifact_dir(self.kind), artifact_id)
    }

    pub fn manifest(&self) -> Result<Manifest, ReconcileError> {
        ManifestStore::for_context(&self.context, self.kind)
            .load()
            .map_err(ReconcileError::Manifest)
    }

    /// Stamp the manifest after every managed artifact was verified.
    pub fn record_full_verify(&self, at: DateTime<Utc>) -> Result<(), ReconcileError> {
        let _guard = DeployLock::for_context(&self.context, self.kind).acquire()?;
        let store = ManifestStore::for_context(&self.context, self.kind);
        let mut manifest = store.load().map_err(ReconcileError::Manifest)?;
        manifest.last_full_verify = Some(at);
        store.save(&manifest).map_err(ReconcileError::Manifest)
    }

    /// Bring the deployed set in line with `snapshot`, waiting for any
    /// concurrent reconciliation of the same scope and kind to finish.
    pub fn reconcile(&self, snapshot: &CacheSnapshot) -> Result<DeploymentResult, ReconcileError> {
        self.reconcile_with(snapshot, DeployLock::acquire)
    }

    /// Like [`ReconciliationEngine::reconcile`], but fails with
    /// [`ReconcileError::Locked`] instead of waiting.
    pub fn try_reconcile(
        &self,
        snapshot: &CacheSnapshot,
    ) -> Result<DeploymentResult, ReconcileError> {
        self.reconcile_with(snapshot, DeployLock::try_acquire)
    }

    fn reconcile_with(
        &self,
        snapshot: &CacheSnapshot,
        lock: fn(&DeployLock) -> Result<DeployLockGuard, ReconcileError>,
    ) -> Result<DeploymentResult, ReconcileError> {
        if snapshot.kind != self.kind {
            return Err(ReconcileError::KindMismatch {
                expected: self.kind,
                found: snapshot.kind,
            });
        }

        let target_dir = self.context.artifact_dir(self.kind);
        ensure_writable(&target_dir)?;

        let _guard = lock(&DeployLock::for_context(&self.context, self.kind))?;
        let store = ManifestStore::for_context(&self.context, self.kind);
        let mut manifest = store.load().map_err(ReconcileError::Manifest)?;
        let backups = BackupManager::for_context(&self.context, self.kind);
        let journal = OperationJournal::for_context(&self.context, self.kind);

        let desired: BTreeMap<&str, &CacheEntry> = snapshot
            .entries
            .iter()
            .filter(|(id, _)| !self.options.disabled.contains(id.as_str()))
            .map(|(id, entry)| (id.as_str(), entry))
            .collect();

        let mut result = DeploymentResult::default();

        let to_remove: Vec<String> = manifest
            .entries
            .keys()
            .filter(|id| !desired.contains_key(id.as_str()))
            .cloned()
            .collect();

        let mut to_write: Vec<(&str, &CacheEntry, Change)> = Vec::new();
        for (&id, &entry) in &desired {
            let target = self.target_path(id);
            let present = fs::symlink_metadata(&target).is_ok();
            match manifest.entries.get(id) {
                None if !present => to_write.push((id, entry, Change::Deploy)),
                None if self.options.adopt_unmanaged => to_write.push((id, entry, Change::Adopt)),
                None => {
                    tracing::warn!(kind = %self.kind, artifact = %id, "Refusing to overwrite unmanaged artifact");
                    result.fail(
                        id,
                        anyhow::anyhow!(
                            "{} exists but was not deployed by mpm; leaving it untouched",
                            target.display()
                        ),
                    );
                }
                Some(managed) if managed.content_hash != entry.content_hash => {
                    to_write.push((id, entry, Change::Update))
                }
                Some(_) if !present => to_write.push((id, entry, Change::Restore)),
                Some(_) => {
                    result.unchanged.insert(id.to_string());
                }
            }
        }

        for id in to_remove {
            match self.remove_artifact(&id, &backups, &journal) {
                Ok(()) => {
                    manifest.entries.remove(&id);
                    result.removed.insert(id);
                }
                Err(err) => result.fail(&id, err),
            }
        }

        for (id, entry, change) in to_write {
            match self.write_artifact(id, entry, snapshot, change, &backups, &journal) {
                Ok(()) => {
                    manifest.entries.insert(
                        id.to_string(),
                        ManifestEntry {
                            content_hash: entry.content_hash.clone(),
                            source_id: entry.source_id.clone(),
                            deployed_at: Utc::now(),
                        },
                    );
                    result.deployed.insert(id.to_string());
                    if change.replaces_content() {
                        result.updated.insert(id.to_string());
                    }
                }
                Err(err) => result.fail(id, err),
            }
        }

        if result.has_changes() {
            manifest.generated_at = Utc::now();
            store.save(&manifest).map_err(ReconcileError::Manifest)?;
        }

        tracing::info!(
            scope = %self.context.scope(),
            kind = %self.kind,
            deployed = result.deployed.len(),
            updated = result.updated.len(),
            removed = result.removed.len(),
            unchanged = result.unchanged.len(),
            errors = result.errors.len(),
            "Reconciliation finished"
        );
        Ok(result)
    }

    fn remove_artifact(
        &self,
        artifact_id: &str,
        backups: &BackupManager,
        journal: &OperationJournal,
    ) -> anyhow::Result<()> {
        let target = self.target_path(artifact_id);
        let archive = match self.kind {
            ArtifactKind::Agent => Some(artifact_path(
                self.kind,
                &self.context.archive_dir(),
                artifact_id,
            )),
            ArtifactKind::Skill => None,
        };

        journaled(journal, backups, JournalAction::Remove, &target, || {
            if fs::symlink_metadata(&target).is_err() {
                return Ok(());
            }
            match &archive {
                Some(archive) => move_path(&target, archive),
                None => remove_path(&target).map_err(|e| {
                    anyhow::Error::new(e).context(format!("Failed to remove {}", target.display()))
                }),
            }
        })?;

        tracing::info!(kind = %self.kind, artifact = %artifact_id, "Removed artifact");
        Ok(())
    }

    fn write_artifact(
        &self,
        artifact_id: &str,
        entry: &CacheEntry,
        snapshot: &CacheSnapshot,
        change: Change,
        backups: &BackupManager,
        journal: &OperationJournal,
    ) -> anyhow::Result<()> {
        let source = snapshot.artifact_path(entry);
        let target = self.target_path(artifact_id);

        journaled(journal, backups, change.action(), &target, || match self.kind {
            ArtifactKind::Agent => copy_file_atomic(&source, &target),
            ArtifactKind::Skill => replace_dir_with_copy(&source, &target),
        })?;

        tracing::info!(kind = %self.kind, artifact = %artifact_id, change = ?change, "Deployed artifact");
        Ok(())
    }
}

/// Journal intent, back up whatever is at `target`, mutate, journal outcome.
fn journaled(
    journal: &OperationJournal,
    backups: &BackupManager,
    action: JournalAction,
    target: &Path,
    mutate: impl FnOnce() -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let operation = journal.begin(action, target);

    let attempt = backups.backup(target).and_then(|record| {
        if let Some(record) = record {
            journal.attach_backup(&operation, &record.backup_id);
        }
        mutate()
    });

    match &attempt {
        Ok(()) => journal.complete(&operation, JournalOutcome::Applied, None),
        Err(err) => journal.complete(
            &operation,
            JournalOutcome::Failed,
            Some(format!("{:#}", err)),
        ),
    }
    attempt
}

/// Create the target directory and prove it accepts writes.
fn ensure_writable(dir: &Path) -> Result<(), ReconcileError> {
    let unwritable = |source| ReconcileError::TargetUnwritable {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(unwritable)?;
    let check = dir.join(format!(".mpm-write-check.{}", std::process::id()));
    fs::write(&check, b"").map_err(unwritable)?;
    let _ = fs::remove_file(&check);
    Ok(())
}
