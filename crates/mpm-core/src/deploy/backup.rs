//! Snapshots of deployed artifacts taken right before they are mutated.
//!
//! Each backup is a directory `<root>/<backup_id>/` holding `record.json` and
//! a byte-for-byte `snapshot` (file or directory tree). Restoring is left to
//! explicit tooling; reconciliation never rolls back on its own.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::DeploymentContext;
use crate::fs::materialize::{copy_file_atomic, copy_path, replace_dir_with_copy, write_file_atomic};
use crate::types::ArtifactKind;

use super::unique_id;

const RECORD_FILE: &str = "record.json";
const SNAPSHOT_NAME: &str = "snapshot";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub backup_id: String,
    pub original_path: PathBuf,
    pub snapshot_location: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn for_context(ctx: &DeploymentContext, kind: ArtifactKind) -> Self {
        Self::new(ctx.config_dir().join("backups").join(kind.dir_name()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot `path`; `None` when there is nothing to protect.
    pub fn backup(&self, path: &Path) -> anyhow::Result<Option<BackupRecord>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("Failed to stat backup source: {}", path.display())));
            }
        };

        let backup_id = unique_id(&path.to_string_lossy());
        let dir = self.root.join(&backup_id);
        let snapshot_location = dir.join(SNAPSHOT_NAME);

        if let Err(err) = copy_path(path, &snapshot_location) {
            let _ = fs::remove_dir_all(&dir);
            return Err(err.context(format!("Failed to snapshot {}", path.display())));
        }

        let record = BackupRecord {
            backup_id,
            original_path: path.to_path_buf(),
            snapshot_location,
            timestamp: Utc::now(),
            is_dir: meta.is_dir(),
        };
        let content =
            serde_json::to_string_pretty(&record).context("Failed to serialize backup record")?;
        write_file_atomic(&dir.join(RECORD_FILE), content.as_bytes())?;

        tracing::debug!(backup = %record.backup_id, path = %path.display(), "Backed up artifact");
        Ok(Some(record))
    }

    pub fn get(&self, backup_id: &str) -> anyhow::Result<BackupRecord> {
        if backup_id.is_empty() || backup_id.contains(['/', '\\']) || backup_id.starts_with('.') {
            anyhow::bail!("Invalid backup id: {}", backup_id);
        }
        let path = self.root.join(backup_id).join(RECORD_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Backup not found: {}", backup_id))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse backup record: {}", path.display()))
    }

    /// Copy a snapshot back over its original path.
    pub fn restore(&self, backup_id: &str) -> anyhow::Result<BackupRecord> {
        let record = self.get(backup_id)?;
        if record.is_dir {
            replace_dir_with_copy(&record.snapshot_location, &record.original_path)?;
        } else {
            copy_file_atomic(&record.snapshot_location, &record.original_path)?;
        }
        tracing::info!(backup = %backup_id, path = %record.original_path.display(), "Restored backup");
        Ok(record)
    }

    /// All backups, oldest first.
    pub fn list(&self) -> anyhow::Result<Vec<BackupRecord>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read backups: {}", self.root.display()))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            match self.get(&name) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(backup = %name, error = %format!("{:#}", err), "Skipping unreadable backup")
                }
            }
        }
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.backup_id.cmp(&b.backup_id))
        });
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_path_needs_no_backup() {
        let temp = TempDir::new().unwrap();
        let manager = BackupManager::new(temp.path().join("backups"));
        assert!(manager.backup(&temp.path().join("nope.md")).unwrap().is_none());
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn file_backup_restores_prior_bytes() {
        let temp = TempDir::new().unwrap();
        let manager = BackupManager::new(temp.path().join("backups"));
        let target = temp.path().join("agents").join("qa.md");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "v1").unwrap();

        let record = manager.backup(&target).unwrap().unwrap();
        fs::write(&target, "v2").unwrap();
        manager.restore(&record.backup_id).unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "v1");
        assert!(!record.is_dir);
    }

    #[test]
    fn directory_backup_restores_tree() {
        let temp = TempDir::new().unwrap();
        let manager = BackupManager::new(temp.path().join("backups"));
        let skill = temp.path().join("skills").join("pdf");
        fs::create_dir_all(skill.join("scripts")).unwrap();
        fs::write(skill.join("SKILL.md"), "v1").unwrap();
        fs::write(skill.join("scripts").join("run.sh"), "echo").unwrap();

        let record = manager.backup(&skill).unwrap().unwrap();
        fs::remove_dir_all(&skill).unwrap();
        manager.restore(&record.backup_id).unwrap();

        assert_eq!(fs::read_to_string(skill.join("SKILL.md")).unwrap(), "v1");
        assert!(skill.join("scripts").join("run.sh").exists());
    }

    #[test]
    fn ids_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let manager = BackupManager::new(temp.path().join("backups"));
        let target = temp.path().join("qa.md");
        fs::write(&target, "x").unwrap();

        let a = manager.backup(&target).unwrap().unwrap();
        let b = manager.backup(&target).unwrap().unwrap();
        assert_ne!(a.backup_id, b.backup_id);
        assert_eq!(manager.list().unwrap().len(), 2);
    }

    #[test]
    fn path_like_ids_are_rejected() {
        let temp = TempDir::new().unwrap();
        let manager = BackupManager::new(temp.path().join("backups"));
        assert!(manager.get("../etc").is_err());
        assert!(manager.restore("").is_err());
    }
}
