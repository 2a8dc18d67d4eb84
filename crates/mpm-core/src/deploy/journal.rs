//! Durable append-only log of mutation attempts.
//!
//! Every mutation writes a `begin` event before touching the filesystem and a
//! `complete` event afterwards, so a crash in between leaves an in-flight
//! entry behind. Events are JSON lines; a torn last line is skipped on read.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::DeploymentContext;
use crate::types::ArtifactKind;

use super::unique_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalAction {
    Deploy,
    Update,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalOutcome {
    Applied,
    Failed,
}

/// Identifier returned by [`OperationJournal::begin`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Folded view of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub operation_id: OperationId,
    pub action: JournalAction,
    pub target_path: PathBuf,
    pub backup_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// `None` while in flight, or if the process died before completing.
    pub outcome: Option<JournalOutcome>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum JournalEvent {
    Begin {
        operation_id: OperationId,
        action: JournalAction,
        target_path: PathBuf,
        timestamp: DateTime<Utc>,
    },
    Backup {
        operation_id: OperationId,
        backup_id: String,
    },
    Complete {
        operation_id: OperationId,
        outcome: JournalOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct OperationJournal {
    path: PathBuf,
}

impl OperationJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_context(ctx: &DeploymentContext, kind: ArtifactKind) -> Self {
        Self::new(
            ctx.config_dir()
                .join("journal")
                .join(format!("{}.jsonl", kind.dir_name())),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record intent. The id is returned even if the write failed.
    pub fn begin(&self, action: JournalAction, target_path: &Path) -> OperationId {
        let operation_id = OperationId(unique_id(&target_path.to_string_lossy()));
        self.append(&JournalEvent::Begin {
            operation_id: operation_id.clone(),
            action,
            target_path: target_path.to_path_buf(),
            timestamp: Utc::now(),
        });
        operation_id
    }

    pub fn attach_backup(&self, operation_id: &OperationId, backup_id: &str) {
        self.append(&JournalEvent::Backup {
            operation_id: operation_id.clone(),
            backup_id: backup_id.to_string(),
        });
    }

    pub fn complete(
        &self,
        operation_id: &OperationId,
        outcome: JournalOutcome,
        message: Option<String>,
    ) {
        self.append(&JournalEvent::Complete {
            operation_id: operation_id.clone(),
            outcome,
            message,
            timestamp: Utc::now(),
        });
    }

    /// Never fails: a journal problem must not mask the operation's own result.
    fn append(&self, event: &JournalEvent) {
        if let Err(err) = self.try_append(event) {
            tracing::warn!(
                journal = %self.path.display(),
                error = %format!("{:#}", err),
                "Failed to write journal event"
            );
        }
    }

    fn try_append(&self, event: &JournalEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create journal directory: {}", parent.display())
            })?;
        }
        let mut line = serde_json::to_string(event).context("Failed to serialize journal event")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to journal: {}", self.path.display()))?;
        file.sync_data()
            .with_context(|| format!("Failed to sync journal: {}", self.path.display()))?;
        Ok(())
    }

    /// All operations in the order they began.
    pub fn entries(&self) -> anyhow::Result<Vec<JournalEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("Failed to read journal: {}", self.path.display())));
            }
        };

        let mut entries: Vec<JournalEntry> = Vec::new();
        let mut index: HashMap<OperationId, usize> = HashMap::new();

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: JournalEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(line = line_no + 1, error = %err, "Skipping malformed journal line");
                    continue;
                }
            };
            match event {
                JournalEvent::Begin {
                    operation_id,
                    action,
                    target_path,
                    timestamp,
                } => {
                    index.insert(operation_id.clone(), entries.len());
                    entries.push(JournalEntry {
                        operation_id,
                        action,
                        target_path,
                        backup_ref: None,
                        timestamp,
                        outcome: None,
                        message: None,
                    });
                }
                JournalEvent::Backup {
                    operation_id,
                    backup_id,
                } => {
                    if let Some(&i) = index.get(&operation_id) {
                        entries[i].backup_ref = Some(backup_id);
                    }
                }
                JournalEvent::Complete {
                    operation_id,
                    outcome,
                    message,
                    ..
                } => {
                    if let Some(&i) = index.get(&operation_id) {
                        entries[i].outcome = Some(outcome);
                        entries[i].message = message;
                    }
                }
            }
        }

        Ok(entries)
    }

    /// Operations that began but never completed.
    pub fn in_flight(&self) -> anyhow::Result<Vec<JournalEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.outcome.is_none())
            .collect())
    }
}
