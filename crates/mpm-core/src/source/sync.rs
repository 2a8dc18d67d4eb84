//! Remote sources -> local cache synchronization.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::ArtifactKind;

use super::cache::{CacheSnapshot, SkippedArtifact, SourceCache, is_safe_relative};
use super::fetcher::{RemoteFetcher, RemoteFile};
use super::SourceDescriptor;

/// Per-file progress notification.
#[derive(Debug, Clone, Copy)]
pub struct SyncProgress<'a> {
    pub source_id: &'a str,
    pub path: &'a str,
    /// 1-based position within the source's listing.
    pub current: usize,
    pub total: usize,
    /// Whether the file was downloaded (false: served from cache).
    pub downloaded: bool,
}

/// Receives progress for UI feedback; cannot influence the sync.
pub trait SyncObserver {
    fn on_progress(&self, progress: &SyncProgress<'_>);
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {
    fn on_progress(&self, _progress: &SyncProgress<'_>) {}
}

impl<F> SyncObserver for F
where
    F: Fn(&SyncProgress<'_>),
{
    fn on_progress(&self, progress: &SyncProgress<'_>) {
        self(progress)
    }
}

/// Outcome of syncing one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub synced: bool,
    /// Files listed remotely (after subdir filtering).
    pub files_discovered: usize,
    /// Files downloaded in this pass.
    pub files_updated: usize,
    /// Files already current in the cache and not downloaded.
    pub files_cached: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of [`SourceSyncManager::sync_all`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    pub synced_count: usize,
    pub failed_count: usize,
    pub total_files_updated: usize,
    pub total_files_cached: usize,
    pub sources: BTreeMap<String, SourceOutcome>,
    #[serde(default)]
    pub skipped: Vec<SkippedArtifact>,

    /// Desired set built from the cache after the pass.
    #[serde(skip)]
    pub snapshot: Option<CacheSnapshot>,

    /// Set when the snapshot could not be built; reconciliation must not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_error: Option<String>,
}

impl SyncSummary {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sources
            .iter()
            .filter_map(|(id, outcome)| outcome.error.as_deref().map(|e| (id.as_str(), e)))
    }
}

/// Mirrors configured sources of one artifact kind into a [`SourceCache`].
pub struct SourceSyncManager {
    kind: ArtifactKind,
    cache: SourceCache,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl SourceSyncManager {
    pub fn new(kind: ArtifactKind, cache_root: PathBuf, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            kind,
            cache: SourceCache::new(cache_root),
            fetcher,
        }
    }

    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }

    /// Sync every enabled source, then rebuild and persist the cache snapshot.
    ///
    /// A failing source is recorded in its outcome and never stops the others.
    pub fn sync_all(
        &self,
        sources: &[SourceDescriptor],
        force: bool,
        observer: &dyn SyncObserver,
    ) -> SyncSummary {
        let mut summary = SyncSummary::default();

        for source in sources.iter().filter(|s| s.enabled) {
            let outcome = match self.sync_source(source, force, observer) {
                Ok(outcome) => {
                    tracing::info!(
                        kind = %self.kind,
                        source = %source.id,
                        discovered = outcome.files_discovered,
                        updated = outcome.files_updated,
                        "Synced source"
                    );
                    outcome
                }
                Err((mut outcome, err)) => {
                    tracing::warn!(kind = %self.kind, source = %source.id, error = %err, "Source sync failed");
                    outcome.error = Some(err);
                    outcome
                }
            };

            if outcome.synced {
                summary.synced_count += 1;
            } else {
                summary.failed_count += 1;
            }
            summary.total_files_updated += outcome.files_updated;
            summary.total_files_cached += outcome.files_cached;
            summary.sources.insert(source.id.clone(), outcome);
        }

        match self.cache.snapshot(self.kind, sources) {
            Ok(snapshot) => {
                if let Err(err) = snapshot.save(&self.cache.index_path()) {
                    tracing::warn!(kind = %self.kind, error = %format!("{:#}", err), "Failed to persist cache index");
                }
                summary.skipped = snapshot.skipped.clone();
                summary.snapshot = Some(snapshot);
            }
            Err(err) => {
                let message = format!("{:#}", err);
                tracing::error!(kind = %self.kind, error = %message, "Failed to build cache snapshot");
                summary.snapshot_error = Some(message);
            }
        }

        summary
    }

    /// Mirror one source. Downloads land in a staged copy of the mirror that
    /// replaces it only when every file arrived; on failure the previous
    /// mirror and its state are left exactly as they were.
    fn sync_source(
        &self,
        source: &SourceDescriptor,
        force: bool,
        observer: &dyn SyncObserver,
    ) -> Result<SourceOutcome, (SourceOutcome, String)> {
        let mut outcome = SourceOutcome::default();

        let listing = match self.fetcher.list(source) {
            Ok(listing) => listing,
            Err(err) => return Err((outcome, err.to_string())),
        };
        let files = scope_to_subdir(source, listing);
        outcome.files_discovered = files.len();

        let mut state = self.cache.load_state(&source.id);
        let pending: BTreeSet<&str> = files
            .iter()
            .filter(|(relative, remote)| {
                force
                    || state.files.get(relative.as_str()) != Some(&remote.sha)
                    || !self.cache.has_file(&source.id, relative)
            })
            .map(|(relative, _)| relative.as_str())
            .collect();
        let stale: Vec<String> = state
            .files
            .keys()
            .filter(|path| !files.contains_key(path.as_str()))
            .cloned()
            .collect();
        outcome.files_cached = files.len() - pending.len();

        let staged = if pending.is_empty() && stale.is_empty() {
            None
        } else {
            match self.cache.stage(&source.id) {
                Ok(staged) => Some(staged),
                Err(err) => return Err((outcome, format!("{:#}", err))),
            }
        };

        let total = files.len();
        let mut updated = BTreeMap::new();
        let mut failure = None;

        for (index, (relative, remote)) in files.iter().enumerate() {
            let downloaded = match &staged {
                Some(staged) if pending.contains(relative.as_str()) => {
                    let written = self
                        .fetcher
                        .download(source, remote)
                        .map_err(|e| e.to_string())
                        .and_then(|bytes| {
                            staged
                                .write_file(relative, &bytes)
                                .map_err(|e| format!("{:#}", e))
                        });
                    if let Err(err) = written {
                        failure = Some(err);
                        break;
                    }
                    updated.insert(relative.clone(), remote.sha.clone());
                    true
                }
                _ => false,
            };

            observer.on_progress(&SyncProgress {
                source_id: &source.id,
                path: relative,
                current: index + 1,
                total,
                downloaded,
            });
        }

        if let Some(staged) = staged {
            if failure.is_none() {
                for path in &stale {
                    if let Err(err) = staged.remove_file(path) {
                        failure = Some(format!("{:#}", err));
                        break;
                    }
                    tracing::debug!(source = %source.id, path = %path, "Removed file deleted upstream");
                }
            }
            match failure {
                Some(err) => {
                    self.cache.discard(staged);
                    return Err((outcome, err));
                }
                None => {
                    if let Err(err) = self.cache.commit(staged) {
                        return Err((outcome, format!("{:#}", err)));
                    }
                }
            }
        }

        outcome.files_updated = updated.len();
        state.files.extend(updated);
        for path in &stale {
            state.files.remove(path);
        }
        state.synced_at = Some(Utc::now());
        if let Err(err) = self.cache.save_state(&source.id, &state) {
            return Err((outcome, format!("{:#}", err)));
        }

        outcome.synced = true;
        Ok(outcome)
    }
}

/// Keep files under the source's subdir, keyed by path relative to it.
fn scope_to_subdir(
    source: &SourceDescriptor,
    listing: Vec<RemoteFile>,
) -> BTreeMap<String, RemoteFile> {
    let prefix = source.subdir_prefix().map(|p| format!("{}/", p));
    listing
        .into_iter()
        .filter_map(|file| {
            let relative = match &prefix {
                Some(prefix) => file.path.strip_prefix(prefix.as_str())?.to_string(),
                None => file.path.clone(),
            };
            if !is_safe_relative(&relative) {
                tracing::warn!(source = %source.id, path = %file.path, "Ignoring unsafe remote path");
                return None;
            }
            Some((relative, file))
        })
        .collect()
}
