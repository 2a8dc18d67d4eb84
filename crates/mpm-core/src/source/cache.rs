//! Local mirror of remote sources and the artifact snapshot built from it.
//!
//! Layout under the cache root:
//!
//! ```text
//! sources/<source_id>/...   mirrored files (relative to the source subdir)
//! staging/<source_id>/...   in-progress update of a mirror
//! state/<source_id>.json    remote sha per mirrored file
//! index.json                last CacheSnapshot
//! ```
//!
//! A mirror is only ever replaced as a whole: updates are written into a
//! [`StagedSource`] and swapped in by [`SourceCache::commit`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fs::hash_artifact;
use crate::fs::materialize::{copy_path, move_path, remove_path, write_file_atomic};
use crate::types::ArtifactKind;

use super::SourceDescriptor;

/// Skill directories are recognised by one of these marker files.
pub const SKILL_MARKERS: [&str; 2] = ["SKILL.md", "skill.md"];

/// Directory holding archived agents; never treated as a source of agents.
const ARCHIVE_SEGMENT: &str = "unused";

/// Sync bookkeeping for one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceState {
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    /// Relative path -> remote sha of the mirrored copy.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

/// One artifact available in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub artifact_id: String,
    /// Path relative to the source's mirror directory.
    pub relative_path: String,
    pub content_hash: String,
    pub source_id: String,
    pub fetched_at: DateTime<Utc>,
}

/// An artifact id shadowed by a higher-priority source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedArtifact {
    pub artifact_id: String,
    pub source_id: String,
    /// Source whose copy was kept.
    pub kept_from: String,
}

/// The desired artifact set for one kind, as seen in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub kind: ArtifactKind,
    pub cache_root: PathBuf,
    pub entries: BTreeMap<String, CacheEntry>,
    #[serde(default)]
    pub skipped: Vec<SkippedArtifact>,
}

impl CacheSnapshot {
    pub fn empty(kind: ArtifactKind, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            cache_root: cache_root.into(),
            entries: BTreeMap::new(),
            skipped: Vec::new(),
        }
    }

    pub fn get(&self, artifact_id: &str) -> Option<&CacheEntry> {
        self.entries.get(artifact_id)
    }

    /// Absolute path of the cached artifact content.
    pub fn artifact_path(&self, entry: &CacheEntry) -> PathBuf {
        SourceCache::new(&self.cache_root)
            .source_dir(&entry.source_id)
            .join(&entry.relative_path)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache index: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache index: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize cache index")?;
        write_file_atomic(path, content.as_bytes())
    }
}

/// Filesystem accessor for the cache root.
#[derive(Debug, Clone)]
pub struct SourceCache {
    root: PathBuf,
}

impl SourceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self, source_id: &str) -> PathBuf {
        self.root.join("sources").join(source_id)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn state_path(&self, source_id: &str) -> PathBuf {
        self.root.join("state").join(format!("{}.json", source_id))
    }

    /// Load a source's state; unreadable state degrades to "nothing cached".
    pub fn load_state(&self, source_id: &str) -> SourceState {
        let path = self.state_path(source_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return SourceState::default(),
        };
        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(source = %source_id, error = %err, "Discarding corrupt cache state");
                SourceState::default()
            }
        }
    }

    pub fn save_state(&self, source_id: &str, state: &SourceState) -> anyhow::Result<()> {
        let content =
            serde_json::to_string_pretty(state).context("Failed to serialize cache state")?;
        write_file_atomic(&self.state_path(source_id), content.as_bytes())
    }

    pub fn has_file(&self, source_id: &str, relative: &str) -> bool {
        self.source_dir(source_id).join(relative).is_file()
    }

    fn staging_dir(&self, source_id: &str) -> PathBuf {
        self.root.join("staging").join(source_id)
    }

    /// Start an update of a source's mirror, seeded with its current content.
    ///
    /// Leftovers of an interrupted update are discarded first.
    pub fn stage(&self, source_id: &str) -> anyhow::Result<StagedSource> {
        let dir = self.staging_dir(source_id);
        match remove_path(&dir) {
            Ok(()) => tracing::debug!(source = %source_id, "Discarded stale staging directory"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("Failed to clear staging directory: {}", dir.display())));
            }
        }

        let current = self.source_dir(source_id);
        if current.is_dir() {
            copy_path(&current, &dir)?;
        } else {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create staging directory: {}", dir.display()))?;
        }

        Ok(StagedSource {
            source_id: source_id.to_string(),
            dir,
        })
    }

    /// Replace the source's mirror with the staged copy.
    pub fn commit(&self, staged: StagedSource) -> anyhow::Result<()> {
        let target = self.source_dir(&staged.source_id);
        move_path(&staged.dir, &target)
            .with_context(|| format!("Failed to commit cache update for source '{}'", staged.source_id))
    }

    /// Drop a staged update; the mirror keeps its previous content.
    pub fn discard(&self, staged: StagedSource) {
        if let Err(err) = remove_path(&staged.dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    source = %staged.source_id,
                    path = %staged.dir.display(),
                    error = %err,
                    "Failed to remove staging directory"
                );
            }
        }
    }

    /// Build the snapshot for `kind` from every enabled source, in priority order.
    ///
    /// Sources that failed to sync this time still contribute what earlier
    /// runs mirrored.
    pub fn snapshot(
        &self,
        kind: ArtifactKind,
        sources: &[SourceDescriptor],
    ) -> anyhow::Result<CacheSnapshot> {
        let mut snapshot = CacheSnapshot::empty(kind, &self.root);

        for source in sources.iter().filter(|s| s.enabled) {
            let dir = self.source_dir(&source.id);
            if !dir.is_dir() {
                continue;
            }
            let fetched_at = self
                .load_state(&source.id)
                .synced_at
                .unwrap_or_else(Utc::now);

            for (artifact_id, relative_path) in discover_artifacts(kind, &dir)? {
                if let Some(existing) = snapshot.entries.get(&artifact_id) {
                    if existing.source_id == source.id {
                        tracing::warn!(
                            artifact = %artifact_id,
                            source = %source.id,
                            kept = %existing.relative_path,
                            ignored = %relative_path,
                            "Duplicate artifact id within one source; keeping the first path"
                        );
                        continue;
                    }
                    tracing::debug!(
                        artifact = %artifact_id,
                        source = %source.id,
                        kept = %existing.source_id,
                        "Skipping artifact shadowed by an earlier source"
                    );
                    snapshot.skipped.push(SkippedArtifact {
                        artifact_id,
                        source_id: source.id.clone(),
                        kept_from: existing.source_id.clone(),
                    });
                    continue;
                }

                let content_hash = hash_artifact(kind, &dir.join(&relative_path))?;
                snapshot.entries.insert(
                    artifact_id.clone(),
                    CacheEntry {
                        artifact_id,
                        relative_path,
                        content_hash,
                        source_id: source.id.clone(),
                        fetched_at,
                    },
                );
            }
        }

        Ok(snapshot)
    }
}

/// Writable copy of one source's mirror, invisible to snapshots until committed.
#[derive(Debug)]
pub struct StagedSource {
    source_id: String,
    dir: PathBuf,
}

impl StagedSource {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_file(&self, relative: &str, bytes: &[u8]) -> anyhow::Result<()> {
        if !is_safe_relative(relative) {
            anyhow::bail!("Refusing to cache unsafe path '{}'", relative);
        }
        write_file_atomic(&self.dir.join(relative), bytes)
    }

    pub fn remove_file(&self, relative: &str) -> anyhow::Result<()> {
        if !is_safe_relative(relative) {
            return Ok(());
        }
        let path = self.dir.join(relative);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(anyhow::Error::new(err)
                .context(format!("Failed to remove cached file: {}", path.display()))),
        }
    }
}

/// Relative, `/`-separated, without `.`/`..` or empty segments.
pub(crate) fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// Find `(artifact_id, relative_path)` pairs under a mirrored source.
fn discover_artifacts(kind: ArtifactKind, dir: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let mut found = Vec::new();
    walk(kind, dir, "", &mut found)?;
    Ok(found)
}

fn walk(
    kind: ArtifactKind,
    dir: &Path,
    base: &str,
    found: &mut Vec<(String, String)>,
) -> anyhow::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read cache directory: {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read cache entries: {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let relative = if base.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", base, name)
        };
        let path = entry.path();
        let ty = entry
            .file_type()
            .with_context(|| format!("Failed to stat: {}", path.display()))?;

        match kind {
            ArtifactKind::Agent => {
                if ty.is_dir() {
                    if name != ARCHIVE_SEGMENT {
                        walk(kind, &path, &relative, found)?;
                    }
                } else if ty.is_file() && !name.eq_ignore_ascii_case("README.md") {
                    if let Some(id) = name.strip_suffix(".md") {
                        found.push((id.to_string(), relative));
                    }
                }
            }
            ArtifactKind::Skill => {
                if !ty.is_dir() {
                    continue;
                }
                if SKILL_MARKERS.iter().any(|m| path.join(m).is_file()) {
                    found.push((name, relative));
                } else {
                    walk(kind, &path, &relative, found)?;
                }
            }
        }
    }
    Ok(())
}
