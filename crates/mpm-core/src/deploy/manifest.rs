//! Ownership record of deployed artifacts.
//!
//! Only artifacts listed here are ever updated in place or removed; anything
//! else in a target directory belongs to the user.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::DeploymentContext;
use crate::fs::materialize::write_file_atomic;
use crate::types::ArtifactKind;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub content_hash: String,
    pub source_id: String,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub kind: ArtifactKind,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: BTreeMap<String, ManifestEntry>,
    /// Last time every managed artifact was verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_full_verify: Option<DateTime<Utc>>,
}

impl Manifest {
    pub fn new(kind: ArtifactKind) -> Self {
        Self {
            version: MANIFEST_VERSION,
            kind,
            generated_at: Utc::now(),
            entries: BTreeMap::new(),
            last_full_verify: None,
        }
    }
}

/// Persistence for one (scope, kind) manifest under the config directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    kind: ArtifactKind,
}

impl ManifestStore {
    pub fn new(path: PathBuf, kind: ArtifactKind) -> Self {
        Self { path, kind }
    }

    pub fn for_context(ctx: &DeploymentContext, kind: ArtifactKind) -> Self {
        Self::new(
            ctx.config_dir()
                .join("manifests")
                .join(format!("{}.json", kind.dir_name())),
            kind,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing manifest means nothing is managed yet.
    pub fn load(&self) -> anyhow::Result<Manifest> {
        if !self.path.exists() {
            return Ok(Manifest::new(self.kind));
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read manifest: {}", self.path.display()))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", self.path.display()))?;

        if manifest.version != MANIFEST_VERSION {
            anyhow::bail!(
                "Unsupported manifest version {} in {}",
                manifest.version,
                self.path.display()
            );
        }
        if manifest.kind != self.kind {
            anyhow::bail!(
                "Manifest {} records {} artifacts, expected {}",
                self.path.display(),
                manifest.kind,
                self.kind
            );
        }
        Ok(manifest)
    }

    pub fn save(&self, manifest: &Manifest) -> anyhow::Result<()> {
        let content =
            serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")?;
        write_file_atomic(&self.path, content.as_bytes())
            .with_context(|| format!("Failed to write manifest: {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_manifest_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = ManifestStore::new(temp.path().join("agents.json"), ArtifactKind::Agent);
        let manifest = store.load().unwrap();
        assert!(manifest.entries.is_empty());
        assert_eq!(manifest.kind, ArtifactKind::Agent);
    }

    #[test]
    fn save_and_reload() {
        let temp = TempDir::new().unwrap();
        let store = ManifestStore::new(temp.path().join("m").join("skills.json"), ArtifactKind::Skill);
        let mut manifest = Manifest::new(ArtifactKind::Skill);
        manifest.entries.insert(
            "pdf".to_string(),
            ManifestEntry {
                content_hash: "abc".to_string(),
                source_id: "system".to_string(),
                deployed_at: Utc::now(),
            },
        );
        store.save(&manifest).unwrap();

        assert_eq!(store.load().unwrap(), manifest);
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agents.json");
        ManifestStore::new(path.clone(), ArtifactKind::Skill)
            .save(&Manifest::new(ArtifactKind::Skill))
            .unwrap();

        let err = ManifestStore::new(path, ArtifactKind::Agent).load().unwrap_err();
        assert!(err.to_string().contains("expected agent"));
    }
}
