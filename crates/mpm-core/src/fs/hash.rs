//! Deterministic content hashing for cached and deployed artifacts.
//!
//! Agents hash as the blake3 digest of their bytes. Skill directories hash as
//! a tree digest: entries sorted by name, each contributing
//! `relative_path || 0x00 || len(content) as u64 LE || content` for files and
//! `relative_path || 0xFF` for directories. The length prefix keeps file
//! boundaries unambiguous.

use anyhow::Context;
use std::fs;
use std::path::Path;

use crate::types::ArtifactKind;

/// Hash raw bytes; hex output.
pub fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Hash a single file's content.
pub fn hash_file(path: &Path) -> anyhow::Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(hash_bytes(&bytes))
}

/// Compute deterministic tree hash of a directory.
///
/// Symlinks are rejected so a deployed skill can never point outside its tree.
pub fn hash_tree(path: &Path) -> anyhow::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hash_dir_recursive(&mut hasher, path, "")?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash an artifact at `path` according to its kind.
pub fn hash_artifact(kind: ArtifactKind, path: &Path) -> anyhow::Result<String> {
    match kind {
        ArtifactKind::Agent => hash_file(path),
        ArtifactKind::Skill => hash_tree(path),
    }
}

fn hash_dir_recursive(hasher: &mut blake3::Hasher, dir: &Path, base: &str) -> anyhow::Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    let mut sorted_entries: Vec<_> = entries
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read directory entries: {}", dir.display()))?;
    sorted_entries.sort_by_key(|e| e.file_name());

    for entry in sorted_entries {
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        let rel_path = if base.is_empty() {
            name_str.to_string()
        } else {
            format!("{}/{}", base, name_str)
        };

        let ty = entry
            .file_type()
            .with_context(|| format!("Failed to stat file: {}", entry.path().display()))?;

        if ty.is_dir() {
            hasher.update(rel_path.as_bytes());
            hasher.update(&[0xFF]);
            hash_dir_recursive(hasher, &entry.path(), &rel_path)?;
        } else if ty.is_file() {
            hasher.update(rel_path.as_bytes());
            hasher.update(&[0x00]);
            let content = fs::read(entry.path())
                .with_context(|| format!("Failed to read file: {}", entry.path().display()))?;
            hasher.update(&(content.len() as u64).to_le_bytes());
            hasher.update(&content);
        } else if ty.is_symlink() {
            anyhow::bail!("Symlinks are not supported: {}", entry.path().display());
        } else {
            anyhow::bail!(
                "Unsupported filesystem entry type: {}",
                entry.path().display()
            );
        }
    }

    Ok(())
}
