//! Atomic materialization of files and directory trees.
//!
//! Every write lands in a uniquely named temp sibling first and is renamed
//! into place, so a reader never observes a half-written artifact.

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Write `bytes` to `dst` via temp file + rename.
pub fn write_file_atomic(dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    ensure_parent_dir(dst)?;
    let tmp = unique_temp_path(dst)?;

    if let Err(err) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(anyhow::Error::new(err)
            .context(format!("Failed to write temp file: {}", tmp.display())));
    }

    if let Err(err) = fs::rename(&tmp, dst) {
        let _ = fs::remove_file(&tmp);
        return Err(anyhow::Error::new(err).context(format!(
            "Failed to move temp file {} into {}",
            tmp.display(),
            dst.display()
        )));
    }
    Ok(())
}

/// Copy a single file to `dst` atomically.
pub fn copy_file_atomic(src: &Path, dst: &Path) -> anyhow::Result<()> {
    let bytes =
        fs::read(src).with_context(|| format!("Failed to read source file: {}", src.display()))?;
    write_file_atomic(dst, &bytes)
}

/// Replace `dst_dir` with a copy of `src_dir`.
///
/// The copy is assembled in a temp sibling; the old destination is removed
/// only after the copy succeeded.
pub fn replace_dir_with_copy(src_dir: &Path, dst_dir: &Path) -> anyhow::Result<()> {
    ensure_src_dir(src_dir)?;
    ensure_parent_dir(dst_dir)?;

    let tmp_dir = unique_temp_path(dst_dir)?;
    fs::create_dir_all(&tmp_dir)
        .with_context(|| format!("Failed to create temp directory: {}", tmp_dir.display()))?;

    if let Err(err) = copy_tree(src_dir, &tmp_dir) {
        let _ = fs::remove_dir_all(&tmp_dir);
        return Err(err);
    }

    if fs::symlink_metadata(dst_dir).is_ok() {
        remove_path(dst_dir).with_context(|| {
            format!(
                "Failed to remove existing destination: {}",
                dst_dir.display()
            )
        })?;
    }

    fs::rename(&tmp_dir, dst_dir).with_context(|| {
        format!(
            "Failed to move temp path {} into destination {}",
            tmp_dir.display(),
            dst_dir.display()
        )
    })?;
    Ok(())
}

/// Copy a file or directory tree to `dst`, which must not exist yet.
pub fn copy_path(src: &Path, dst: &Path) -> anyhow::Result<()> {
    let meta = fs::symlink_metadata(src)
        .with_context(|| format!("Failed to stat source: {}", src.display()))?;
    ensure_parent_dir(dst)?;
    if meta.is_dir() {
        fs::create_dir_all(dst)
            .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
        copy_tree(src, dst)
    } else {
        fs::copy(src, dst).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), dst.display())
        })?;
        Ok(())
    }
}

/// Move `src` to `dst`, replacing whatever is at `dst`.
pub fn move_path(src: &Path, dst: &Path) -> anyhow::Result<()> {
    ensure_parent_dir(dst)?;
    if fs::symlink_metadata(dst).is_ok() {
        remove_path(dst)
            .with_context(|| format!("Failed to remove existing path: {}", dst.display()))?;
    }
    fs::rename(src, dst)
        .with_context(|| format!("Failed to move {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Remove a file or a directory tree.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn ensure_src_dir(src_dir: &Path) -> anyhow::Result<()> {
    let meta = fs::metadata(src_dir)
        .with_context(|| format!("Failed to stat source directory: {}", src_dir.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("Source path is not a directory: {}", src_dir.display());
    }
    Ok(())
}

fn ensure_parent_dir(dst: &Path) -> anyhow::Result<()> {
    let parent = dst
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Destination path has no parent: {}", dst.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create destination parent: {}", parent.display()))?;
    Ok(())
}

fn unique_temp_path(dst: &Path) -> anyhow::Result<PathBuf> {
    let parent = dst
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Destination path has no parent: {}", dst.display()))?;
    let base = dst
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Destination path has no filename: {}", dst.display()))?;

    for attempt in 0u32..1000 {
        let name = if attempt == 0 {
            format!(".{}.tmp.{}", base.to_string_lossy(), std::process::id())
        } else {
            format!(
                ".{}.tmp.{}.{}",
                base.to_string_lossy(),
                std::process::id(),
                attempt
            )
        };
        let candidate = parent.join(name);
        if fs::symlink_metadata(&candidate).is_err() {
            return Ok(candidate);
        }
    }

    anyhow::bail!("Failed to allocate a unique temp path for {}", dst.display());
}

fn copy_tree(src: &Path, dst: &Path) -> anyhow::Result<()> {
    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read dir: {}", src.display()))?
    {
        let entry =
            entry.with_context(|| format!("Failed to read dir entry: {}", src.display()))?;
        let ty = entry
            .file_type()
            .with_context(|| format!("Failed to stat dir entry: {}", entry.path().display()))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if ty.is_dir() {
            fs::create_dir_all(&to)
                .with_context(|| format!("Failed to create directory: {}", to.display()))?;
            copy_tree(&from, &to)?;
        } else if ty.is_file() {
            fs::copy(&from, &to).with_context(|| {
                format!(
                    "Failed to copy file from {} to {}",
                    from.display(),
                    to.display()
                )
            })?;
        } else {
            anyhow::bail!("Unsupported filesystem entry type at {}", from.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_file_atomic_creates_parents_and_leaves_no_temp() {
        let tmp = tempfile::tempdir().expect("tempdir should succeed");
        let dst = tmp.path().join("a").join("b").join("engineer.md");

        write_file_atomic(&dst, b"# Engineer").expect("write should succeed");

        assert_eq!(fs::read_to_string(&dst).unwrap(), "# Engineer");
        let leftovers: Vec<_> = fs::read_dir(dst.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_file_atomic_over_directory_fails() {
        let tmp = tempfile::tempdir().expect("tempdir should succeed");
        let dst = tmp.path().join("blocked.md");
        fs::create_dir_all(dst.join("inner")).unwrap();

        assert!(write_file_atomic(&dst, b"x").is_err());
        assert!(dst.is_dir());
    }

    #[test]
    fn replace_dir_with_copy_swaps_contents() {
        let tmp = tempfile::tempdir().expect("tempdir should succeed");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("scripts")).unwrap();
        fs::write(src.join("SKILL.md"), "new").unwrap();
        fs::write(src.join("scripts").join("run.sh"), "echo").unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("stale.txt"), "old").unwrap();

        replace_dir_with_copy(&src, &dst).expect("replace should succeed");

        assert_eq!(fs::read_to_string(dst.join("SKILL.md")).unwrap(), "new");
        assert!(dst.join("scripts").join("run.sh").exists());
        assert!(!dst.join("stale.txt").exists());
    }

    #[test]
    fn move_path_replaces_existing_destination() {
        let tmp = tempfile::tempdir().expect("tempdir should succeed");
        let src = tmp.path().join("qa.md");
        let dst = tmp.path().join("unused").join("qa.md");
        fs::write(&src, "current").unwrap();
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        fs::write(&dst, "older archive").unwrap();

        move_path(&src, &dst).expect("move should succeed");

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "current");
    }
}
