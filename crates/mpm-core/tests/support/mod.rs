//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use mpm_core::context::DeploymentContext;
use mpm_core::fs::MPM_TEST_HOME_VAR;
use mpm_core::source::{CacheSnapshot, SourceCache, SourceDescriptor};
use mpm_core::types::ArtifactKind;
use tempfile::TempDir;

/// A project directory plus a separate cache root inside one temp dir.
pub struct Workspace {
    pub temp: TempDir,
    pub context: DeploymentContext,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("tempdir");
        let project = temp.path().join("project");
        fs::create_dir_all(&project).expect("create project");
        let context = DeploymentContext::from_project(Some(project));
        Self { temp, context }
    }

    pub fn project(&self) -> &Path {
        self.context.project_root()
    }

    pub fn cache(&self) -> SourceCache {
        SourceCache::new(self.temp.path().join("cache"))
    }

    /// Cache holding exactly `files` (path → content) under source `sys`.
    pub fn snapshot(&self, kind: ArtifactKind, files: &[(&str, &str)]) -> CacheSnapshot {
        let cache = self.cache();
        let _ = fs::remove_dir_all(cache.source_dir("sys"));
        let staged = cache.stage("sys").expect("stage cache");
        for (path, content) in files {
            staged
                .write_file(path, content.as_bytes())
                .expect("write cache file");
        }
        cache.commit(staged).expect("commit cache");
        cache
            .snapshot(kind, &[SourceDescriptor::new("sys", "github:acme/artifacts")])
            .expect("snapshot")
    }

    pub fn agent(&self, id: &str) -> PathBuf {
        self.context.agents_dir().join(format!("{}.md", id))
    }

    pub fn skill(&self, id: &str) -> PathBuf {
        self.context.skills_dir().join(id)
    }

    pub fn write_config(&self, toml: &str) {
        let path = self.context.configuration_file_path();
        fs::create_dir_all(path.parent().expect("config parent")).expect("create config dir");
        fs::write(path, toml).expect("write config");
    }
}

/// Points the user scope at `path` until dropped; pair with `#[serial]`.
pub struct HomeGuard;

impl HomeGuard {
    pub fn set(path: &Path) -> Self {
        unsafe { std::env::set_var(MPM_TEST_HOME_VAR, path) };
        HomeGuard
    }
}

impl Drop for HomeGuard {
    fn drop(&mut self) {
        unsafe { std::env::remove_var(MPM_TEST_HOME_VAR) };
    }
}
