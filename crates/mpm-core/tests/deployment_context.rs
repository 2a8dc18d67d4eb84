mod support;

use std::path::PathBuf;

use mpm_core::config::ConfigStore;
use mpm_core::context::DeploymentContext;
use mpm_core::error::ScopeError;
use mpm_core::types::{ArtifactKind, ConfigScope};
use serial_test::serial;
use tempfile::TempDir;

use support::HomeGuard;

#[test]
fn project_scope_paths_live_under_project_root() {
    let ctx = DeploymentContext::from_project(Some(PathBuf::from("/work/app")));

    assert_eq!(ctx.scope(), ConfigScope::Project);
    assert_eq!(ctx.agents_dir(), PathBuf::from("/work/app/.claude/agents"));
    assert_eq!(ctx.skills_dir(), PathBuf::from("/work/app/.claude/skills"));
    assert_eq!(
        ctx.archive_dir(),
        PathBuf::from("/work/app/.claude/agents/unused")
    );
    assert_eq!(ctx.config_dir(), PathBuf::from("/work/app/.claude-mpm"));
    assert_eq!(
        ctx.configuration_file_path(),
        PathBuf::from("/work/app/.claude-mpm/configuration.toml")
    );
    assert_eq!(ctx.artifact_dir(ArtifactKind::Skill), ctx.skills_dir());
}

#[test]
#[serial]
fn user_scope_paths_follow_home_override() {
    let home = TempDir::new().unwrap();
    let _guard = HomeGuard::set(home.path());

    let ctx = DeploymentContext::for_scope(ConfigScope::User, Some(PathBuf::from("/ignored")));

    assert_eq!(ctx.scope(), ConfigScope::User);
    assert_eq!(ctx.agents_dir(), home.path().join(".claude/agents"));
    assert_eq!(ctx.skills_dir(), home.path().join(".claude/skills"));
    assert_eq!(ctx.config_dir(), home.path().join(".claude-mpm"));
    assert!(!ctx.agents_dir().starts_with("/ignored"));
}

#[test]
#[serial]
fn user_scope_recomputes_paths_when_home_changes() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let ctx = DeploymentContext::from_user();

    let before = {
        let _guard = HomeGuard::set(first.path());
        ctx.skills_dir()
    };
    let after = {
        let _guard = HomeGuard::set(second.path());
        ctx.skills_dir()
    };

    assert_eq!(before, first.path().join(".claude/skills"));
    assert_eq!(after, second.path().join(".claude/skills"));
}

#[test]
#[serial]
fn config_store_follows_context_scope() {
    let home = TempDir::new().unwrap();
    let _guard = HomeGuard::set(home.path());
    let project = TempDir::new().unwrap();

    let user = ConfigStore::for_context(&DeploymentContext::from_user());
    let proj = ConfigStore::for_context(&DeploymentContext::from_project(Some(
        project.path().to_path_buf(),
    )));

    assert_eq!(
        user.config_path(),
        home.path().join(".claude-mpm/configuration.toml")
    );
    assert_eq!(
        proj.config_path(),
        project.path().join(".claude-mpm/configuration.toml")
    );
}

#[test]
fn request_scope_accepts_only_project() {
    let ctx =
        DeploymentContext::from_request_scope("project", Some(PathBuf::from("/srv/p"))).unwrap();
    assert_eq!(ctx.project_root(), PathBuf::from("/srv/p"));

    for bad in ["user", "Project", "", "global"] {
        let err = DeploymentContext::from_request_scope(bad, None).unwrap_err();
        assert!(matches!(err, ScopeError::InvalidScope(ref s) if s == bad));
    }
}

#[test]
fn contexts_with_same_scope_and_root_are_equal() {
    let a = DeploymentContext::from_project(Some(PathBuf::from("/p")));
    let b = DeploymentContext::for_scope(ConfigScope::Project, Some(PathBuf::from("/p")));
    let c = DeploymentContext::from_project(Some(PathBuf::from("/q")));

    assert_eq!(a, b);
    assert_ne!(a, c);
}
