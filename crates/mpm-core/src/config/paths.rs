//! Scope-based path resolution for deployment directories.
//!
//! | scope   | agents                  | skills                  | archive                        | config              |
//! |---------|-------------------------|-------------------------|--------------------------------|---------------------|
//! | project | `<project>/.claude/agents` | `<project>/.claude/skills` | `<project>/.claude/agents/unused` | `<project>/.claude-mpm` |
//! | user    | `~/.claude/agents`      | `~/.claude/skills`      | `~/.claude/agents/unused`      | `~/.claude-mpm`     |
//!
//! User-scope paths ignore `project_path` entirely.

use std::path::{Path, PathBuf};

use crate::fs::mpm_home_dir;
use crate::types::ConfigScope;

pub const CLAUDE_DIR: &str = ".claude";
pub const MPM_DIR: &str = ".claude-mpm";
pub const ARCHIVE_DIR: &str = "unused";
pub const CONFIG_FILE: &str = "configuration.toml";

fn scope_root(scope: ConfigScope, project_path: &Path) -> PathBuf {
    match scope {
        ConfigScope::Project => project_path.to_path_buf(),
        ConfigScope::User => mpm_home_dir(),
    }
}

pub fn resolve_agents_dir(scope: ConfigScope, project_path: &Path) -> PathBuf {
    scope_root(scope, project_path)
        .join(CLAUDE_DIR)
        .join("agents")
}

pub fn resolve_skills_dir(scope: ConfigScope, project_path: &Path) -> PathBuf {
    scope_root(scope, project_path)
        .join(CLAUDE_DIR)
        .join("skills")
}

/// Archived (removed-but-retained) agents live under the agents directory.
pub fn resolve_archive_dir(scope: ConfigScope, project_path: &Path) -> PathBuf {
    resolve_agents_dir(scope, project_path).join(ARCHIVE_DIR)
}

pub fn resolve_config_dir(scope: ConfigScope, project_path: &Path) -> PathBuf {
    scope_root(scope, project_path).join(MPM_DIR)
}
