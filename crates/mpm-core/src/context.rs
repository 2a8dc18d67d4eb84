//! Deployment context: the (scope, project root) pair every core call receives.

use std::path::{Path, PathBuf};

use crate::config::paths::{self, CONFIG_FILE};
use crate::error::ScopeError;
use crate::types::{ArtifactKind, ConfigScope};

/// Immutable value identifying where a deployment lands.
///
/// Created once per command or request and passed by value downstream. Two
/// contexts with the same scope and root are interchangeable as map keys.
/// Path accessors recompute through the resolver on every call, so a changed
/// home directory is always reflected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentContext {
    scope: ConfigScope,
    project_root: PathBuf,
}

impl DeploymentContext {
    /// Project scope rooted at `path`, or the current directory when omitted.
    pub fn from_project(path: Option<PathBuf>) -> Self {
        let project_root = path
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            scope: ConfigScope::Project,
            project_root,
        }
    }

    /// User scope. The project root is recorded but never used for paths.
    pub fn from_user() -> Self {
        Self {
            scope: ConfigScope::User,
            project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Entry point for untrusted input (e.g. a network request).
    ///
    /// Only the literal `"project"` is accepted; `"user"` is rejected because
    /// the home directory must not be reachable from remote callers.
    pub fn from_request_scope(scope: &str, path: Option<PathBuf>) -> Result<Self, ScopeError> {
        if scope != ConfigScope::Project.as_str() {
            return Err(ScopeError::InvalidScope(scope.to_string()));
        }
        Ok(Self::from_project(path))
    }

    /// Context for an already-validated scope (CLI flags).
    pub fn for_scope(scope: ConfigScope, project: Option<PathBuf>) -> Self {
        match scope {
            ConfigScope::Project => Self::from_project(project),
            ConfigScope::User => Self::from_user(),
        }
    }

    pub fn scope(&self) -> ConfigScope {
        self.scope
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn agents_dir(&self) -> PathBuf {
        paths::resolve_agents_dir(self.scope, &self.project_root)
    }

    pub fn skills_dir(&self) -> PathBuf {
        paths::resolve_skills_dir(self.scope, &self.project_root)
    }

    pub fn archive_dir(&self) -> PathBuf {
        paths::resolve_archive_dir(self.scope, &self.project_root)
    }

    pub fn config_dir(&self) -> PathBuf {
        paths::resolve_config_dir(self.scope, &self.project_root)
    }

    pub fn configuration_file_path(&self) -> PathBuf {
        self.config_dir().join(CONFIG_FILE)
    }

    /// Local mirror of remote sources for this scope.
    pub fn cache_dir(&self) -> PathBuf {
        self.config_dir().join("cache")
    }

    /// Target directory for artifacts of `kind`.
    pub fn artifact_dir(&self, kind: ArtifactKind) -> PathBuf {
        match kind {
            ArtifactKind::Agent => self.agents_dir(),
            ArtifactKind::Skill => self.skills_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn request_scope_accepts_only_project() {
        let ctx = DeploymentContext::from_request_scope("project", Some(PathBuf::from("/p")))
            .expect("project scope should be accepted");
        assert_eq!(ctx.scope(), ConfigScope::Project);
        assert_eq!(ctx.agents_dir(), PathBuf::from("/p/.claude/agents"));

        for bad in ["user", "workspace", "", "PROJECT"] {
            let err = DeploymentContext::from_request_scope(bad, None).unwrap_err();
            assert_eq!(err, ScopeError::InvalidScope(bad.to_string()));
        }
    }

    #[test]
    fn equal_contexts_are_interchangeable_keys() {
        let a = DeploymentContext::from_project(Some(PathBuf::from("/p")));
        let b = DeploymentContext::from_project(Some(PathBuf::from("/p")));
        let c = DeploymentContext::from_project(Some(PathBuf::from("/q")));

        let mut map = HashMap::new();
        map.insert(a.clone(), 1);
        assert_eq!(map.get(&b), Some(&1));
        assert_eq!(map.get(&c), None);
        assert_eq!(a, b);
    }

    #[test]
    fn derived_paths_hang_off_config_dir() {
        let ctx = DeploymentContext::from_project(Some(PathBuf::from("/p")));
        assert_eq!(
            ctx.configuration_file_path(),
            PathBuf::from("/p/.claude-mpm/configuration.toml")
        );
        assert_eq!(ctx.cache_dir(), PathBuf::from("/p/.claude-mpm/cache"));
        assert_eq!(
            ctx.artifact_dir(ArtifactKind::Skill),
            PathBuf::from("/p/.claude/skills")
        );
    }
}
