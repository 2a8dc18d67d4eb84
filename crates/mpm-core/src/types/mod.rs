//! Shared core types used across configuration, sync and deployment layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScopeError;

/// Deployment scope: which directory tree is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfigScope {
    /// Rooted under the project directory.
    #[default]
    Project,
    /// Rooted under the user's home directory.
    User,
}

impl ConfigScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigScope::Project => "project",
            ConfigScope::User => "user",
        }
    }
}

impl fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigScope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(ConfigScope::Project),
            "user" => Ok(ConfigScope::User),
            other => Err(ScopeError::InvalidScope(other.to_string())),
        }
    }
}

/// Kind of deployable artifact.
///
/// Agents are single markdown files; skills are directories holding a
/// `SKILL.md` plus auxiliary files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Agent,
    Skill,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Agent, ArtifactKind::Skill];

    /// Directory name used for this kind in caches, journals and backups.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Agent => "agents",
            ArtifactKind::Skill => "skills",
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, ArtifactKind::Skill)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Agent => f.write_str("agent"),
            ArtifactKind::Skill => f.write_str("skill"),
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" | "agents" => Ok(ArtifactKind::Agent),
            "skill" | "skills" => Ok(ArtifactKind::Skill),
            other => anyhow::bail!("Unknown artifact kind: {} (expected agents or skills)", other),
        }
    }
}
