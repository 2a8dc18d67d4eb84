//! Configuration schema for `configuration.toml`
//!
//! ```toml
//! [agents]
//! disabled = ["qa"]
//!
//! [[agents.sources]]
//! id = "system"
//! url = "https://github.com/bobmatnyc/claude-mpm-agents"
//! branch = "main"
//! subdir = "agents"
//!
//! [skills]
//! adopt_unmanaged = false
//!
//! [sync]
//! timeout_secs = 30
//!
//! [startup]
//! reverify = "interval"
//! reverify_interval_hours = 24
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::ConfigError;
use crate::source::SourceDescriptor;
use crate::types::ArtifactKind;

pub const DEFAULT_AGENT_SOURCE: &str = "https://github.com/bobmatnyc/claude-mpm-agents";
pub const DEFAULT_SKILL_SOURCE: &str = "https://github.com/bobmatnyc/claude-mpm-skills";

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpmConfig {
    #[serde(default = "ArtifactConfig::default_agents")]
    pub agents: ArtifactConfig,

    #[serde(default = "ArtifactConfig::default_skills")]
    pub skills: ArtifactConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub startup: StartupConfig,
}

impl Default for MpmConfig {
    fn default() -> Self {
        Self {
            agents: ArtifactConfig::default_agents(),
            skills: ArtifactConfig::default_skills(),
            sync: SyncConfig::default(),
            startup: StartupConfig::default(),
        }
    }
}

impl MpmConfig {
    pub fn artifact(&self, kind: ArtifactKind) -> &ArtifactConfig {
        match kind {
            ArtifactKind::Agent => &self.agents,
            ArtifactKind::Skill => &self.skills,
        }
    }

    /// Enabled sources for `kind`, in priority order.
    pub fn enabled_sources(&self, kind: ArtifactKind) -> Vec<SourceDescriptor> {
        self.artifact(kind)
            .sources
            .iter()
            .filter(|s| s.enabled)
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in ArtifactKind::ALL {
            let section = self.artifact(kind);
            let mut seen = HashSet::new();
            for source in &section.sources {
                if source.id.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "{} source with url '{}' has an empty id",
                        kind, source.url
                    )));
                }
                if !seen.insert(source.id.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate {} source id '{}'",
                        kind, source.id
                    )));
                }
                source
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("{:#}", e)))?;
            }
        }

        if self.sync.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.startup.reverify == ReverifyPolicy::Interval
            && self.startup.reverify_interval_hours == 0
        {
            return Err(ConfigError::Invalid(
                "startup.reverify_interval_hours must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-kind settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ArtifactConfig {
    /// Remote sources in priority order; the first source declaring an id wins.
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,

    /// Artifact ids excluded from deployment in this scope.
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Take over pre-existing unmanaged targets (after backing them up).
    #[serde(default)]
    pub adopt_unmanaged: bool,
}

impl ArtifactConfig {
    fn default_agents() -> Self {
        Self {
            sources: vec![SourceDescriptor::new("system", DEFAULT_AGENT_SOURCE)],
            ..Self::default()
        }
    }

    fn default_skills() -> Self {
        Self {
            sources: vec![SourceDescriptor::new("system", DEFAULT_SKILL_SOURCE)],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Per-request timeout for listing and downloads.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Environment variable holding an optional bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            token_env: default_token_env(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

/// How often artifacts that did not change are re-verified at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReverifyPolicy {
    /// Only verify what was deployed or updated in this run.
    #[default]
    Changed,
    /// Verify every desired artifact on every run.
    Always,
    /// Verify everything once `reverify_interval_hours` elapsed since the last full pass.
    Interval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Reconcile after sync; disable to only refresh the cache.
    #[serde(default = "default_true")]
    pub auto_deploy: bool,

    #[serde(default)]
    pub reverify: ReverifyPolicy,

    #[serde(default = "default_interval_hours")]
    pub reverify_interval_hours: u64,

    /// Failure messages shown in the interactive summary.
    #[serde(default = "default_max_error_lines")]
    pub max_error_lines: usize,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            auto_deploy: true,
            reverify: ReverifyPolicy::default(),
            reverify_interval_hours: default_interval_hours(),
            max_error_lines: default_max_error_lines(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_hours() -> u64 {
    24
}

fn default_max_error_lines() -> usize {
    5
}
