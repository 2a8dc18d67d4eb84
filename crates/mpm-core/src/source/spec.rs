//! Source descriptors and GitHub repository coordinates.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::FetchError;

/// A configured remote source of artifacts.
///
/// Static for the duration of a sync pass; loaded from `configuration.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable identifier; also the cache directory name for this source.
    pub id: String,

    /// Repository URL (`https://github.com/org/repo` or `github:org/repo`).
    pub url: String,

    /// Branch, tag or commit to read.
    #[serde(rename = "branch", default = "default_reference")]
    pub reference: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Path prefix inside the repository holding the artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
}

fn default_reference() -> String {
    "main".to_string()
}

fn default_enabled() -> bool {
    true
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            reference: default_reference(),
            enabled: true,
            subdir: None,
        }
    }

    pub fn with_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check that the id is usable as a directory name and the url parses.
    pub fn validate(&self) -> anyhow::Result<()> {
        let id_ok = !self.id.is_empty()
            && self.id != "."
            && self.id != ".."
            && self
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !id_ok {
            anyhow::bail!(
                "source id '{}' may only contain letters, digits, '-', '_' and '.'",
                self.id
            );
        }
        if self.reference.trim().is_empty() {
            anyhow::bail!("source '{}' has an empty branch", self.id);
        }
        self.github_repo()?;
        Ok(())
    }

    /// Subdirectory prefix normalised to `a/b` (no leading/trailing slashes).
    pub fn subdir_prefix(&self) -> Option<String> {
        self.subdir
            .as_deref()
            .map(|s| s.trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn github_repo(&self) -> Result<GitHubRepo, FetchError> {
        GitHubRepo::parse(&self.url)
    }
}

/// Owner/repository pair of a GitHub-hosted source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRepo {
    pub owner: String,
    pub repo: String,
}

impl GitHubRepo {
    /// Parse `github:owner/repo` or `https://github.com/owner/repo(.git)`.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let unsupported = || FetchError::UnsupportedUrl(raw.to_string());

        if let Some(shorthand) = raw.strip_prefix("github:") {
            return Self::from_path(shorthand).ok_or_else(unsupported);
        }

        let url = Url::parse(raw).map_err(|_| unsupported())?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(unsupported());
        }
        match url.host_str() {
            Some("github.com") | Some("www.github.com") => {}
            _ => return Err(unsupported()),
        }
        Self::from_path(url.path()).ok_or_else(unsupported)
    }

    fn from_path(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        if parts.len() != 2 {
            return None;
        }
        let owner = parts[0];
        let repo = parts[1].strip_suffix(".git").unwrap_or(parts[1]);
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Recursive git tree listing endpoint.
    pub fn tree_url(&self, reference: &str) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/git/trees/{}?recursive=1",
            self.owner, self.repo, reference
        )
    }

    /// Raw content URL for one file.
    pub fn raw_url(&self, reference: &str, path: &str) -> String {
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}/{}",
            self.owner, self.repo, reference, path
        )
    }
}
