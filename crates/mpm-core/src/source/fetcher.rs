//! Remote listing and download of source files.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::config::SyncConfig;
use crate::error::FetchError;
use crate::fs::hash_bytes;

use super::SourceDescriptor;

/// One file in a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Remote content identifier; a change means the file must be re-downloaded.
    pub sha: String,
}

/// Access to a remote source.
///
/// Implementations must not retry indefinitely: a timeout is reported as a
/// [`FetchError`] and only fails the current source.
pub trait RemoteFetcher: Send + Sync {
    fn list(&self, source: &SourceDescriptor) -> Result<Vec<RemoteFile>, FetchError>;

    fn download(
        &self,
        source: &SourceDescriptor,
        file: &RemoteFile,
    ) -> Result<Vec<u8>, FetchError>;
}

// ============================================================================
// GitHub
// ============================================================================

#[derive(Debug, Deserialize)]
struct TreeListing {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    item_type: String,
    sha: String,
}

/// Blob entries of a recursive tree listing.
///
/// A truncated listing is an error; it must never be taken for the full tree.
fn parse_tree_listing(url: &str, body: &[u8]) -> Result<Vec<RemoteFile>, FetchError> {
    let listing: TreeListing =
        serde_json::from_slice(body).map_err(|e| FetchError::MalformedListing {
            url: url.to_string(),
            message: e.to_string(),
        })?;
    if listing.truncated {
        return Err(FetchError::MalformedListing {
            url: url.to_string(),
            message: "tree listing was truncated by GitHub".to_string(),
        });
    }

    Ok(listing
        .tree
        .into_iter()
        .filter(|item| item.item_type == "blob")
        .map(|item| RemoteFile {
            path: item.path,
            sha: item.sha,
        })
        .collect())
}

/// Fetches sources through the GitHub tree API and raw content host.
pub struct GitHubFetcher {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    token: Option<String>,
}

impl GitHubFetcher {
    pub fn new(config: &SyncConfig) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("mpm/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        if token.is_some() {
            tracing::debug!(env = %config.token_env, "Using bearer token for GitHub requests");
        }
        Ok(Self {
            runtime,
            client,
            token,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_bytes(&self, url: &str, accept: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

impl RemoteFetcher for GitHubFetcher {
    fn list(&self, source: &SourceDescriptor) -> Result<Vec<RemoteFile>, FetchError> {
        let repo = source.github_repo()?;
        let url = repo.tree_url(&source.reference);
        let body = self
            .runtime
            .block_on(self.fetch_bytes(&url, "application/vnd.github+json"))?;

        parse_tree_listing(&url, &body)
    }

    fn download(
        &self,
        source: &SourceDescriptor,
        file: &RemoteFile,
    ) -> Result<Vec<u8>, FetchError> {
        let repo = source.github_repo()?;
        let url = repo.raw_url(&source.reference, &file.path);
        self.runtime.block_on(self.fetch_bytes(&url, "*/*"))
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Fetcher serving files from memory, keyed by source id.
///
/// Used for offline runs and tests. The sha of a file is the blake3 digest of
/// its content.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    repos: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    failing: Mutex<HashSet<String>>,
    failing_files: Mutex<HashSet<(String, String)>>,
    downloads: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, source_id: &str, path: &str, content: impl Into<Vec<u8>>) {
        let mut repos = self.repos.lock().unwrap_or_else(|e| e.into_inner());
        repos
            .entry(source_id.to_string())
            .or_default()
            .insert(path.to_string(), content.into());
    }

    pub fn remove(&self, source_id: &str, path: &str) {
        let mut repos = self.repos.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(files) = repos.get_mut(source_id) {
            files.remove(path);
        }
    }

    /// Make every request for `source_id` fail until [`MemoryFetcher::recover`].
    pub fn fail(&self, source_id: &str) {
        let mut failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        failing.insert(source_id.to_string());
    }

    /// Make downloads of one file fail while the listing keeps working.
    pub fn fail_file(&self, source_id: &str, path: &str) {
        let mut failing = self.failing_files.lock().unwrap_or_else(|e| e.into_inner());
        failing.insert((source_id.to_string(), path.to_string()));
    }

    pub fn recover(&self, source_id: &str) {
        let mut failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        failing.remove(source_id);
        let mut failing_files = self.failing_files.lock().unwrap_or_else(|e| e.into_inner());
        failing_files.retain(|(id, _)| id != source_id);
    }

    /// Number of successful downloads served so far.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn check_available(&self, source: &SourceDescriptor) -> Result<(), FetchError> {
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.contains(&source.id) {
            return Err(FetchError::Request {
                url: source.url.clone(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

impl RemoteFetcher for MemoryFetcher {
    fn list(&self, source: &SourceDescriptor) -> Result<Vec<RemoteFile>, FetchError> {
        self.check_available(source)?;
        let repos = self.repos.lock().unwrap_or_else(|e| e.into_inner());
        let files = repos.get(&source.id).ok_or_else(|| FetchError::Status {
            url: source.url.clone(),
            status: 404,
        })?;
        Ok(files
            .iter()
            .map(|(path, content)| RemoteFile {
                path: path.clone(),
                sha: hash_bytes(content),
            })
            .collect())
    }

    fn download(
        &self,
        source: &SourceDescriptor,
        file: &RemoteFile,
    ) -> Result<Vec<u8>, FetchError> {
        self.check_available(source)?;
        {
            let failing = self.failing_files.lock().unwrap_or_else(|e| e.into_inner());
            if failing.contains(&(source.id.clone(), file.path.clone())) {
                return Err(FetchError::Request {
                    url: format!("{}/{}", source.url, file.path),
                    message: "connection reset".to_string(),
                });
            }
        }
        let repos = self.repos.lock().unwrap_or_else(|e| e.into_inner());
        let content = repos
            .get(&source.id)
            .and_then(|files| files.get(&file.path))
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: format!("{}/{}", source.url, file.path),
                status: 404,
            })?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(content)
    }
}
