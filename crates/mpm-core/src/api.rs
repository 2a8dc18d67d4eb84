//! Request-facing helpers for network handlers.
//!
//! Handlers receive an untrusted, optional `scope` field. Only project scope
//! is reachable this way; everything else is a structured 400.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::ConfigStore;
use crate::context::DeploymentContext;
use crate::deploy::{
    DeploymentResult, DeploymentVerifier, EngineRegistry, ManifestEntry, VerificationResult,
};
use crate::error::ReconcileError;
use crate::source::{CacheSnapshot, SourceCache};
use crate::types::{ArtifactKind, ConfigScope};

pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
pub const UNSUPPORTED_SCOPE: &str = "UNSUPPORTED_SCOPE";
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
pub const CACHE_UNAVAILABLE: &str = "CACHE_UNAVAILABLE";
pub const DEPLOYMENT_BUSY: &str = "DEPLOYMENT_BUSY";
pub const DEPLOYMENT_FAILED: &str = "DEPLOYMENT_FAILED";

/// Error body: `{ "success": false, "code": ..., "error": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{code}: {error}")]
pub struct ApiError {
    #[serde(skip)]
    pub status: u16,
    pub success: bool,
    pub code: &'static str,
    pub error: String,
}

impl ApiError {
    pub fn new(status: u16, code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            code,
            error: error.into(),
        }
    }

    pub fn bad_request(code: &'static str, error: impl Into<String>) -> Self {
        Self::new(400, code, error)
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Locked { .. } => Self::new(409, DEPLOYMENT_BUSY, err.to_string()),
            other => Self::new(500, DEPLOYMENT_FAILED, other.to_string()),
        }
    }
}

/// Resolve the optional request scope; omitted means project.
pub fn resolve_request_scope(
    scope: Option<&str>,
    project: Option<PathBuf>,
) -> Result<DeploymentContext, ApiError> {
    let scope = scope.unwrap_or(ConfigScope::Project.as_str());
    if scope.trim().is_empty() {
        return Err(ApiError::bad_request(
            VALIDATION_ERROR,
            "scope must not be empty",
        ));
    }
    DeploymentContext::from_request_scope(scope, project)
        .map_err(|err| ApiError::bad_request(UNSUPPORTED_SCOPE, err.to_string()))
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResponse {
    pub success: bool,
    pub scope: String,
    pub kind: ArtifactKind,
    pub result: DeploymentResult,
    /// Failed verifications are warnings; the deployment itself stands.
    pub verification: Vec<VerificationResult>,
}

impl DeploymentResponse {
    pub fn new(
        context: &DeploymentContext,
        kind: ArtifactKind,
        result: DeploymentResult,
        verification: Vec<VerificationResult>,
    ) -> Self {
        Self {
            success: result.is_success(),
            scope: context.scope().to_string(),
            kind,
            result,
            verification,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub scope: String,
    pub kind: ArtifactKind,
    pub artifacts: BTreeMap<String, ManifestEntry>,
}

/// Deploy the last synced cache snapshot for `kind`.
pub fn deploy(
    registry: &EngineRegistry,
    scope: Option<&str>,
    project: Option<PathBuf>,
    kind: ArtifactKind,
) -> Result<DeploymentResponse, ApiError> {
    let context = resolve_request_scope(scope, project)?;
    let config = ConfigStore::for_context(&context)
        .load()
        .map_err(|err| ApiError::new(500, CONFIG_ERROR, err.to_string()))?;

    let cache = SourceCache::new(context.cache_dir().join(kind.dir_name()));
    let snapshot = CacheSnapshot::load(&cache.index_path()).map_err(|err| {
        ApiError::new(
            409,
            CACHE_UNAVAILABLE,
            format!("no synced {} cache: {:#}", kind, err),
        )
    })?;

    let engine = registry.engine(&context, kind, &config);
    let result = engine.try_reconcile(&snapshot)?;

    let verifier = DeploymentVerifier::new(kind);
    let verification = result
        .deployed
        .iter()
        .map(|id| {
            verifier.verify(
                id,
                &engine.target_path(id),
                snapshot.get(id).map(|e| e.content_hash.as_str()),
            )
        })
        .collect();

    Ok(DeploymentResponse::new(&context, kind, result, verification))
}

/// Managed artifacts for `kind` in the requested scope.
pub fn status(
    registry: &EngineRegistry,
    scope: Option<&str>,
    project: Option<PathBuf>,
    kind: ArtifactKind,
) -> Result<StatusResponse, ApiError> {
    let context = resolve_request_scope(scope, project)?;
    let config = ConfigStore::for_context(&context)
        .load()
        .map_err(|err| ApiError::new(500, CONFIG_ERROR, err.to_string()))?;
    let manifest = registry.engine(&context, kind, &config).manifest()?;

    Ok(StatusResponse {
        success: true,
        scope: context.scope().to_string(),
        kind,
        artifacts: manifest.entries,
    })
}
