//! Post-apply verification of deployed artifacts.
//!
//! Failures are reported, never acted upon.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fs::hash_artifact;
use crate::types::ArtifactKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub artifact_id: String,
    pub passed: bool,
    pub checks: Vec<VerificationCheck>,
}

impl VerificationResult {
    /// First failing check, formatted for display.
    pub fn failure_summary(&self) -> Option<String> {
        self.checks.iter().find(|c| !c.passed).map(|c| match &c.detail {
            Some(detail) => format!("{}: {} check failed ({})", self.artifact_id, c.name, detail),
            None => format!("{}: {} check failed", self.artifact_id, c.name),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeploymentVerifier {
    kind: ArtifactKind,
}

impl DeploymentVerifier {
    pub fn new(kind: ArtifactKind) -> Self {
        Self { kind }
    }

    pub fn verify(
        &self,
        artifact_id: &str,
        expected_path: &Path,
        expected_hash: Option<&str>,
    ) -> VerificationResult {
        let mut checks = Vec::new();

        let meta = std::fs::symlink_metadata(expected_path);
        checks.push(VerificationCheck {
            name: "exists".to_string(),
            passed: meta.is_ok(),
            detail: meta
                .as_ref()
                .err()
                .map(|_| format!("{} is missing", expected_path.display())),
        });

        if let Ok(meta) = &meta {
            let shape_ok = if self.kind.is_dir() {
                meta.is_dir()
            } else {
                meta.is_file()
            };
            checks.push(VerificationCheck {
                name: "shape".to_string(),
                passed: shape_ok,
                detail: (!shape_ok).then(|| {
                    format!(
                        "expected a {}",
                        if self.kind.is_dir() { "directory" } else { "file" }
                    )
                }),
            });

            if let (true, Some(expected)) = (shape_ok, expected_hash) {
                let check = match hash_artifact(self.kind, expected_path) {
                    Ok(actual) if actual == expected => VerificationCheck {
                        name: "content_hash".to_string(),
                        passed: true,
                        detail: None,
                    },
                    Ok(actual) => VerificationCheck {
                        name: "content_hash".to_string(),
                        passed: false,
                        detail: Some(format!("expected {}, found {}", short(expected), short(&actual))),
                    },
                    Err(err) => VerificationCheck {
                        name: "content_hash".to_string(),
                        passed: false,
                        detail: Some(format!("{:#}", err)),
                    },
                };
                checks.push(check);
            }
        }

        let passed = checks.iter().all(|c| c.passed);
        if !passed {
            tracing::warn!(kind = %self.kind, artifact = %artifact_id, "Verification failed");
        }
        VerificationResult {
            artifact_id: artifact_id.to_string(),
            passed,
            checks,
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
