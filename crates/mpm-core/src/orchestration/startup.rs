//! Process-start sequence: sync, reconcile, verify.
//!
//! Nothing in here propagates an error: every failure is caught per kind,
//! logged and recorded in the [`StartupReport`], so the host keeps starting in
//! a degraded state instead of crashing.

use std::sync::Arc;

use chrono::Utc;
use is_terminal::IsTerminal;
use serde::Serialize;

use crate::config::{ConfigStore, MpmConfig, ReverifyPolicy, StartupConfig};
use crate::context::DeploymentContext;
use crate::deploy::{
    DeploymentResult, DeploymentVerifier, EngineRegistry, OperationJournal, ReconciliationEngine,
    VerificationResult,
};
use crate::source::{
    CacheSnapshot, GitHubFetcher, RemoteFetcher, SourceSyncManager, SyncProgress, SyncSummary,
};
use crate::types::{ArtifactKind, ConfigScope};

/// What happened for one artifact kind.
#[derive(Debug, Clone, Serialize)]
pub struct KindReport {
    pub kind: ArtifactKind,
    pub sync: Option<SyncSummary>,
    pub reconciled: bool,
    pub result: Option<DeploymentResult>,
    pub verification: Vec<VerificationResult>,
    /// Phase-level failures (configuration, snapshot, reconciliation).
    pub errors: Vec<String>,
}

impl KindReport {
    fn new(kind: ArtifactKind) -> Self {
        Self {
            kind,
            sync: None,
            reconciled: false,
            result: None,
            verification: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub scope: ConfigScope,
    pub kinds: Vec<KindReport>,
}

impl StartupReport {
    /// Every failure in display order: phase errors, sources, artifacts, verification.
    pub fn failure_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        for report in &self.kinds {
            let kind = report.kind;
            for err in &report.errors {
                messages.push(format!("{}s: {}", kind, err));
            }
            if let Some(sync) = &report.sync {
                for (source, err) in sync.failures() {
                    messages.push(format!("{} source '{}': {}", kind, source, err));
                }
            }
            if let Some(result) = &report.result {
                for err in &result.errors {
                    messages.push(format!("{} '{}': {}", kind, err.artifact_id, err.message));
                }
            }
            for verification in &report.verification {
                if let Some(summary) = verification.failure_summary() {
                    messages.push(format!("{} verification {}", kind, summary));
                }
            }
        }
        messages
    }

    pub fn failure_count(&self) -> usize {
        self.failure_messages().len()
    }

    pub fn kind(&self, kind: ArtifactKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

/// Human-readable summary; `None` when there is nothing to report.
pub fn render_summary(report: &StartupReport, max_lines: usize) -> Option<String> {
    let messages = report.failure_messages();
    if messages.is_empty() {
        return None;
    }
    let mut text = format!(
        "mpm: {} problem(s) during {} scope startup deployment",
        messages.len(),
        report.scope
    );
    for message in messages.iter().take(max_lines) {
        text.push_str("\n  - ");
        text.push_str(message);
    }
    if messages.len() > max_lines {
        text.push_str(&format!("\n  ... and {} more", messages.len() - max_lines));
    }
    Some(text)
}

pub struct StartupOrchestrator {
    context: DeploymentContext,
    registry: Arc<EngineRegistry>,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    kinds: Vec<ArtifactKind>,
    force: bool,
}

impl StartupOrchestrator {
    pub fn new(context: DeploymentContext) -> Self {
        Self {
            context,
            registry: Arc::new(EngineRegistry::new()),
            fetcher: None,
            kinds: ArtifactKind::ALL.to_vec(),
            force: false,
        }
    }

    pub fn with_registry(mut self, registry: Arc<EngineRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use `fetcher` instead of building a GitHub client from configuration.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_kinds(mut self, kinds: &[ArtifactKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// Re-download every file regardless of cached hashes.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn run(&self) -> StartupReport {
        let mut report = StartupReport {
            scope: self.context.scope(),
            kinds: Vec::new(),
        };

        let config = match ConfigStore::for_context(&self.context).load() {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "Failed to load configuration; skipping startup deployment");
                self.fail_all(&mut report, &err.to_string());
                self.emit_summary(&report, StartupConfig::default().max_error_lines);
                return report;
            }
        };

        let fetcher = match self.resolve_fetcher(&config) {
            Ok(fetcher) => fetcher,
            Err(err) => {
                let message = format!("{:#}", err);
                tracing::error!(error = %message, "Failed to initialise source fetcher");
                self.fail_all(&mut report, &message);
                self.emit_summary(&report, config.startup.max_error_lines);
                return report;
            }
        };

        for &kind in &self.kinds {
            report
                .kinds
                .push(self.run_kind(kind, &config, fetcher.clone()));
        }

        self.emit_summary(&report, config.startup.max_error_lines);
        report
    }

    fn resolve_fetcher(&self, config: &MpmConfig) -> anyhow::Result<Arc<dyn RemoteFetcher>> {
        match &self.fetcher {
            Some(fetcher) => Ok(fetcher.clone()),
            None => {
                let fetcher: Arc<dyn RemoteFetcher> = Arc::new(GitHubFetcher::new(&config.sync)?);
                Ok(fetcher)
            }
        }
    }

    fn fail_all(&self, report: &mut StartupReport, message: &str) {
        for &kind in &self.kinds {
            let mut kind_report = KindReport::new(kind);
            kind_report.errors.push(message.to_string());
            report.kinds.push(kind_report);
        }
    }

    fn run_kind(
        &self,
        kind: ArtifactKind,
        config: &MpmConfig,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> KindReport {
        let mut report = KindReport::new(kind);
        self.warn_in_flight(kind);

        let sources = config.enabled_sources(kind);
        if sources.is_empty() {
            tracing::debug!(kind = %kind, "No enabled sources");
            return report;
        }

        let manager =
            SourceSyncManager::new(kind, self.context.cache_dir().join(kind.dir_name()), fetcher);
        let observer = |progress: &SyncProgress<'_>| {
            tracing::trace!(
                source = %progress.source_id,
                path = %progress.path,
                current = progress.current,
                total = progress.total,
                "Sync progress"
            );
        };
        let mut summary = manager.sync_all(&sources, self.force, &observer);
        let snapshot = summary.snapshot.take();
        let synced = summary.synced_count;
        if let Some(err) = &summary.snapshot_error {
            report.errors.push(format!("cache snapshot unavailable: {}", err));
        }
        report.sync = Some(summary);

        if !config.startup.auto_deploy {
            tracing::info!(kind = %kind, "Automatic deployment disabled; cache refreshed only");
            return report;
        }
        // Redeploy after every successful sync, even with zero updates, so
        // artifacts cached earlier but never deployed catch up.
        if synced == 0 {
            tracing::warn!(kind = %kind, "No source synced; keeping current deployment");
            return report;
        }
        let Some(snapshot) = snapshot else {
            return report;
        };

        let engine = self.registry.engine(&self.context, kind, config);
        match engine.reconcile(&snapshot) {
            Ok(result) => {
                report.reconciled = true;
                report.verification = verify(&engine, &snapshot, &result, &config.startup);
                report.result = Some(result);
            }
            Err(err) => {
                tracing::error!(kind = %kind, error = %err, "Reconciliation failed");
                report.errors.push(err.to_string());
            }
        }
        report
    }

    fn warn_in_flight(&self, kind: ArtifactKind) {
        let journal = OperationJournal::for_context(&self.context, kind);
        match journal.in_flight() {
            Ok(entries) if !entries.is_empty() => {
                for entry in &entries {
                    tracing::warn!(
                        kind = %kind,
                        operation = %entry.operation_id,
                        target = %entry.target_path.display(),
                        "Operation from an earlier run never completed"
                    );
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(kind = %kind, error = %format!("{:#}", err), "Journal unreadable")
            }
        }
    }

    fn emit_summary(&self, report: &StartupReport, max_lines: usize) {
        if !std::io::stderr().is_terminal() {
            return;
        }
        if let Some(text) = render_summary(report, max_lines) {
            eprintln!("{}", text);
        }
    }
}

/// Verify what changed, plus unchanged artifacts when the policy calls for it.
fn verify(
    engine: &ReconciliationEngine,
    snapshot: &CacheSnapshot,
    result: &DeploymentResult,
    startup: &StartupConfig,
) -> Vec<VerificationResult> {
    let full = match startup.reverify {
        ReverifyPolicy::Changed => false,
        ReverifyPolicy::Always => true,
        ReverifyPolicy::Interval => {
            let hours = i64::try_from(startup.reverify_interval_hours)
                .unwrap_or(i64::MAX)
                .min(24 * 365 * 100);
            match engine.manifest() {
                Ok(manifest) => manifest
                    .last_full_verify
                    .is_none_or(|at| Utc::now() - at >= chrono::Duration::hours(hours)),
                Err(_) => true,
            }
        }
    };

    let verifier = DeploymentVerifier::new(engine.kind());
    let ids: Vec<&String> = if full {
        result.deployed.iter().chain(&result.unchanged).collect()
    } else {
        result.deployed.iter().collect()
    };
    let results: Vec<VerificationResult> = ids
        .into_iter()
        .map(|id| {
            verifier.verify(
                id,
                &engine.target_path(id),
                snapshot.get(id).map(|e| e.content_hash.as_str()),
            )
        })
        .collect();

    if full {
        if let Err(err) = engine.record_full_verify(Utc::now()) {
            tracing::warn!(kind = %engine.kind(), error = %err, "Failed to record full verification");
        }
    }
    results
}
