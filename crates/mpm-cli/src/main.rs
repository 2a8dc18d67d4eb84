//! mpm - agent & skill deployment manager
//!
//! Usage:
//!   mpm startup            # Sync, deploy and verify everything (process start)
//!   mpm sync               # Refresh the source cache only
//!   mpm deploy             # Reconcile the last synced cache into the scope
//!   mpm verify             # Check deployed artifacts against the manifest
//!   mpm journal            # Show recorded deployment operations
//!   mpm backups / restore  # Inspect and restore pre-change snapshots

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mpm_core::config::ConfigStore;
use mpm_core::context::DeploymentContext;
use mpm_core::deploy::{
    BackupManager, DeploymentResult, DeploymentVerifier, EngineRegistry, JournalEntry,
    JournalOutcome, OperationJournal, VerificationResult,
};
use mpm_core::orchestration::{StartupOrchestrator, StartupReport};
use mpm_core::source::{
    CacheSnapshot, GitHubFetcher, SourceCache, SourceSyncManager, SyncProgress, SyncSummary,
};
use mpm_core::types::{ArtifactKind, ConfigScope};

#[derive(Parser)]
#[command(name = "mpm")]
#[command(about = "Agent & Skill Deployment Manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full startup sequence: sync, reconcile, verify
    Startup {
        #[command(flatten)]
        target: TargetArgs,

        /// Re-download every file regardless of cached hashes
        #[arg(long)]
        force: bool,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Refresh the local cache from configured sources
    Sync {
        #[command(flatten)]
        target: TargetArgs,

        /// Re-download every file regardless of cached hashes
        #[arg(long)]
        force: bool,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Deploy the last synced cache into the scope
    Deploy {
        #[command(flatten)]
        target: TargetArgs,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Verify every managed artifact against the manifest
    Verify {
        #[command(flatten)]
        target: TargetArgs,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the deployment operation journal
    Journal {
        #[command(flatten)]
        target: TargetArgs,

        /// Only operations that never completed
        #[arg(long)]
        in_flight: bool,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// List pre-change backups
    Backups {
        #[command(flatten)]
        target: TargetArgs,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Restore a backup to its original location
    Restore {
        /// Backup id as shown by `mpm backups`
        backup_id: String,

        /// Scope the backup belongs to
        #[arg(long, value_enum, default_value = "project")]
        scope: ScopeArg,

        /// Project root (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,

        /// Artifact kind the backup belongs to
        #[arg(long, value_enum)]
        kind: KindArg,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Deployment scope
    #[arg(long, value_enum, default_value = "project")]
    scope: ScopeArg,

    /// Project root (defaults to the current directory)
    #[arg(long)]
    project: Option<PathBuf>,

    /// Restrict to one artifact kind
    #[arg(long, value_enum)]
    kind: Option<KindArg>,
}

impl TargetArgs {
    fn context(&self) -> DeploymentContext {
        DeploymentContext::for_scope(self.scope.into(), self.project.clone())
    }

    fn kinds(&self) -> Vec<ArtifactKind> {
        match self.kind {
            Some(kind) => vec![kind.into()],
            None => ArtifactKind::ALL.to_vec(),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Project,
    User,
}

impl From<ScopeArg> for ConfigScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Project => ConfigScope::Project,
            ScopeArg::User => ConfigScope::User,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Agents,
    Skills,
}

impl From<KindArg> for ArtifactKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Agents => ArtifactKind::Agent,
            KindArg::Skills => ArtifactKind::Skill,
        }
    }
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn main() -> Result<()> {
    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mpm=info,mpm_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    run_cli(cli.command)
}

fn run_cli(command: Commands) -> Result<()> {
    match command {
        Commands::Startup {
            target,
            force,
            format,
        } => run_startup(&target, force, format),
        Commands::Sync {
            target,
            force,
            format,
        } => run_sync(&target, force, format),
        Commands::Deploy { target, format } => run_deploy(&target, format),
        Commands::Verify { target, format } => run_verify(&target, format),
        Commands::Journal {
            target,
            in_flight,
            format,
        } => run_journal(&target, in_flight, format),
        Commands::Backups { target, format } => run_backups(&target, format),
        Commands::Restore {
            backup_id,
            scope,
            project,
            kind,
        } => run_restore(&backup_id, scope, project, kind),
    }
}

// ============================================================================
// startup / sync / deploy
// ============================================================================

fn run_startup(target: &TargetArgs, force: bool, format: OutputFormat) -> Result<()> {
    let report = StartupOrchestrator::new(target.context())
        .with_kinds(&target.kinds())
        .with_force(force)
        .run();

    match format {
        OutputFormat::Table => print_startup_report(&report),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    if report.failure_count() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn run_sync(target: &TargetArgs, force: bool, format: OutputFormat) -> Result<()> {
    let context = target.context();
    let config = ConfigStore::for_context(&context).load()?;
    let fetcher = Arc::new(GitHubFetcher::new(&config.sync)?);

    let show_progress = matches!(format, OutputFormat::Table);
    let observer = |progress: &SyncProgress<'_>| {
        if show_progress && progress.downloaded {
            println!(
                "  ↓ [{}/{}] {}:{}",
                progress.current, progress.total, progress.source_id, progress.path
            );
        }
    };

    let mut summaries = Vec::new();
    for kind in target.kinds() {
        let manager = SourceSyncManager::new(
            kind,
            context.cache_dir().join(kind.dir_name()),
            fetcher.clone(),
        );
        let summary = manager.sync_all(&config.enabled_sources(kind), force, &observer);
        summaries.push((kind, summary));
    }

    let failed = summaries
        .iter()
        .any(|(_, s)| s.failed_count > 0 || s.snapshot_error.is_some());

    match format {
        OutputFormat::Table => {
            for (kind, summary) in &summaries {
                print_sync_summary(*kind, summary);
            }
        }
        OutputFormat::Json => {
            let output: serde_json::Map<String, serde_json::Value> = summaries
                .iter()
                .map(|(kind, summary)| Ok((kind.dir_name().to_string(), serde_json::to_value(summary)?)))
                .collect::<Result<_>>()?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn run_deploy(target: &TargetArgs, format: OutputFormat) -> Result<()> {
    let context = target.context();
    let config = ConfigStore::for_context(&context).load()?;
    let registry = EngineRegistry::new();

    let mut outcomes = Vec::new();
    for kind in target.kinds() {
        let cache = SourceCache::new(context.cache_dir().join(kind.dir_name()));
        let snapshot = CacheSnapshot::load(&cache.index_path())
            .with_context(|| format!("No synced {} cache; run `mpm sync` first", kind))?;

        let engine = registry.engine(&context, kind, &config);
        let result = engine.reconcile(&snapshot)?;

        let verifier = DeploymentVerifier::new(kind);
        let verification: Vec<VerificationResult> = result
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
        outcomes.push((kind, result, verification));
    }

    match format {
        OutputFormat::Table => {
            println!("Scope: {} ({})", context.scope(), context.project_root().display());
            for (kind, result, verification) in &outcomes {
                print_deployment_result(*kind, result);
                print_verification_failures(verification);
            }
        }
        OutputFormat::Json => {
            let output: Vec<serde_json::Value> = outcomes
                .iter()
                .map(|(kind, result, verification)| {
                    serde_json::json!({
                        "scope": context.scope(),
                        "kind": kind,
                        "result": result,
                        "verification": verification,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if outcomes.iter().any(|(_, r, _)| !r.is_success()) {
        std::process::exit(1);
    }
    Ok(())
}

// ============================================================================
// verify / journal / backups
// ============================================================================

fn run_verify(target: &TargetArgs, format: OutputFormat) -> Result<()> {
    let context = target.context();
    let config = ConfigStore::for_context(&context).load()?;
    let registry = EngineRegistry::new();

    let mut results = Vec::new();
    for kind in target.kinds() {
        let engine = registry.engine(&context, kind, &config);
        let manifest = engine.manifest()?;
        let verifier = DeploymentVerifier::new(kind);
        for (id, entry) in &manifest.entries {
            results.push((
                kind,
                verifier.verify(id, &engine.target_path(id), Some(&entry.content_hash)),
            ));
        }
    }

    match format {
        OutputFormat::Table => {
            if results.is_empty() {
                println!("No managed artifacts in {} scope.", context.scope());
            }
            for (kind, result) in &results {
                match result.failure_summary() {
                    None => println!("✓ {} {}", kind, result.artifact_id),
                    Some(summary) => println!("✗ {} {}", kind, summary),
                }
            }
        }
        OutputFormat::Json => {
            let output: Vec<&VerificationResult> = results.iter().map(|(_, r)| r).collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if results.iter().any(|(_, r)| !r.passed) {
        std::process::exit(1);
    }
    Ok(())
}

fn run_journal(target: &TargetArgs, in_flight: bool, format: OutputFormat) -> Result<()> {
    let context = target.context();

    let mut entries = Vec::new();
    for kind in target.kinds() {
        let journal = OperationJournal::for_context(&context, kind);
        let kind_entries = if in_flight {
            journal.in_flight()?
        } else {
            journal.entries()?
        };
        entries.extend(kind_entries.into_iter().map(|e| (kind, e)));
    }
    entries.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp));

    match format {
        OutputFormat::Table => print_journal(&entries),
        OutputFormat::Json => {
            let output: Vec<&JournalEntry> = entries.iter().map(|(_, e)| e).collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn run_backups(target: &TargetArgs, format: OutputFormat) -> Result<()> {
    let context = target.context();

    let mut records = Vec::new();
    for kind in target.kinds() {
        let manager = BackupManager::for_context(&context, kind);
        records.extend(manager.list()?.into_iter().map(|r| (kind, r)));
    }

    match format {
        OutputFormat::Table => {
            if records.is_empty() {
                println!("No backups in {} scope.", context.scope());
                return Ok(());
            }
            println!("  {:<8} {:<50} {:<20} Original", "Kind", "Backup", "Taken");
            println!("  {}", "-".repeat(100));
            for (kind, record) in &records {
                println!(
                    "  {:<8} {:<50} {:<20} {}",
                    kind.dir_name(),
                    record.backup_id,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.original_path.display()
                );
            }
        }
        OutputFormat::Json => {
            let output: Vec<_> = records.iter().map(|(_, r)| r).collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn run_restore(
    backup_id: &str,
    scope: ScopeArg,
    project: Option<PathBuf>,
    kind: KindArg,
) -> Result<()> {
    let context = DeploymentContext::for_scope(scope.into(), project);
    let manager = BackupManager::for_context(&context, kind.into());
    let record = manager.restore(backup_id)?;
    println!(
        "✓ Restored {} to {}",
        record.backup_id,
        record.original_path.display()
    );
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_startup_report(report: &StartupReport) {
    println!("Scope: {}", report.scope);
    for kind in &report.kinds {
        if let Some(sync) = &kind.sync {
            print_sync_summary(kind.kind, sync);
        }
        match &kind.result {
            Some(result) => print_deployment_result(kind.kind, result),
            None if !kind.reconciled => println!("• {}s: not reconciled", kind.kind),
            None => {}
        }
        print_verification_failures(&kind.verification);
        for err in &kind.errors {
            println!("  ⚠ {}", err);
        }
    }
}

fn print_sync_summary(kind: ArtifactKind, summary: &SyncSummary) {
    println!(
        "✓ Synced {} {} source(s): {} updated, {} cached",
        summary.synced_count,
        kind,
        summary.total_files_updated,
        summary.total_files_cached
    );
    for (source, err) in summary.failures() {
        println!("  ⚠ {}: {}", source, err);
    }
    for skipped in &summary.skipped {
        println!(
            "  • {} from '{}' shadowed by '{}'",
            skipped.artifact_id, skipped.source_id, skipped.kept_from
        );
    }
    if let Some(err) = &summary.snapshot_error {
        println!("  ⚠ cache snapshot unavailable: {}", err);
    }
}

fn print_deployment_result(kind: ArtifactKind, result: &DeploymentResult) {
    if !result.has_changes() && result.is_success() {
        println!(
            "✓ {}s up to date ({} unchanged)",
            kind,
            result.unchanged.len()
        );
        return;
    }

    println!(
        "✓ {}s: {} deployed ({} updated), {} removed, {} unchanged",
        kind,
        result.deployed.len(),
        result.updated.len(),
        result.removed.len(),
        result.unchanged.len()
    );
    for id in &result.deployed {
        let marker = if result.updated.contains(id) { "~" } else { "+" };
        println!("  {} {}", marker, id);
    }
    for id in &result.removed {
        println!("  - {}", id);
    }
    for err in &result.errors {
        println!("  ⚠ {}: {}", err.artifact_id, err.message);
    }
}

fn print_verification_failures(results: &[VerificationResult]) {
    for summary in results.iter().filter_map(VerificationResult::failure_summary) {
        println!("  ⚠ verification {}", summary);
    }
}

fn print_journal(entries: &[(ArtifactKind, JournalEntry)]) {
    if entries.is_empty() {
        println!("No journal entries.");
        return;
    }
    println!(
        "  {:<20} {:<8} {:<8} {:<10} Target",
        "Time", "Kind", "Action", "Outcome"
    );
    println!("  {}", "-".repeat(80));
    for (kind, entry) in entries {
        let action = format!("{:?}", entry.action).to_lowercase();
        let outcome = match entry.outcome {
            Some(JournalOutcome::Applied) => "applied",
            Some(JournalOutcome::Failed) => "failed",
            None => "in-flight",
        };
        println!(
            "  {:<20} {:<8} {:<8} {:<10} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            kind.dir_name(),
            action,
            outcome,
            entry.target_path.display()
        );
        if let Some(message) = &entry.message {
            println!("      {}", message);
        }
    }
}
