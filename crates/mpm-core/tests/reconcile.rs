mod support;

use std::collections::BTreeSet;
use std::fs;

use mpm_core::deploy::{
    BackupManager, JournalAction, JournalOutcome, ManifestStore, OperationJournal,
    ReconcileOptions, ReconciliationEngine,
};
use mpm_core::context::DeploymentContext;
use mpm_core::fs::hash_file;
use mpm_core::types::{ArtifactKind, ConfigScope};
use serial_test::serial;

use support::{HomeGuard, Workspace};

fn engine(ws: &Workspace, kind: ArtifactKind) -> ReconciliationEngine {
    ReconciliationEngine::new(ws.context.clone(), kind, ReconcileOptions::default())
}

fn ids(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn first_run_deploys_everything_and_records_manifest() {
    let ws = Workspace::new();
    let snapshot = ws.snapshot(
        ArtifactKind::Agent,
        &[("engineer.md", "# Engineer"), ("qa.md", "# QA")],
    );

    let result = engine(&ws, ArtifactKind::Agent).reconcile(&snapshot).unwrap();

    assert_eq!(result.deployed, ids(&["engineer", "qa"]));
    assert!(result.updated.is_empty());
    assert!(result.removed.is_empty());
    assert!(result.is_success());
    assert_eq!(fs::read_to_string(ws.agent("qa")).unwrap(), "# QA");

    let manifest = ManifestStore::for_context(&ws.context, ArtifactKind::Agent)
        .load()
        .unwrap();
    assert_eq!(
        manifest.entries.keys().cloned().collect::<BTreeSet<_>>(),
        ids(&["engineer", "qa"])
    );
    assert_eq!(
        manifest.entries["qa"].content_hash,
        hash_file(&ws.agent("qa")).unwrap()
    );
    assert_eq!(manifest.entries["qa"].source_id, "sys");
}

#[test]
fn second_run_without_changes_is_a_no_op() {
    let ws = Workspace::new();
    let snapshot = ws.snapshot(ArtifactKind::Agent, &[("a.md", "A"), ("b.md", "B")]);
    let engine = engine(&ws, ArtifactKind::Agent);

    engine.reconcile(&snapshot).unwrap();
    let backups_before = BackupManager::for_context(&ws.context, ArtifactKind::Agent)
        .list()
        .unwrap()
        .len();

    let second = engine.reconcile(&snapshot).unwrap();

    assert!(second.deployed.is_empty());
    assert!(second.removed.is_empty());
    assert_eq!(second.unchanged, ids(&["a", "b"]));
    assert!(!second.has_changes());
    assert_eq!(
        BackupManager::for_context(&ws.context, ArtifactKind::Agent)
            .list()
            .unwrap()
            .len(),
        backups_before
    );
}

#[test]
fn changed_set_updates_removes_and_deploys() {
    let ws = Workspace::new();
    let engine = engine(&ws, ArtifactKind::Agent);

    engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("a.md", "A1"), ("b.md", "B1")]))
        .unwrap();
    let result = engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("b.md", "B2"), ("c.md", "C1")]))
        .unwrap();

    assert_eq!(result.deployed, ids(&["b", "c"]));
    assert_eq!(result.updated, ids(&["b"]));
    assert_eq!(result.removed, ids(&["a"]));
    assert!(result.unchanged.is_empty());

    // Removed agents are archived, not destroyed
    assert!(!ws.agent("a").exists());
    assert_eq!(
        fs::read_to_string(ws.context.archive_dir().join("a.md")).unwrap(),
        "A1"
    );
    assert_eq!(fs::read_to_string(ws.agent("b")).unwrap(), "B2");

    let manifest = engine.manifest().unwrap();
    assert_eq!(
        manifest.entries.keys().cloned().collect::<BTreeSet<_>>(),
        ids(&["b", "c"])
    );
}

#[test]
fn result_partitions_are_disjoint_and_cover_every_id() {
    let ws = Workspace::new();
    let engine = engine(&ws, ArtifactKind::Agent);
    engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("a.md", "A"), ("b.md", "B")]))
        .unwrap();

    // Unmanaged file where "d" would go
    fs::write(ws.agent("d"), "hand written").unwrap();

    let result = engine
        .reconcile(&ws.snapshot(
            ArtifactKind::Agent,
            &[("b.md", "B"), ("c.md", "C"), ("d.md", "D")],
        ))
        .unwrap();

    assert!(result.deployed.is_disjoint(&result.removed));
    assert!(result.deployed.is_disjoint(&result.unchanged));
    assert!(result.removed.is_disjoint(&result.unchanged));
    assert!(result.updated.is_subset(&result.deployed));
    assert_eq!(result.considered(), ids(&["a", "b", "c", "d"]));
}

#[test]
fn unmanaged_target_is_left_untouched() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.context.agents_dir()).unwrap();
    fs::write(ws.agent("custom"), "mine").unwrap();

    let result = engine(&ws, ArtifactKind::Agent)
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("custom.md", "theirs")]))
        .unwrap();

    assert!(result.deployed.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].artifact_id, "custom");
    assert_eq!(fs::read_to_string(ws.agent("custom")).unwrap(), "mine");
}

#[test]
fn unmanaged_target_is_adopted_when_enabled() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.context.agents_dir()).unwrap();
    fs::write(ws.agent("custom"), "mine").unwrap();

    let engine = ReconciliationEngine::new(
        ws.context.clone(),
        ArtifactKind::Agent,
        ReconcileOptions {
            adopt_unmanaged: true,
            ..ReconcileOptions::default()
        },
    );
    let result = engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("custom.md", "theirs")]))
        .unwrap();

    assert_eq!(result.deployed, ids(&["custom"]));
    assert_eq!(result.updated, ids(&["custom"]));
    assert_eq!(fs::read_to_string(ws.agent("custom")).unwrap(), "theirs");

    let backups = BackupManager::for_context(&ws.context, ArtifactKind::Agent)
        .list()
        .unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(
        fs::read_to_string(&backups[0].snapshot_location).unwrap(),
        "mine"
    );
}

#[test]
fn files_outside_the_manifest_survive_removals() {
    let ws = Workspace::new();
    let engine = engine(&ws, ArtifactKind::Agent);
    engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("a.md", "A")]))
        .unwrap();
    fs::write(ws.agent("notes"), "keep me").unwrap();

    let result = engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[]))
        .unwrap();

    assert_eq!(result.removed, ids(&["a"]));
    assert_eq!(fs::read_to_string(ws.agent("notes")).unwrap(), "keep me");
}

#[test]
fn one_failing_artifact_does_not_block_the_rest() {
    let ws = Workspace::new();
    let engine = engine(&ws, ArtifactKind::Agent);
    engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("a.md", "A1"), ("b.md", "B1")]))
        .unwrap();
    let before = engine.manifest().unwrap();

    // A non-empty directory where b.md lives makes the atomic rename fail
    fs::remove_file(ws.agent("b")).unwrap();
    fs::create_dir_all(ws.agent("b").join("blocker")).unwrap();

    let result = engine
        .reconcile(&ws.snapshot(
            ArtifactKind::Agent,
            &[("a.md", "A2"), ("b.md", "B2"), ("c.md", "C1")],
        ))
        .unwrap();

    assert_eq!(result.deployed, ids(&["a", "c"]));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].artifact_id, "b");
    assert!(!result.is_success());

    let after = engine.manifest().unwrap();
    assert_eq!(
        after.entries["b"].content_hash, before.entries["b"].content_hash,
        "failed artifact keeps its previous manifest entry"
    );
    assert_ne!(
        after.entries["a"].content_hash,
        before.entries["a"].content_hash
    );
    assert!(after.entries.contains_key("c"));

    let journal = OperationJournal::for_context(&ws.context, ArtifactKind::Agent);
    let failed: Vec<_> = journal
        .entries()
        .unwrap()
        .into_iter()
        .filter(|e| e.outcome == Some(JournalOutcome::Failed))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target_path, ws.agent("b"));
    assert!(failed[0].message.is_some());
}

#[test]
fn disabled_artifacts_are_removed_and_not_deployed() {
    let ws = Workspace::new();
    let snapshot = ws.snapshot(ArtifactKind::Agent, &[("a.md", "A"), ("qa.md", "QA")]);
    engine(&ws, ArtifactKind::Agent).reconcile(&snapshot).unwrap();

    let restricted = ReconciliationEngine::new(
        ws.context.clone(),
        ArtifactKind::Agent,
        ReconcileOptions {
            disabled: ids(&["qa"]),
            ..ReconcileOptions::default()
        },
    );
    let result = restricted.reconcile(&snapshot).unwrap();

    assert_eq!(result.removed, ids(&["qa"]));
    assert_eq!(result.unchanged, ids(&["a"]));
    assert!(!ws.agent("qa").exists());
    assert!(!restricted.manifest().unwrap().entries.contains_key("qa"));
}

#[test]
fn every_update_and_removal_is_backed_up_and_journaled() {
    let ws = Workspace::new();
    let engine = engine(&ws, ArtifactKind::Agent);
    engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("a.md", "A1"), ("b.md", "B1")]))
        .unwrap();

    let backups = BackupManager::for_context(&ws.context, ArtifactKind::Agent);
    assert!(backups.list().unwrap().is_empty(), "fresh deploys need no backup");

    engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("a.md", "A2")]))
        .unwrap();

    let records = backups.list().unwrap();
    assert_eq!(records.len(), 2);
    let originals: BTreeSet<_> = records.iter().map(|r| r.original_path.clone()).collect();
    assert!(originals.contains(&ws.agent("a")));
    assert!(originals.contains(&ws.agent("b")));

    let journal = OperationJournal::for_context(&ws.context, ArtifactKind::Agent);
    let entries = journal.entries().unwrap();
    let with_backup: Vec<_> = entries
        .iter()
        .filter(|e| matches!(e.action, JournalAction::Update | JournalAction::Remove))
        .collect();
    assert_eq!(with_backup.len(), 2);
    assert!(with_backup.iter().all(|e| e.backup_ref.is_some()));
    assert!(
        entries
            .iter()
            .all(|e| e.outcome == Some(JournalOutcome::Applied))
    );
    assert!(journal.in_flight().unwrap().is_empty());
}

#[test]
fn backup_restores_previous_content() {
    let ws = Workspace::new();
    let engine = engine(&ws, ArtifactKind::Agent);
    engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("a.md", "A1")]))
        .unwrap();
    engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("a.md", "A2")]))
        .unwrap();

    let backups = BackupManager::for_context(&ws.context, ArtifactKind::Agent);
    let record = backups.list().unwrap().pop().unwrap();
    backups.restore(&record.backup_id).unwrap();

    assert_eq!(fs::read_to_string(ws.agent("a")).unwrap(), "A1");
}

#[test]
fn skills_deploy_as_directories_and_are_deleted_on_removal() {
    let ws = Workspace::new();
    let engine = engine(&ws, ArtifactKind::Skill);

    let result = engine
        .reconcile(&ws.snapshot(
            ArtifactKind::Skill,
            &[
                ("pdf/SKILL.md", "# PDF"),
                ("pdf/scripts/extract.py", "print('x')"),
                ("docx/SKILL.md", "# DOCX"),
            ],
        ))
        .unwrap();

    assert_eq!(result.deployed, ids(&["docx", "pdf"]));
    assert!(ws.skill("pdf").join("scripts/extract.py").is_file());

    let result = engine
        .reconcile(&ws.snapshot(ArtifactKind::Skill, &[("docx/SKILL.md", "# DOCX")]))
        .unwrap();

    assert_eq!(result.removed, ids(&["pdf"]));
    assert_eq!(result.unchanged, ids(&["docx"]));
    assert!(!ws.skill("pdf").exists());

    // The deleted skill is still recoverable from its backup
    let records = BackupManager::for_context(&ws.context, ArtifactKind::Skill)
        .list()
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_dir);
    assert!(records[0].snapshot_location.join("SKILL.md").is_file());
}

#[test]
fn scopes_do_not_share_state() {
    let one = Workspace::new();
    let two = Workspace::new();

    engine(&one, ArtifactKind::Agent)
        .reconcile(&one.snapshot(ArtifactKind::Agent, &[("a.md", "A")]))
        .unwrap();
    let result = engine(&two, ArtifactKind::Agent)
        .reconcile(&two.snapshot(ArtifactKind::Agent, &[]))
        .unwrap();

    assert!(result.removed.is_empty());
    assert!(one.agent("a").exists());
    assert!(!two.agent("a").exists());
    assert!(engine(&two, ArtifactKind::Agent).manifest().unwrap().entries.is_empty());
}

#[test]
#[serial]
fn user_and_project_scopes_are_isolated() {
    let ws = Workspace::new();
    let home = ws.temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _guard = HomeGuard::set(&home);
    let user = DeploymentContext::for_scope(ConfigScope::User, Some(ws.project().to_path_buf()));
    let user_engine = ReconciliationEngine::new(user.clone(), ArtifactKind::Agent, ReconcileOptions::default());

    let result = user_engine
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("a.md", "A")]))
        .unwrap();
    assert_eq!(result.deployed, ids(&["a"]));
    assert!(home.join(".claude/agents/a.md").is_file());
    assert!(!ws.project().join(".claude").exists());
    assert!(!ws.project().join(".claude-mpm").exists());

    // A project pass with a different desired set leaves the user scope alone
    let result = engine(&ws, ArtifactKind::Agent)
        .reconcile(&ws.snapshot(ArtifactKind::Agent, &[("b.md", "B")]))
        .unwrap();
    assert_eq!(result.deployed, ids(&["b"]));
    assert!(result.removed.is_empty());
    assert!(ws.agent("b").is_file());
    assert!(home.join(".claude/agents/a.md").is_file());
    assert!(!home.join(".claude/agents/b.md").exists());

    let user_manifest = user_engine.manifest().unwrap();
    let project_manifest = engine(&ws, ArtifactKind::Agent).manifest().unwrap();
    assert_eq!(user_manifest.entries.keys().cloned().collect::<BTreeSet<_>>(), ids(&["a"]));
    assert_eq!(project_manifest.entries.keys().cloned().collect::<BTreeSet<_>>(), ids(&["b"]));
    assert!(home.join(".claude-mpm/manifests").is_dir());
}
