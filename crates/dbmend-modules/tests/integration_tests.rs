//! End-to-end tests: configuration in, report out
//!
//! Each test writes a small content-repository schema to a temporary SQLite
//! file, builds modules from a `dbmend.toml` snippet and runs them through
//! the orchestrator.

use dbmend_core::{Config, Report, Status};
use dbmend_engine::{MemoryRegistry, Orchestrator, RunSettings};
use dbmend_modules::build_modules;
use dbmend_store::{Session, SqliteProvider, SqliteStore};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const SCHEMA: &str = "
    CREATE TABLE nodes (id INTEGER PRIMARY KEY, name TEXT);
    CREATE TABLE node_props (id INTEGER PRIMARY KEY, node_id INTEGER, locale TEXT, version INTEGER);
    CREATE TABLE relationships (id INTEGER PRIMARY KEY, from_id INTEGER, to_id INTEGER);
    CREATE TABLE relationship_props (id INTEGER PRIMARY KEY, relationship_id INTEGER, prop TEXT);
    CREATE TABLE acl (id INTEGER PRIMARY KEY, node_ref INTEGER, principal TEXT);
    CREATE TABLE id_counters (counter_key TEXT PRIMARY KEY, counter_value INTEGER NOT NULL);
";

// =============================================================================
// Helper Functions
// =============================================================================

struct Fixture {
    _dir: TempDir,
    path: PathBuf,
    config: Config,
}

impl Fixture {
    async fn new(data: &str, modules: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cms.db");
        let store = SqliteStore::open_path(&path).await.unwrap();
        store.execute_batch(SCHEMA).await.unwrap();
        store.execute_batch(data).await.unwrap();
        store.close().await.unwrap();

        let config = Config::from_toml(modules).unwrap();
        Self {
            _dir: dir,
            path,
            config,
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        let modules = build_modules(&self.config).unwrap();
        Orchestrator::new(
            Box::new(SqliteProvider::from_path(&self.path)),
            Box::new(MemoryRegistry::new()),
            RunSettings::from_config(&self.config).unwrap(),
        )
        .with_modules(modules)
    }

    async fn int(&self, sql: &str) -> i64 {
        let session = Session::new(
            Box::new(SqliteStore::open_path(&self.path).await.unwrap()),
            Duration::from_secs(5),
        );
        let mut stmt = session.builder().statement();
        stmt.push_sql(sql);
        session.query_int(&stmt).await.unwrap()
    }
}

fn statuses(report: &Report, module: &str) -> Vec<Status> {
    report
        .module(module)
        .unwrap()
        .outcomes
        .iter()
        .map(|o| o.status())
        .collect()
}

// =============================================================================
// Orphaned rows
// =============================================================================

const ORPHANS: &str = r#"
[[modules]]
kind = "orphaned_rows"
name = "orphaned-relationships"
table = "relationships"
id_column = "id"
joins = [
    { column = "from_id", references = [{ table = "nodes", column = "id" }] },
    { column = "to_id", references = [{ table = "nodes", column = "id" }] },
]
cascades = [{ table = "relationship_props", column = "relationship_id", parent_column = "id" }]
"#;

#[tokio::test]
async fn test_orphaned_rows_preview_commit_rerun() {
    let fixture = Fixture::new(
        "INSERT INTO nodes VALUES (1, 'a'), (2, 'b'), (3, 'c'), (5, 'e');
         INSERT INTO relationships VALUES (1, 1, 5), (2, 2, 9), (3, 3, 5);
         INSERT INTO relationship_props VALUES (1, 2, 'x'), (2, 3, 'y');",
        ORPHANS,
    )
    .await;
    let mut orchestrator = fixture.orchestrator();

    let preview = orchestrator.run(true).await;
    let previewed: Vec<&str> = preview.outcomes().filter_map(|o| o.subject_id()).collect();
    assert_eq!(previewed, vec!["2"]);
    assert_eq!(fixture.int("SELECT COUNT(*) FROM relationships").await, 3);

    let commit = orchestrator.run(false).await;
    assert_eq!(statuses(&commit, "orphaned-relationships"), vec![Status::Success]);
    assert_eq!(fixture.int("SELECT COUNT(*) FROM relationships").await, 2);
    assert_eq!(fixture.int("SELECT COUNT(*) FROM relationship_props").await, 1);
    assert_eq!(commit.exit_code(), 0);

    let rerun = orchestrator.run(false).await;
    assert!(rerun.is_healthy());
    assert_eq!(rerun.summary.total, rerun.summary.info);
}

// =============================================================================
// Packed identifiers
// =============================================================================

const PACKED: &str = r#"
[[modules]]
kind = "packed_identifiers"
name = "unpack-acl-node-refs"
table = "acl"
id_column = "id"
column = "node_ref"
key_columns = ["node_ref", "principal"]
deregister_after_success = true
"#;

#[tokio::test]
async fn test_packed_identifiers_unpack_and_merge() {
    let fixture = Fixture::new(
        "INSERT INTO acl VALUES (1, 7, 'alice'), (2, 4294967303, 'alice'), (3, 8, 'bob');",
        PACKED,
    )
    .await;
    let mut orchestrator = fixture.orchestrator();

    let report = orchestrator.run(false).await;
    assert_eq!(
        statuses(&report, "unpack-acl-node-refs"),
        vec![Status::Success, Status::Success, Status::Info]
    );
    assert!(report.modules[0].deregistered);
    assert_eq!(fixture.int("SELECT COUNT(*) FROM acl").await, 2);
    assert_eq!(fixture.int("SELECT MAX(node_ref) FROM acl").await, 8);
    assert!(orchestrator.active_modules().is_empty());
}

#[tokio::test]
async fn test_failsafe_refusal_keeps_module_registered() {
    // Three tagged copies of the same reference: merging them would delete
    // three of four rows, which the failsafe refuses
    let fixture = Fixture::new(
        "INSERT INTO acl VALUES
             (1, 7, 'alice'), (2, 4294967303, 'alice'), (3, 8589934599, 'alice'), (4, 12884901895, 'alice');",
        PACKED,
    )
    .await;
    let mut orchestrator = fixture.orchestrator();

    let report = orchestrator.run(false).await;
    assert_eq!(
        statuses(&report, "unpack-acl-node-refs"),
        vec![Status::Success, Status::Warning]
    );
    assert!(!report.modules[0].deregistered);
    assert_eq!(orchestrator.active_modules(), vec!["unpack-acl-node-refs"]);
    assert_eq!(fixture.int("SELECT COUNT(*) FROM acl").await, 4);

    // Still refused, still registered
    let rerun = orchestrator.run(false).await;
    assert_eq!(
        statuses(&rerun, "unpack-acl-node-refs"),
        vec![Status::Info, Status::Warning]
    );
    assert!(!rerun.modules[0].deregistered);
}

// =============================================================================
// Duplicate keys
// =============================================================================

#[tokio::test]
async fn test_duplicate_keys_lowest_id_survives() {
    let fixture = Fixture::new(
        "INSERT INTO nodes VALUES (1, 'a');
         INSERT INTO node_props VALUES (4, 1, 'en', 1), (2, 1, 'en', 1), (3, 1, 'de', 1);",
        r#"
[run]
failsafe_ratio = 1.0

[[modules]]
kind = "duplicate_keys"
name = "duplicate-node-props"
table = "node_props"
id_column = "id"
key_columns = ["node_id", "locale"]
survivor = "lowest_id"
"#,
    )
    .await;

    let report = fixture.orchestrator().run(false).await;
    assert_eq!(statuses(&report, "duplicate-node-props"), vec![Status::Success]);
    assert_eq!(fixture.int("SELECT COUNT(*) FROM node_props WHERE locale = 'en'").await, 1);
    assert_eq!(fixture.int("SELECT id FROM node_props WHERE locale = 'en'").await, 2);
}

// =============================================================================
// Counters and missing dependents
// =============================================================================

const COUNTERS: &str = r#"
[[modules]]
kind = "counter_sync"
name = "node-counter"
key = "node"
sources = [{ table = "nodes", column = "id" }, { table = "node_props", column = "id" }]

[[modules]]
kind = "missing_dependents"
name = "missing-node-props"
parent_table = "nodes"
parent_key = "id"
table = "node_props"
id_column = "id"
parent_column = "node_id"
counter_key = "node"
defaults = { locale = "en", version = 1 }
"#;

#[tokio::test]
async fn test_counter_sync_runs_before_missing_dependents() {
    let fixture = Fixture::new(
        "INSERT INTO nodes VALUES (10, 'a'), (20, 'b'), (30, 'c');
         INSERT INTO node_props VALUES (40, 10, 'en', 1);
         INSERT INTO id_counters VALUES ('node', 25);",
        COUNTERS,
    )
    .await;
    let mut orchestrator = fixture.orchestrator();

    let preview = orchestrator.run(true).await;
    assert_eq!(statuses(&preview, "node-counter"), vec![Status::Preview]);
    assert_eq!(statuses(&preview, "missing-node-props"), vec![Status::Preview, Status::Preview]);
    assert_eq!(fixture.int("SELECT counter_value FROM id_counters").await, 25);

    let report = orchestrator.run(false).await;
    assert_eq!(report.exit_code(), 0);
    assert_eq!(fixture.int("SELECT COUNT(*) FROM node_props").await, 3);
    // Counter raised to 40, then one block of 20 reserved
    assert_eq!(fixture.int("SELECT MIN(id) FROM node_props WHERE node_id = 20").await, 41);
    assert_eq!(fixture.int("SELECT id FROM node_props WHERE node_id = 30").await, 42);
    assert_eq!(fixture.int("SELECT counter_value FROM id_counters").await, 60);
    assert_eq!(
        fixture.int("SELECT COUNT(*) FROM node_props WHERE locale = 'en' AND version = 1").await,
        3
    );

    let rerun = orchestrator.run(false).await;
    assert!(rerun.is_healthy());
}

#[tokio::test]
async fn test_counter_sync_seeds_missing_counter() {
    let fixture = Fixture::new("INSERT INTO nodes VALUES (10, 'a');", COUNTERS).await;

    let report = fixture.orchestrator().run(false).await;
    assert_eq!(statuses(&report, "node-counter"), vec![Status::Success]);
    assert_eq!(fixture.int("SELECT counter_value FROM id_counters WHERE counter_key = 'node'").await, 30);
    assert_eq!(fixture.int("SELECT id FROM node_props WHERE node_id = 10").await, 11);
}

#[tokio::test]
async fn test_missing_counter_key_is_a_module_failure() {
    let fixture = Fixture::new(
        "INSERT INTO nodes VALUES (10, 'a');",
        &COUNTERS.replace("counter_key = \"node\"", "counter_key = \"ghost\""),
    )
    .await;

    let report = fixture.orchestrator().run(false).await;
    let module = report.module("missing-node-props").unwrap();
    assert!(module.aborted);
    assert!(module.outcomes[0]
        .message()
        .contains("Counter key 'ghost' is missing from the counter table"));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(fixture.int("SELECT COUNT(*) FROM node_props").await, 0);
    // The counter module still ran and succeeded
    assert!(!report.module("node-counter").unwrap().has_failures());
}
