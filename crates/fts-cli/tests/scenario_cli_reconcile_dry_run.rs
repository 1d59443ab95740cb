//! `fts reconcile --dry-run` replays a captured delivery in memory.
//!
//! No DB required.

use std::io::Write;

use assert_cmd::Command;
use fts_testkit::{failed, started, transfer_id, ALICE, BOB};
use predicates::prelude::*;

fn batch_file(batch: &[fts_schemas::EventNotification]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("tempfile");
    f.write_all(&serde_json::to_vec(batch).unwrap()).unwrap();
    f
}

#[test]
fn replay_creates_then_appends() {
    let tid = transfer_id(300);
    let f = batch_file(&[
        started(tid, ALICE),
        failed(tid, ALICE, "scan failed"),
        started(tid, BOB),
    ]);

    Command::cargo_bin("fts")
        .unwrap()
        .env_remove("FTS_DATABASE_URL")
        .args(["reconcile", "--dry-run", "--file"])
        .arg(f.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("store=memory"))
        .stdout(predicate::str::contains(format!(
            "event=0 transfer_id={tid} partition={ALICE} disposition=created attempts=1"
        )))
        .stdout(predicate::str::contains("event=1").and(predicate::str::contains("disposition=appended")))
        // Bob's sighting joins Alice's aggregate rather than starting his own.
        .stdout(predicate::str::contains(format!(
            "event=2 transfer_id={tid} partition={ALICE} disposition=appended"
        )))
        .stdout(predicate::str::contains(
            "reconciled=3 created=1 appended=2 duplicates=0 skipped_handshakes=0",
        ));
}

#[test]
fn undecodable_entry_refuses_before_any_write() {
    let tid = transfer_id(301);
    let mut bad = failed(tid, ALICE, "x");
    bad.data = serde_json::json!({ "TransferId": tid });
    let f = batch_file(&[started(tid, ALICE), bad]);

    Command::cargo_bin("fts")
        .unwrap()
        .args(["reconcile", "--dry-run", "--file"])
        .arg(f.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("REFUSING RECONCILE"))
        .stderr(predicate::str::contains("index=1"))
        .stdout(predicate::str::contains("disposition=").not());
}

#[test]
fn deterministic_identity_from_config_dedupes_redelivery() {
    let tid = transfer_id(302);
    let n = started(tid, ALICE);
    let f = batch_file(&[n.clone(), n]);

    let mut cfg = tempfile::NamedTempFile::new().unwrap();
    writeln!(cfg, "reconciler:\n  event_identity: deterministic").unwrap();

    Command::cargo_bin("fts")
        .unwrap()
        .args(["reconcile", "--dry-run", "--file"])
        .arg(f.path())
        .arg("--config")
        .arg(cfg.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("disposition=duplicate"))
        .stdout(predicate::str::contains("reconciled=2 created=1 appended=0 duplicates=1"));
}

#[test]
fn persistent_replay_without_database_url_names_the_env_var() {
    let tid = transfer_id(303);
    let f = batch_file(&[started(tid, ALICE)]);

    Command::cargo_bin("fts")
        .unwrap()
        .env_remove("FTS_DATABASE_URL")
        .args(["reconcile", "--file"])
        .arg(f.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("SECRETS_MISSING"))
        .stderr(predicate::str::contains("FTS_DATABASE_URL"));
}

#[test]
fn debug_logging_reports_classification_on_stderr() {
    let tid = transfer_id(304);
    let f = batch_file(&[started(tid, ALICE)]);

    Command::cargo_bin("fts")
        .unwrap()
        .env("RUST_LOG", "debug")
        .args(["reconcile", "--dry-run", "--file"])
        .arg(f.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("notifications classified"))
        .stdout(predicate::str::contains("notifications classified").not());
}
