//! `fts config-hash` is stable and refuses literal secrets.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn yaml(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

fn hash_of(paths: &[&std::path::Path]) -> String {
    let out = Command::cargo_bin("fts")
        .unwrap()
        .arg("config-hash")
        .args(paths)
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    stdout
        .lines()
        .find_map(|l| l.strip_prefix("config_hash="))
        .expect("config_hash line")
        .to_string()
}

#[test]
fn same_layers_same_hash_override_changes_it() {
    let base = yaml("reconciler:\n  max_attempts: 5\n  backoff_base_ms: 25\n");
    let reordered = yaml("reconciler:\n  backoff_base_ms: 25\n  max_attempts: 5\n");
    let overlay = yaml("reconciler:\n  max_attempts: 9\n");

    let h1 = hash_of(&[base.path()]);
    let h2 = hash_of(&[reordered.path()]);
    let h3 = hash_of(&[base.path(), overlay.path()]);

    assert_eq!(h1, h2, "key order must not affect the hash");
    assert_ne!(h1, h3);
    assert_eq!(h1.len(), 64);
}

#[test]
fn literal_database_url_is_refused() {
    let f = yaml("store:\n  database_url_env: \"postgres://fts:hunter2@db/fts\"\n");
    Command::cargo_bin("fts")
        .unwrap()
        .arg("config-hash")
        .arg(f.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"))
        .stderr(predicate::str::contains("hunter2").not());
}

#[test]
fn unused_keys_are_reported_on_stderr() {
    let f = yaml("reconciler:\n  max_attempt: 3\n");
    Command::cargo_bin("fts")
        .unwrap()
        .arg("config-hash")
        .arg(f.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("unused_key=/reconciler/max_attempt"));
}
