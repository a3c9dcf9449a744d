//! Smoke tests for the offline subcommands.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn write_temp(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn routes_prints_next_hops() {
    let topo = write_temp("0 -> 1 1\n1 -> 2 1\n");
    Command::cargo_bin("vrouter")
        .unwrap()
        .args(["routes", "--topology"])
        .arg(topo.path())
        .args(["--vrid", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("via"))
        .stdout(predicate::str::contains("0 -> 1 -> 2"));
}

#[test]
fn routes_rejects_unknown_router() {
    let topo = write_temp("0 -> 1 1\n");
    Command::cargo_bin("vrouter")
        .unwrap()
        .args(["routes", "--topology"])
        .arg(topo.path())
        .args(["--vrid", "9"])
        .assert()
        .failure();
}

#[test]
fn manifest_validation_reports_coverage() {
    let manifest = write_temp(
        r#"{
            "paths": {
                "1": {
                    "path": [0, 1, 2],
                    "routers": {
                        "1": { "range": [0.0, 0.5], "quota": 10 }
                    }
                }
            }
        }"#,
    );
    Command::cargo_bin("vrouter")
        .unwrap()
        .arg("manifest")
        .arg(manifest.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("manifest ok: 1 paths"))
        .stdout(predicate::str::contains("50% of hash space"));
}

#[test]
fn bad_manifest_fails() {
    let manifest = write_temp(r#"{ "paths": { "1": { "path": [0], "routers": {} } } }"#);
    Command::cargo_bin("vrouter")
        .unwrap()
        .arg("manifest")
        .arg(manifest.path())
        .assert()
        .failure();
}
