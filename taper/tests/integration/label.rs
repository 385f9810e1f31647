// vim: tw=80
use predicates::prelude::*;

use super::{taper, Harness};

fn label(h: &Harness, label: &str) -> assert_cmd::assert::Assert {
    taper()
        .args(["label", "-c"])
        .arg(&h.config)
        .arg(label)
        .assert()
}

#[test]
fn ok() {
    let h = Harness::new("");
    label(&h, "DAILY-01")
        .success()
        .stdout("labeled tape DAILY-01\n");
}

/// A label may not be reused on a different tape
#[test]
fn duplicate() {
    let h = Harness::new("");
    label(&h, "DAILY-01").success();
    label(&h, "DAILY-02").success();
    label(&h, "DAILY-01")
        .failure()
        .stderr(predicate::str::contains(
            "label DAILY-01 is already in the tapelist"));
}

#[test]
fn labelstr() {
    let h = Harness::new("");
    label(&h, "WEEKLY-1")
        .failure()
        .stderr(predicate::str::contains("doesn't match labelstr"));
    taper()
        .args(["label", "--force", "-c"])
        .arg(&h.config)
        .arg("WEEKLY-1")
        .assert()
        .success();
}

/// A tape written within the retention cycle is protected
#[test]
fn active() {
    let h = Harness::new("tapecycle: 2\n");
    label(&h, "DAILY-01").success();
    taper()
        .args(["run", "-c"])
        .arg(&h.config)
        .write_stdin("START-TAPER 20240101\nQUIT\n")
        .assert()
        .success();
    label(&h, "DAILY-05")
        .failure()
        .stderr(predicate::str::contains(
            "cannot overwrite active tape DAILY-01"));
}
