// vim: tw=80
use std::fs;

use pretty_assertions::assert_eq;

use super::{taper, Harness};

const TAPELIST: &str = r#"- datestamp: "20240103"
  label: DAILY-03
- datestamp: "20240102"
  label: DAILY-02
- datestamp: "20240101"
  label: WEEKLY-1
- datestamp: "20231231"
  label: DAILY-01
- datestamp: "0"
  label: DAILY-09
"#;

#[test]
fn empty() {
    let h = Harness::new("");
    taper()
        .args(["list", "-c"])
        .arg(&h.config)
        .assert()
        .success()
        .stdout(predicates::str::starts_with("DATESTAMP"));
}

#[test]
fn statuses() {
    let h = Harness::new("tapecycle: 2\n");
    fs::write(h.path().join("tapelist"), TAPELIST).unwrap();
    let output = taper()
        .args(["list", "-c"])
        .arg(&h.config)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let rows = stdout.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>())
        .collect::<Vec<_>>();
    assert_eq!(rows, vec![
        vec!["DATESTAMP", "LABEL", "STATUS"],
        vec!["20240103", "DAILY-03", "active"],
        vec!["20240102", "DAILY-02", "active"],
        vec!["20240101", "WEEKLY-1", "foreign"],
        vec!["20231231", "DAILY-01", "reusable"],
        vec!["0", "DAILY-09", "unused"],
    ]);
}
