// vim: tw=80
use std::{fs, os::unix::fs::PermissionsExt};

use predicates::prelude::*;

use super::{taper, Harness};

/// A changer over the slot directories beside it.  The loaded slot is kept in
/// the file "current".
const CHANGER: &str = r#"#!/bin/sh
n=2
cur=$(cat current 2>/dev/null || echo 1)
case "$1" in
-info)
    echo "$cur $n 1"
    exit 0;;
-slot)
    case "$2" in
    current) ;;
    next) cur=$((cur % n + 1));;
    prev) cur=$(((cur + n - 2) % n + 1));;
    first) cur=1;;
    last) cur=$n;;
    [1-9])
        if [ "$2" -gt $n ]; then
            echo "$2 no such slot"
            exit 1
        fi
        cur=$2;;
    *)
        echo "$2 no such slot"
        exit 1;;
    esac
    echo $cur > current
    echo "$cur $PWD/slot$cur"
    exit 0;;
-eject)
    echo "$cur $PWD/slot$cur";;
*)
    echo "0 unknown command $1"
    exit 2;;
esac
"#;

#[test]
fn bad_command() {
    let h = Harness::new("");
    taper()
        .args(["run", "-c"])
        .arg(&h.config)
        .write_stdin("REWIND-TAPE H3\nQUIT\n")
        .assert()
        .success()
        .stdout("BAD-COMMAND H3\nQUITTING\n");
}

/// Scan a changer, and write a tape that was labeled beforehand
#[test]
fn changer() {
    let h = Harness::new("");
    let script = h.path().join("chg-slots");
    fs::write(&script, CHANGER).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    for slot in ["slot1", "slot2"] {
        fs::create_dir(h.path().join(slot)).unwrap();
    }
    let config = h.path().join("changer.yaml");
    fs::write(&config, "tpchanger: chg-slots\n\
                        labelstr: \"^DAILY-[0-9]+$\"\n\
                        blocksize: 1024\n\
                        buffers: 4\n").unwrap();

    taper()
        .args(["label", "-c"])
        .arg(&config)
        .arg("DAILY-07")
        .assert()
        .success();

    let src = h.path().join("d1");
    fs::write(&src, vec![b'x'; 3000]).unwrap();
    let input = format!("START-TAPER 20240101\n\
                         FILE-WRITE H1 {} host1 /var 1\n\
                         QUIT\n", src.display());
    taper()
        .args(["run", "-c"])
        .arg(&config)
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::is_match(
            "^TAPER-OK\n\
             DONE H1 DAILY-07 1 \\[sec [0-9.]+ kb 3 kps [0-9.]+\\]\n\
             QUITTING\n$").unwrap());
}

#[test]
fn end_of_input() {
    let h = Harness::new("autolabel: DAILY-%%\n");
    taper()
        .args(["run", "-c"])
        .arg(&h.config)
        .write_stdin("START-TAPER 20240101\n")
        .assert()
        .success()
        .stdout("TAPER-OK\n");
}

#[test]
fn file_write() {
    let h = Harness::new("autolabel: DAILY-%%\n");
    let src = h.path().join("d1");
    fs::write(&src, vec![0xa5u8; 10240]).unwrap();
    let input = format!("START-TAPER 20240101\n\
                         FILE-WRITE H1 {} host1 disk1 0\n\
                         QUIT\n", src.display());
    taper()
        .args(["run", "--config"])
        .arg(&h.config)
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::is_match(
            "^TAPER-OK\n\
             DONE H1 DAILY-01 1 \\[sec [0-9.]+ kb 10 kps [0-9.]+\\]\n\
             QUITTING\n$").unwrap());
}

#[test]
fn missing_config() {
    let h = Harness::new("");
    taper()
        .args(["run", "-c"])
        .arg(h.path().join("nonexistent.yaml"))
        .write_stdin("QUIT\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: config:"));
}

/// Without a usable tape, the run can't start
#[test]
fn start_fails() {
    let h = Harness::new("");
    taper()
        .args(["run", "-c"])
        .arg(&h.config)
        .write_stdin("START-TAPER 20240101\nQUIT\n")
        .assert()
        .failure()
        .stdout("TAPE-ERROR [blank tape, and no autolabel template]\n");
}
