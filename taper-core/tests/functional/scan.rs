// vim: tw=80
//! Changer scan order
//!
//! Every case uses a rack holding a foreign tape `WEEKLY-1`, the ideal tape
//! `DAILY-2`, and the reusable but less desirable `DAILY-1`.
use pretty_assertions::assert_eq;
use rstest::rstest;
use taper_core::{
    changer::Changer,
    policy::LabelPolicy,
    scan::taper_scan,
    tapelist::{Entry, TapeList},
    vtape::VTape,
};

use super::{label_tape, tempdir, FakeRack};

fn catalog() -> TapeList {
    let entries = ["DAILY-4", "DAILY-3", "DAILY-2", "DAILY-1"].iter()
        .enumerate()
        .map(|(i, label)| Entry {
            datestamp: format!("2024010{}", 4 - i),
            label: (*label).to_owned()
        }).collect();
    TapeList::with_entries("/nonexistent/tapelist", entries)
}

/// Scan a rack whose slots hold `labels`, in order, and return the chosen
/// slot's label.
fn scan(labels: &[&str], can_reverse: bool) -> String {
    let dir = tempdir();
    let rack = FakeRack::new(dir.path(), labels.len())
        .can_reverse(can_reverse);
    for (i, label) in labels.iter().enumerate() {
        label_tape(rack.slot(i + 1), label, "20240101");
    }
    let mut changer = Changer::new(rack);
    let policy = LabelPolicy::new("^DAILY-[0-9]+$", 2, None).unwrap();
    let found = taper_scan(&mut changer, &mut VTape::new(None), &catalog(),
                           &policy)
        .unwrap();
    found.label.unwrap()
}

/// The ideal tape is found before any other eligible tape
#[rstest]
#[case(false)]
#[case(true)]
fn exact_first(#[case] can_reverse: bool) {
    assert_eq!(scan(&["WEEKLY-1", "DAILY-2", "DAILY-1"], can_reverse),
               "DAILY-2");
}

/// A changer that can only go forwards settles for the first eligible tape
#[test]
fn forward_only() {
    assert_eq!(scan(&["WEEKLY-1", "DAILY-1", "DAILY-2"], false), "DAILY-1");
}

/// A changer that can go backwards keeps looking for the ideal tape
#[test]
fn reversible() {
    assert_eq!(scan(&["WEEKLY-1", "DAILY-1", "DAILY-2"], true), "DAILY-2");
}

/// If the ideal tape is missing, a reversible changer goes back to the first
/// eligible tape.
#[test]
fn reload_fallback() {
    let dir = tempdir();
    let rack = FakeRack::new(dir.path(), 3).can_reverse(true);
    for (i, label) in ["DAILY-1", "WEEKLY-1", "DAILY-9"].iter().enumerate() {
        label_tape(rack.slot(i + 1), label, "20240101");
    }
    let slot1 = rack.slot(1).to_owned();
    let mut changer = Changer::new(rack);
    let policy = LabelPolicy::new("^DAILY-[0-9]+$", 2, None).unwrap();
    let found = taper_scan(&mut changer, &mut VTape::new(None), &catalog(),
                           &policy)
        .unwrap();
    assert_eq!(found.slot, "1");
    assert_eq!(found.device, slot1);
    assert_eq!(found.label.as_deref(), Some("DAILY-1"));
}
