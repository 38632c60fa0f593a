//! Breakpoint verification, matching during continue, and the
//! breakpoint-location enumeration.

mod common;

use std::path::Path;

use avmdbg_backend::{Debugger, StepGranularity, StopReason};
use common::*;
use serde_json::json;

/// One app call over `state-changes.teal`: a mapped opcode on line 1
/// (0-based), then a run of state-changing opcodes further down.
fn state_changes_fixture() -> Debugger {
    let trace = vec![
        op(1),
        op_stack(2, 0, vec![avm_bytes(b"local-int-key")]),
        op_stack(3, 0, vec![avm_uint(0xcafeb0ba)]),
        json!({
            "pc": 4,
            "stack-pop-count": 2,
            "state-changes": [local_write(
                "PATRJKTPCAD2EAVVJJN2A4IWSA4BNRL3BTLGAXXDZTZHCX73HJYRKJR3GY",
                b"local-int-key",
                avm_uint(0xcafeb0ba),
            )],
        }),
        op(5),
    ];
    let map = vec![None, Some(1), Some(12), Some(13), Some(14), Some(15)];
    let response = json!({
        "txn-groups": [{
            "txn-results": [{
                "txn-result": { "txn": { "txn": { "type": "appl", "apid": 1001 } } },
                "exec-trace": {
                    "approval-program-hash": hash_b64(3),
                    "approval-program-trace": trace,
                },
            }],
        }],
    });
    let sources = json!({
        "txn-group-sources": [source_entry(3, "state-changes.teal", &map)],
    });
    debugger(response, sources, &[("state-changes.teal", &teal_text(20, &[]))])
}

fn teal_path() -> &'static Path {
    Path::new("/sim/state-changes.teal")
}

#[test]
fn continue_stops_on_a_line_breakpoint() {
    let mut d = state_changes_fixture();
    assert_eq!(d.start(), StopReason::Entry);

    let set = d.set_breakpoints(teal_path(), &[(1, None)]);
    assert_eq!(set.len(), 1);
    assert!(set[0].verified);
    assert_eq!((set[0].line, set[0].column), (1, 0));

    let reason = d.continue_forward();
    assert_eq!(reason, StopReason::Breakpoint { ids: vec![set[0].id] });
    assert_eq!(position(&d), ("state-changes.teal".to_string(), 1));

    // No further breakpoint ahead: the trace runs to completion.
    assert_eq!(d.continue_forward(), StopReason::Terminated);
}

#[test]
fn unverified_breakpoints_never_stop() {
    let mut d = state_changes_fixture();
    d.start();

    // Line 7 has no mapped instruction.
    let set = d.set_breakpoints(teal_path(), &[(7, None)]);
    assert!(!set[0].verified);
    assert_eq!(d.continue_forward(), StopReason::Terminated);
}

#[test]
fn breakpoints_on_unknown_files_are_unverified() {
    let mut d = state_changes_fixture();
    let set = d.set_breakpoints(Path::new("/sim/transaction-group-0.json"), &[(1, None)]);
    assert!(!set[0].verified);
}

#[test]
fn breakpoint_location_enumeration() {
    let d = state_changes_fixture();
    let file = d.assets().files.id(teal_path()).unwrap();

    assert_eq!(d.index().breakpoint_locations(file, 0..=20), vec![
        (1, 0),
        (12, 0),
        (13, 0),
        (14, 0),
        (15, 0),
    ]);
    assert_eq!(d.index().breakpoint_locations(file, 12..=13), vec![(12, 0), (13, 0)]);
    assert_eq!(d.index().breakpoint_locations(file, 2..=11), vec![]);
}

#[test]
fn step_stops_are_promoted_to_breakpoints() {
    let mut d = state_changes_fixture();
    d.start();
    let set = d.set_breakpoints(teal_path(), &[(12, None)]);

    // Step from entry into the program, then across lines 1 -> 12.
    d.step_in(StepGranularity::Line);
    d.step_in(StepGranularity::Line);
    let reason = d.step_in(StepGranularity::Line);
    assert_eq!(reason, StopReason::Breakpoint { ids: vec![set[0].id] });
    assert_eq!(position(&d), ("state-changes.teal".to_string(), 12));
}

#[test]
fn reverse_continue_finds_the_most_recent_hit() {
    let mut d = state_changes_fixture();
    d.start();
    let set = d.set_breakpoints(teal_path(), &[(12, None), (13, None)]);
    assert!(set.iter().all(|bp| bp.verified));

    // Run to the end, then backwards: the nearest hit behind the cursor
    // is line 13, then line 12.
    while d.continue_forward() != StopReason::Terminated {}
    assert_eq!(d.continue_backward(), StopReason::Breakpoint { ids: vec![set[1].id] });
    assert_eq!(position(&d), ("state-changes.teal".to_string(), 13));
    assert_eq!(d.continue_backward(), StopReason::Breakpoint { ids: vec![set[0].id] });

    // No hit remains behind: the cursor rests at the entry position.
    assert_eq!(d.continue_backward(), StopReason::Entry);
    assert_eq!(d.cursor().unwrap(), &d.tree().first_position().unwrap());
}

#[test]
fn resetting_breakpoints_replaces_the_old_set() {
    let mut d = state_changes_fixture();
    d.start();
    d.set_breakpoints(teal_path(), &[(1, None)]);
    let set = d.set_breakpoints(teal_path(), &[(14, None)]);

    let reason = d.continue_forward();
    assert_eq!(reason, StopReason::Breakpoint { ids: vec![set[0].id] });
    assert_eq!(position(&d), ("state-changes.teal".to_string(), 14));
}

#[test]
fn failed_traces_end_in_an_exception_stop() {
    let response = json!({
        "txn-groups": [{
            "txn-results": [{
                "txn-result": { "txn": { "txn": { "type": "appl", "apid": 1001 } } },
                "exec-trace": {
                    "approval-program-hash": hash_b64(3),
                    "approval-program-trace": [op(1), op(2)],
                },
            }],
            "failure-message": "logic eval error: assert failed",
            "failed-at": [0],
        }],
    });
    let sources = json!({
        "txn-group-sources": [source_entry(3, "prog.teal", &[None, Some(1), Some(2)])],
    });
    let mut d = debugger(response, sources, &[("prog.teal", &teal_text(4, &[]))]);
    d.start();

    assert_eq!(
        d.continue_forward(),
        StopReason::Exception { message: "logic eval error: assert failed".to_string() },
    );
    // The failure is reported once; afterwards the trace just terminates.
    assert_eq!(d.continue_forward(), StopReason::Terminated);
}
