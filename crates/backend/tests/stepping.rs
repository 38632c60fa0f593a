//! Stepping semantics over a group mixing plain, logic-sig and app-call
//! transactions, including an inner transaction group.

mod common;

use avmdbg_backend::{Debugger, StepGranularity, StopReason};
use common::*;
use serde_json::{json, Value};

const LSIG_LINES: [u32; 6] = [1, 2, 3, 4, 5, 6];
const APP_LINES: [u32; 8] = [1, 2, 4, 11, 12, 13, 7, 8];

fn lsig_trace() -> Vec<Value> {
    (1..=6).map(|pc| op(pc)).collect()
}

fn app_trace() -> Vec<Value> {
    (1..=8).map(|pc| op(pc)).collect()
}

/// A pay txn, an appl txn signed by a logic sig, and another lsig-signed
/// pay txn.
fn stepping_fixture() -> Debugger {
    let response = json!({
        "txn-groups": [{
            "txn-results": [
                { "txn-result": { "txn": { "txn": { "type": "pay" } } } },
                {
                    "txn-result": {
                        "txn": { "lsig": { "l": "AQ==" }, "txn": { "type": "appl", "apid": 1001 } }
                    },
                    "exec-trace": {
                        "logic-sig-hash": hash_b64(1),
                        "logic-sig-trace": lsig_trace(),
                        "approval-program-hash": hash_b64(2),
                        "approval-program-trace": app_trace(),
                    },
                },
                {
                    "txn-result": {
                        "txn": { "lsig": { "l": "AQ==" }, "txn": { "type": "pay" } }
                    },
                    "exec-trace": {
                        "logic-sig-hash": hash_b64(1),
                        "logic-sig-trace": lsig_trace(),
                    },
                },
            ],
        }],
    });
    let lsig_map: Vec<Option<u32>> =
        std::iter::once(None).chain(LSIG_LINES.iter().map(|&l| Some(l))).collect();
    let app_map: Vec<Option<u32>> =
        std::iter::once(None).chain(APP_LINES.iter().map(|&l| Some(l))).collect();
    let sources = json!({
        "txn-group-sources": [
            source_entry(1, "lsig.teal", &lsig_map),
            source_entry(2, "app.teal", &app_map),
        ],
    });
    debugger(
        response,
        sources,
        &[
            ("lsig.teal", &teal_text(8, &[(1, "int 1"), (6, "return")])),
            ("app.teal", &teal_text(15, &[(1, "int 1")])),
        ],
    )
}

/// The pseudo-source lines the group-level walk is expected to visit.
fn group_level_lines(debugger: &Debugger) -> Vec<u32> {
    let gs = &debugger.tree().group_sources[0];
    let line = |path: &str| gs.line_of(path).unwrap_or_else(|| panic!("no line for {path}"));
    vec![
        line("0"),
        line("1"),
        line("1/txn/lsig"),
        line("1/txn/txn/apid"),
        line("2"),
        line("2/txn/lsig"),
    ]
}

#[test]
fn step_over_stays_at_transaction_level() {
    let mut d = stepping_fixture();
    assert_eq!(d.start(), StopReason::Entry);

    let expected = group_level_lines(&d);
    let mut visited = vec![position(&d)];
    loop {
        match d.step_over(StepGranularity::Line) {
            StopReason::Step => visited.push(position(&d)),
            StopReason::Terminated => break,
            other => panic!("unexpected stop {other:?}"),
        }
    }

    let lines: Vec<u32> = visited
        .iter()
        .map(|(source, line)| {
            assert_eq!(source, "transaction-group-0.json", "stepped into {source}");
            *line
        })
        .collect();
    assert_eq!(lines, expected);
    assert!(lines.windows(2).all(|w| w[0] < w[1]), "lines advance monotonically");
}

#[test]
fn step_in_descends_and_returns() {
    let mut d = stepping_fixture();
    assert_eq!(d.start(), StopReason::Entry);

    let group = group_level_lines(&d);
    let tg = |line: u32| ("transaction-group-0.json".to_string(), line);
    let mut expected: Vec<(String, u32)> = Vec::new();
    expected.push(tg(group[0]));
    expected.push(tg(group[1]));
    expected.push(tg(group[2]));
    expected.extend(LSIG_LINES.iter().map(|&l| ("lsig.teal".to_string(), l)));
    expected.push(tg(group[3]));
    expected.extend(APP_LINES.iter().map(|&l| ("app.teal".to_string(), l)));
    expected.push(tg(group[4]));
    expected.push(tg(group[5]));
    expected.extend(LSIG_LINES.iter().map(|&l| ("lsig.teal".to_string(), l)));

    let mut visited = vec![position(&d)];
    loop {
        match d.step_in(StepGranularity::Line) {
            StopReason::Step => visited.push(position(&d)),
            StopReason::Terminated => break,
            other => panic!("unexpected stop {other:?}"),
        }
    }
    assert_eq!(visited, expected);
}

#[test]
fn step_back_inverts_step_in() {
    let mut d = stepping_fixture();
    d.start();

    let mut trail = vec![(d.cursor().unwrap().clone(), d.state())];
    while d.step_in(StepGranularity::Instruction) == StopReason::Step {
        trail.push((d.cursor().unwrap().clone(), d.state()));
    }
    assert!(trail.len() > 10);

    // The cursor rests at the last position after termination; walk all
    // the way back, checking cursor and state at every stop.
    let mut expected = trail.iter().rev().skip(1);
    loop {
        let reason = d.step_back(StepGranularity::Instruction);
        let Some((cursor, state)) = expected.next() else {
            assert_eq!(reason, StopReason::Entry);
            break;
        };
        assert_eq!(d.cursor().unwrap(), cursor);
        assert_eq!(&d.state(), state, "state replays identically in reverse");
        if reason == StopReason::Entry {
            assert!(expected.next().is_none());
            break;
        }
        assert_eq!(reason, StopReason::Step);
    }
}

/// A single app call whose trace maps runs of consecutive events to the
/// same source line (several opcodes per line).
fn repeated_line_fixture() -> Debugger {
    let response = json!({
        "txn-groups": [{
            "txn-results": [{
                "txn-result": { "txn": { "txn": { "type": "appl", "apid": 1001 } } },
                "exec-trace": {
                    "approval-program-hash": hash_b64(4),
                    "approval-program-trace": (1..=6).map(op).collect::<Vec<Value>>(),
                },
            }],
        }],
    });
    let sources = json!({
        "txn-group-sources": [source_entry(
            4,
            "dense.teal",
            &[None, Some(5), Some(5), Some(5), Some(6), Some(6), Some(8)],
        )],
    });
    debugger(response, sources, &[("dense.teal", &teal_text(10, &[]))])
}

#[test]
fn line_steps_round_trip_across_repeated_lines() {
    let mut d = repeated_line_fixture();
    d.start();

    // Forward, a line step rests on the first event of each new line.
    let mut trail = vec![d.cursor().unwrap().clone()];
    let mut stops = vec![position(&d)];
    while d.step_in(StepGranularity::Line) == StopReason::Step {
        trail.push(d.cursor().unwrap().clone());
        stops.push(position(&d));
    }
    assert_eq!(stops[2..].to_vec(), vec![
        ("dense.teal".to_string(), 5),
        ("dense.teal".to_string(), 6),
        ("dense.teal".to_string(), 8),
    ]);

    // Backward, each line step must land exactly where the forward walk
    // rested, not on the last event of the run it re-enters.
    for cursor in trail.iter().rev().skip(1) {
        assert_eq!(d.step_back(StepGranularity::Line), StopReason::Step);
        assert_eq!(d.cursor().unwrap(), cursor);
    }
    assert_eq!(d.step_back(StepGranularity::Line), StopReason::Entry);
    assert_eq!(d.cursor().unwrap(), &d.tree().first_position().unwrap());
}

#[test]
fn reverse_over_and_out_mirror_the_forward_walks() {
    let mut d = stepping_fixture();
    d.start();

    // Into lsig.teal, a few instructions deep.
    for _ in 0..5 {
        d.step_in(StepGranularity::Instruction);
    }
    assert_eq!(position(&d), ("lsig.teal".to_string(), 3));

    let lsig_unit = d.tree().group_sources[0].line_of("1/txn/lsig").unwrap();
    let txn1 = d.tree().group_sources[0].line_of("1").unwrap();

    // Reverse step-out rests at the event that entered the program.
    assert_eq!(d.step_back_out(), StopReason::Step);
    assert_eq!(position(&d), ("transaction-group-0.json".into(), lsig_unit));

    // Reverse step-over walks back along the transaction level without
    // re-entering the program that just ran.
    assert_eq!(d.step_back_over(StepGranularity::Line), StopReason::Step);
    assert_eq!(position(&d), ("transaction-group-0.json".into(), txn1));
}

#[test]
fn step_out_returns_to_the_enclosing_frame() {
    let mut d = stepping_fixture();
    d.start();

    // Walk into the first logic-sig program.
    for _ in 0..3 {
        d.step_in(StepGranularity::Line);
    }
    assert_eq!(position(&d).0, "lsig.teal");

    // Leaving it rests on the transaction's next unit, the app call.
    assert_eq!(d.step_out(), StopReason::Step);
    let gs = &d.tree().group_sources[0];
    assert_eq!(position(&d), ("transaction-group-0.json".into(), gs.line_of("1/txn/txn/apid").unwrap()));
}
