//! Shared fixture builders: in-memory trace files with hand-assembled
//! source maps.

#![allow(dead_code)]

use avmdbg_backend::{
    Debugger, Location, MemoryFileReader, ReplayError, Result, TraceAssets,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};

pub const RESPONSE_PATH: &str = "/sim/simulate-response.json";
pub const SOURCES_PATH: &str = "/sim/sources.json";

/// Base64 VLQ encoding, the counterpart of the decoder under test.
pub fn vlq(fields: &[i64]) -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::new();
    for &field in fields {
        let mut value =
            if field < 0 { ((-field as u64) << 1) | 1 } else { (field as u64) << 1 };
        loop {
            let mut digit = (value & 0x1f) as usize;
            value >>= 5;
            if value != 0 {
                digit |= 0x20;
            }
            out.push(CHARS[digit] as char);
            if value == 0 {
                break;
            }
        }
    }
    out
}

/// A mappings string where pc `i` maps to `lines[i]` at column 0.
pub fn mappings(lines: &[Option<u32>]) -> String {
    let mut groups = Vec::new();
    let mut prev_line = 0i64;
    for entry in lines {
        match entry {
            None => groups.push(String::new()),
            Some(line) => {
                let delta = i64::from(*line) - prev_line;
                groups.push(vlq(&[0, 0, delta, 0]));
                prev_line = i64::from(*line);
            }
        }
    }
    groups.join(";")
}

pub fn hash_b64(tag: u8) -> String {
    BASE64.encode([tag; 32])
}

/// One descriptor entry with an embedded source map.
pub fn source_entry(tag: u8, filename: &str, lines: &[Option<u32>]) -> Value {
    json!({
        "hash": hash_b64(tag),
        "filename": filename,
        "source-map": {
            "version": 3,
            "sources": [filename],
            "mappings": mappings(lines),
        },
    })
}

pub fn avm_uint(value: u64) -> Value {
    json!({ "type": 2, "uint": value })
}

pub fn avm_bytes(bytes: &[u8]) -> Value {
    json!({ "type": 1, "bytes": BASE64.encode(bytes) })
}

/// An opcode event. `pops`/`pushes` shape the stack; extras are merged in.
pub fn op(pc: u64) -> Value {
    json!({ "pc": pc })
}

pub fn op_stack(pc: u64, pops: u64, pushes: Vec<Value>) -> Value {
    json!({ "pc": pc, "stack-pop-count": pops, "stack-additions": pushes })
}

pub fn op_scratch(pc: u64, pops: u64, slot: u8, value: Value) -> Value {
    json!({
        "pc": pc,
        "stack-pop-count": pops,
        "scratch-changes": [{ "slot": slot, "new-value": value }],
    })
}

pub fn global_write(key: &[u8], value: Value) -> Value {
    json!({ "app-state-type": "g", "operation": "w", "key": BASE64.encode(key), "new-value": value })
}

pub fn local_write(account: &str, key: &[u8], value: Value) -> Value {
    json!({
        "app-state-type": "l",
        "operation": "w",
        "key": BASE64.encode(key),
        "new-value": value,
        "account": account,
    })
}

/// Loads a fixture built from a simulate response, a sources descriptor
/// and the named TEAL files.
pub fn load(response: Value, sources: Value, teal: &[(&str, &str)]) -> Result<TraceAssets> {
    let mut reader = MemoryFileReader::default();
    reader.insert(RESPONSE_PATH, response.to_string());
    reader.insert(SOURCES_PATH, sources.to_string());
    for (name, text) in teal {
        reader.insert(format!("/sim/{name}"), *text);
    }
    TraceAssets::load(&reader, RESPONSE_PATH.as_ref(), SOURCES_PATH.as_ref())
}

pub fn debugger(response: Value, sources: Value, teal: &[(&str, &str)]) -> Debugger {
    Debugger::new(load(response, sources, teal).expect("fixture loads")).expect("tree builds")
}

/// (source name, 0-based line) of the debugger's current position.
pub fn position(debugger: &Debugger) -> (String, u32) {
    match debugger.location().expect("cursor has a location") {
        Location::Source(loc) => {
            let path = debugger.assets().files.path(loc.file);
            (path.file_name().unwrap().to_string_lossy().into_owned(), loc.line)
        }
        Location::Pseudo { group, line } => {
            (debugger.tree().group_sources[group].name.clone(), line)
        }
    }
}

/// A TEAL text of `total` lines where each mapped line holds `op`.
pub fn teal_text(total: usize, ops: &[(u32, &str)]) -> String {
    let mut lines = vec!["// filler".to_string(); total];
    if total > 0 {
        lines[0] = "#pragma version 8".to_string();
    }
    for &(line, op) in ops {
        lines[line as usize] = op.to_string();
    }
    lines.join("\n")
}

pub fn bad_trace(err: ReplayError) -> bool {
    matches!(err, ReplayError::BadTrace(_))
}
