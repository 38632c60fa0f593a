//! Typed model of the node's simulate response.
//!
//! Only the fields the replay engine consumes are modeled; the raw
//! transaction bodies stay as [`serde_json::Value`] because they are
//! presented to the client verbatim (see the pseudo-source rendering).

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};

/// A value on the AVM stack, in a scratch slot, or in application state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AvmValue {
    Uint(u64),
    Bytes(Vec<u8>),
}

impl Default for AvmValue {
    fn default() -> Self {
        Self::Uint(0)
    }
}

impl AvmValue {
    /// Zero values are not materialized in scratch space or state maps.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Uint(n) => *n == 0,
            Self::Bytes(b) => b.is_empty(),
        }
    }
}

impl fmt::Display for AvmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(n) => write!(f, "{n}"),
            Self::Bytes(b) => write!(f, "{}", hex::encode_prefixed(b)),
        }
    }
}

// The wire encoding tags values with `type`: 1 = bytes, 2 = uint64.
const AVM_TYPE_BYTES: u64 = 1;
const AVM_TYPE_UINT: u64 = 2;

impl<'de> Deserialize<'de> for AvmValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type", deserialize_with = "u64_or_string")]
            kind: u64,
            #[serde(default, deserialize_with = "opt_u64_or_string")]
            uint: Option<u64>,
            #[serde(default)]
            bytes: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        match raw.kind {
            AVM_TYPE_BYTES => {
                let encoded = raw.bytes.unwrap_or_default();
                let bytes = BASE64
                    .decode(&encoded)
                    .map_err(|e| de::Error::custom(format!("invalid base64 value: {e}")))?;
                Ok(Self::Bytes(bytes))
            }
            AVM_TYPE_UINT => Ok(Self::Uint(raw.uint.unwrap_or(0))),
            other => Err(de::Error::custom(format!("unknown avm value type {other}"))),
        }
    }
}

/// Accepts a u64 encoded either as a JSON number or as a decimal string.
/// The node stringifies integers that exceed 2^53.
pub(crate) fn u64_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    struct U64Visitor;

    impl Visitor<'_> for U64Visitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a u64 or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom("negative integer"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.parse().map_err(|_| E::custom(format!("invalid u64 string {v:?}")))
        }
    }

    deserializer.deserialize_any(U64Visitor)
}

pub(crate) fn opt_u64_or_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "u64_or_string")] u64);

    Option::<Wrap>::deserialize(deserializer).map(|w| w.map(|Wrap(n)| n))
}

fn base64_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64.decode(&encoded).map_err(|e| de::Error::custom(format!("invalid base64: {e}")))
}

/// SHA-512/256 digest identifying an executed program.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHash(pub [u8; 32]);

impl fmt::Display for ProgramHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(self.0))
    }
}

impl fmt::Debug for ProgramHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramHash({self})")
    }
}

impl<'de> Deserialize<'de> for ProgramHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = base64_bytes(deserializer)?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| de::Error::custom(format!("program hash is {} bytes", b.len())))?;
        Ok(Self(hash))
    }
}

/// A write to one of the 256 scratch slots.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScratchChange {
    pub slot: u8,
    pub new_value: AvmValue,
}

/// An incremental application-state mutation recorded with an opcode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateDelta {
    GlobalWrite { key: Vec<u8>, value: AvmValue },
    GlobalDelete { key: Vec<u8> },
    LocalWrite { account: String, key: Vec<u8>, value: AvmValue },
    LocalDelete { account: String, key: Vec<u8> },
    BoxWrite { key: Vec<u8>, value: AvmValue },
    BoxDelete { key: Vec<u8> },
}

impl<'de> Deserialize<'de> for StateDelta {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "kebab-case")]
        struct Raw {
            app_state_type: String,
            operation: String,
            #[serde(deserialize_with = "base64_bytes")]
            key: Vec<u8>,
            #[serde(default)]
            new_value: Option<AvmValue>,
            #[serde(default)]
            account: Option<String>,
        }

        let Raw { app_state_type, operation, key, new_value, account } = Raw::deserialize(deserializer)?;
        let value = new_value.unwrap_or_default();
        let account = account
            .ok_or_else(|| de::Error::custom("local state change without an account"));
        match (app_state_type.as_str(), operation.as_str()) {
            ("g", "w") => Ok(Self::GlobalWrite { key, value }),
            ("g", "d") => Ok(Self::GlobalDelete { key }),
            ("l", "w") => Ok(Self::LocalWrite { account: account?, key, value }),
            ("l", "d") => Ok(Self::LocalDelete { account: account?, key }),
            ("b", "w") => Ok(Self::BoxWrite { key, value }),
            ("b", "d") => Ok(Self::BoxDelete { key }),
            (t, o) => {
                Err(de::Error::custom(format!("unknown state change kind {t:?}/{o:?}")))
            }
        }
    }
}

/// One executed VM instruction.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpcodeEvent {
    #[serde(deserialize_with = "u64_or_string")]
    pub pc: u64,
    #[serde(default)]
    pub stack_pop_count: u64,
    #[serde(default)]
    pub stack_additions: Vec<AvmValue>,
    #[serde(default)]
    pub scratch_changes: Vec<ScratchChange>,
    #[serde(default)]
    pub state_changes: Vec<StateDelta>,
    /// Indexes into the enclosing trace's `inner-trace` for transactions
    /// spawned while this opcode executed.
    #[serde(default)]
    pub spawned_inners: Vec<usize>,
}

/// The opcode-level trace of one transaction, including nested inner traces.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecTrace {
    #[serde(default)]
    pub approval_program_trace: Vec<OpcodeEvent>,
    #[serde(default)]
    pub approval_program_hash: Option<ProgramHash>,
    #[serde(default)]
    pub clear_state_program_trace: Vec<OpcodeEvent>,
    #[serde(default)]
    pub clear_state_program_hash: Option<ProgramHash>,
    #[serde(default)]
    pub logic_sig_trace: Vec<OpcodeEvent>,
    #[serde(default)]
    pub logic_sig_hash: Option<ProgramHash>,
    #[serde(default)]
    pub inner_trace: Vec<ExecTrace>,
}

impl ExecTrace {
    /// The application-program trace: approval, or clear-state for close-out
    /// executions. A transaction has at most one of the two.
    pub fn app_trace(&self) -> Option<(ProgramHash, &[OpcodeEvent])> {
        if !self.approval_program_trace.is_empty() || self.approval_program_hash.is_some() {
            self.approval_program_hash.map(|h| (h, &self.approval_program_trace[..]))
        } else {
            self.clear_state_program_hash.map(|h| (h, &self.clear_state_program_trace[..]))
        }
    }

    pub fn logic_sig(&self) -> Option<(ProgramHash, &[OpcodeEvent])> {
        self.logic_sig_hash.map(|h| (h, &self.logic_sig_trace[..]))
    }
}

/// One transaction result within a group.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TxnResult {
    /// The raw pending-transaction response body (signed txn, logs,
    /// application-index, inner-txns).
    #[serde(default)]
    pub txn_result: serde_json::Value,
    #[serde(default)]
    pub exec_trace: Option<ExecTrace>,
}

impl TxnResult {
    /// The transaction type code (`pay`, `appl`, ...), if present.
    pub fn txn_type(&self) -> Option<&str> {
        self.txn_result.pointer("/txn/txn/type").and_then(|v| v.as_str())
    }

    /// The application id this transaction calls, or the one it created.
    pub fn app_id(&self) -> Option<u64> {
        self.txn_result
            .pointer("/txn/txn/apid")
            .or_else(|| self.txn_result.pointer("/application-index"))
            .and_then(|v| v.as_u64())
    }

    /// The raw body of the `index`-th inner transaction, if recorded.
    pub fn inner_txn(&self, index: usize) -> Option<&serde_json::Value> {
        self.txn_result.pointer(&format!("/inner-txns/{index}"))
    }
}

/// One atomic transaction group of the simulation.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TxnGroup {
    pub txn_results: Vec<TxnResult>,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub failed_at: Option<Vec<u64>>,
}

/// The top-level simulate response.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimulateResponse {
    pub txn_groups: Vec<TxnGroup>,
    #[serde(default, deserialize_with = "opt_u64_or_string")]
    pub version: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64_or_string")]
    pub last_round: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avm_value_decoding() {
        let uint: AvmValue = serde_json::from_str(r#"{"type":2,"uint":7}"#).unwrap();
        assert_eq!(uint, AvmValue::Uint(7));

        // Values past 2^53 arrive as strings.
        let big: AvmValue =
            serde_json::from_str(r#"{"type":2,"uint":"18446744073709551615"}"#).unwrap();
        assert_eq!(big, AvmValue::Uint(u64::MAX));

        let bytes: AvmValue = serde_json::from_str(r#"{"type":1,"bytes":"MSE="}"#).unwrap();
        assert_eq!(bytes, AvmValue::Bytes(b"1!".to_vec()));

        // An all-defaults uint is zero.
        let zero: AvmValue = serde_json::from_str(r#"{"type":2}"#).unwrap();
        assert!(zero.is_zero());
    }

    #[test]
    fn state_delta_decoding() {
        let delta: StateDelta = serde_json::from_str(
            r#"{"app-state-type":"g","operation":"w","key":"a2V5","new-value":{"type":2,"uint":3}}"#,
        )
        .unwrap();
        assert_eq!(delta, StateDelta::GlobalWrite { key: b"key".to_vec(), value: AvmValue::Uint(3) });

        let delta: StateDelta = serde_json::from_str(
            r#"{"app-state-type":"l","operation":"d","key":"a2V5","account":"AAAA"}"#,
        )
        .unwrap();
        assert_eq!(delta, StateDelta::LocalDelete { account: "AAAA".into(), key: b"key".to_vec() });

        let err = serde_json::from_str::<StateDelta>(
            r#"{"app-state-type":"l","operation":"w","key":"a2V5"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn opcode_event_defaults() {
        let event: OpcodeEvent = serde_json::from_str(r#"{"pc":12}"#).unwrap();
        assert_eq!(event.pc, 12);
        assert_eq!(event.stack_pop_count, 0);
        assert!(event.stack_additions.is_empty());
        assert!(event.spawned_inners.is_empty());
    }
}
