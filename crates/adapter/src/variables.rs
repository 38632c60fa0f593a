//! Variable references and value rendering.
//!
//! Every stop rebuilds the registry: scope and container references are
//! handed out on demand while the client expands nodes, exactly as long as
//! the cursor stays put.

use avmdbg_backend::{AvmValue, ByteMap, ReconstructedState};
use dap::types::Variable;
use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha512_256};

/// What a variables-reference points at.
#[derive(Clone, Debug)]
pub enum VarNode {
    ExecutionScope,
    ChainScope,
    Stack,
    Scratch,
    App(u64),
    Global(u64),
    Local(u64),
    LocalAccount(u64, String),
    Boxes(u64),
    Bytes(Vec<u8>),
}

#[derive(Debug, Default)]
pub struct VariableRegistry {
    nodes: Vec<VarNode>,
}

impl VariableRegistry {
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// References are 1-based; 0 marks a leaf in the protocol.
    pub fn alloc(&mut self, node: VarNode) -> i64 {
        self.nodes.push(node);
        self.nodes.len() as i64
    }

    pub fn get(&self, reference: i64) -> Option<VarNode> {
        usize::try_from(reference)
            .ok()
            .and_then(|r| r.checked_sub(1))
            .and_then(|r| self.nodes.get(r))
            .cloned()
    }

    /// The children of `node`, rendered against `state`.
    pub fn expand(&mut self, node: &VarNode, state: &ReconstructedState) -> Vec<Variable> {
        match node {
            VarNode::ExecutionScope => vec![
                container("stack", self.alloc(VarNode::Stack), state.stack.len()),
                container("scratch", self.alloc(VarNode::Scratch), state.scratch.len()),
            ],
            VarNode::ChainScope => state
                .apps
                .keys()
                .map(|&app| container(&format!("app {app}"), self.alloc(VarNode::App(app)), 3))
                .collect(),
            VarNode::Stack => state
                .stack
                .iter()
                .enumerate()
                .map(|(i, value)| self.value_variable(i.to_string(), value))
                .collect(),
            VarNode::Scratch => state
                .scratch
                .iter()
                .map(|(slot, value)| self.value_variable(slot.to_string(), value))
                .collect(),
            VarNode::App(app) => vec![
                container("globalState", self.alloc(VarNode::Global(*app)), 0),
                container("localState", self.alloc(VarNode::Local(*app)), 0),
                container("boxState", self.alloc(VarNode::Boxes(*app)), 0),
            ],
            VarNode::Global(app) => match state.apps.get(app) {
                Some(app) => self.byte_map(&app.global),
                None => Vec::new(),
            },
            VarNode::Local(app) => match state.apps.get(app) {
                Some(a) => a
                    .local
                    .keys()
                    .map(|account| {
                        let reference = self.alloc(VarNode::LocalAccount(*app, account.clone()));
                        container(account, reference, 0)
                    })
                    .collect(),
                None => Vec::new(),
            },
            VarNode::LocalAccount(app, account) => {
                match state.apps.get(app).and_then(|a| a.local.get(account)) {
                    Some(map) => self.byte_map(map),
                    None => Vec::new(),
                }
            }
            VarNode::Boxes(app) => match state.apps.get(app) {
                Some(app) => self.byte_map(&app.boxes),
                None => Vec::new(),
            },
            VarNode::Bytes(bytes) => self.expand_bytes(bytes),
        }
    }

    fn byte_map(&mut self, map: &ByteMap) -> Vec<Variable> {
        map.iter().map(|(key, value)| self.value_variable(byte_label(key), value)).collect()
    }

    /// A leaf for uints; an expandable node for byte strings.
    pub fn value_variable(&mut self, name: String, value: &AvmValue) -> Variable {
        let reference = match value {
            AvmValue::Bytes(bytes) => self.alloc(VarNode::Bytes(bytes.clone())),
            AvmValue::Uint(_) => 0,
        };
        leaf(name, value.to_string(), reference)
    }

    /// Simultaneous renderings of a byte string, plus its indexed bytes.
    fn expand_bytes(&mut self, bytes: &[u8]) -> Vec<Variable> {
        let mut out = vec![
            leaf("hex".into(), hex::encode_prefixed(bytes), 0),
            leaf("base64".into(), base64_encode(bytes), 0),
        ];
        if !bytes.is_empty() && bytes.iter().all(|b| (0x20..=0x7e).contains(b)) {
            out.push(leaf("ascii".into(), String::from_utf8_lossy(bytes).into_owned(), 0));
        }
        if bytes.len() == 32 {
            out.push(leaf("address".into(), algorand_address(bytes), 0));
        }
        out.push(leaf("length".into(), bytes.len().to_string(), 0));
        out.extend(
            bytes.iter().enumerate().map(|(i, b)| leaf(i.to_string(), b.to_string(), 0)),
        );
        out
    }
}

fn leaf(name: String, value: String, variables_reference: i64) -> Variable {
    Variable {
        name,
        value,
        type_field: None,
        presentation_hint: None,
        evaluate_name: None,
        variables_reference,
        named_variables: None,
        indexed_variables: None,
        memory_reference: None,
    }
}

fn container(name: &str, reference: i64, named: usize) -> Variable {
    Variable {
        name: name.to_string(),
        value: String::new(),
        type_field: None,
        presentation_hint: None,
        evaluate_name: None,
        variables_reference: reference,
        named_variables: (named > 0).then_some(named as i64),
        indexed_variables: None,
        memory_reference: None,
    }
}

/// Byte keys print as text when fully printable, as hex otherwise.
pub fn byte_label(bytes: &[u8]) -> String {
    if !bytes.is_empty() && bytes.iter().all(|b| (0x20..=0x7e).contains(b)) {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        hex::encode_prefixed(bytes)
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(bytes)
}

/// The standard 58-character address rendering of a 32-byte public key:
/// base32 of the key followed by the last 4 bytes of its SHA-512/256.
fn algorand_address(key: &[u8]) -> String {
    let digest = Sha512_256::digest(key);
    let mut raw = Vec::with_capacity(36);
    raw.extend_from_slice(key);
    raw.extend_from_slice(&digest[28..]);
    BASE32_NOPAD.encode(&raw)
}
