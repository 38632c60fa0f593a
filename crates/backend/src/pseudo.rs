//! Synthetic JSON sources for transaction-level frames.
//!
//! Group and transaction frames have no TEAL behind them; the client is
//! instead shown `transaction-group-N.json`, a pretty-printed rendering of
//! the group's transaction results. The renderer records the line on which
//! every JSON node starts, keyed by its path, so frames can point at the
//! currently-executing transaction's field.

use std::collections::HashMap;

use serde_json::Value;

const INDENT: &str = "  ";

/// The pseudo-source of one top-level transaction group.
#[derive(Clone, Debug)]
pub struct GroupSource {
    pub name: String,
    pub content: String,
    // JSON path ("0/inner-txns/1/...") -> 0-based line of the node.
    lines: HashMap<String, u32>,
}

impl GroupSource {
    /// Renders the group's transaction-result bodies as a JSON array.
    pub fn new(group_index: usize, txns: Vec<Value>) -> Self {
        let mut renderer = Renderer::default();
        renderer.value(&Value::Array(txns), 0, &mut String::new());
        renderer.out.push('\n');
        Self {
            name: format!("transaction-group-{group_index}.json"),
            content: renderer.out,
            lines: renderer.lines,
        }
    }

    /// The 0-based line on which the node at `path` starts.
    pub fn line_of(&self, path: &str) -> Option<u32> {
        self.lines.get(path).copied()
    }

    /// The first of `paths` that names an existing node.
    pub fn line_of_first(&self, paths: &[String]) -> Option<u32> {
        paths.iter().find_map(|p| self.line_of(p))
    }
}

#[derive(Default)]
struct Renderer {
    out: String,
    line: u32,
    lines: HashMap<String, u32>,
}

impl Renderer {
    fn newline(&mut self, depth: usize) {
        self.out.push('\n');
        self.line += 1;
        for _ in 0..depth {
            self.out.push_str(INDENT);
        }
    }

    fn value(&mut self, value: &Value, depth: usize, path: &mut String) {
        self.lines.insert(path.clone(), self.line);
        match value {
            Value::Array(items) if !items.is_empty() => {
                self.out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.out.push(',');
                    }
                    self.newline(depth + 1);
                    let len = push_segment(path, &i.to_string());
                    self.value(item, depth + 1, path);
                    path.truncate(len);
                }
                self.newline(depth);
                self.out.push(']');
            }
            Value::Object(members) if !members.is_empty() => {
                self.out.push('{');
                let mut first = true;
                for (key, member) in members {
                    if !first {
                        self.out.push(',');
                    }
                    first = false;
                    self.newline(depth + 1);
                    self.out.push_str(&format!("{}: ", Value::String(key.clone())));
                    let len = push_segment(path, key);
                    self.value(member, depth + 1, path);
                    path.truncate(len);
                }
                self.newline(depth);
                self.out.push('}');
            }
            // Empty containers and scalars render inline.
            other => self.out.push_str(&other.to_string()),
        }
    }
}

/// Appends `/segment` (or just `segment` at the root) and returns the
/// previous length for truncation.
fn push_segment(path: &mut String, segment: &str) -> usize {
    let len = path.len();
    if !path.is_empty() {
        path.push('/');
    }
    path.push_str(segment);
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_node_lines() {
        let txns = vec![
            json!({"txn": {"txn": {"type": "pay"}}}),
            json!({"inner-txns": [{"txn": {"txn": {"type": "appl"}}}], "txn": {"txn": {"apid": 7, "type": "appl"}}}),
        ];
        let source = GroupSource::new(0, txns);

        assert_eq!(source.name, "transaction-group-0.json");
        // The first transaction object opens on the second line.
        assert_eq!(source.line_of("0"), Some(1));
        assert_eq!(source.line_of(""), Some(0));

        // Every recorded line actually holds the node's first character.
        let lines: Vec<&str> = source.content.lines().collect();
        let txn1 = source.line_of("1").unwrap() as usize;
        assert!(lines[txn1].trim_start().starts_with('{'));
        let apid = source.line_of("1/txn/txn/apid").unwrap() as usize;
        assert!(lines[apid].contains("\"apid\": 7"));
        let inner = source.line_of("1/inner-txns/0").unwrap() as usize;
        assert!(lines[inner].trim_start().starts_with('{'));

        // Paths that do not exist resolve through the fallback list.
        assert_eq!(
            source.line_of_first(&["1/txn/lsig".into(), "1".into()]),
            source.line_of("1"),
        );
    }

    #[test]
    fn content_is_valid_json() {
        let txns = vec![json!({"a": [], "b": {}, "c": null, "d": "x\"y"})];
        let source = GroupSource::new(3, txns);
        let parsed: Value = serde_json::from_str(&source.content).unwrap();
        assert_eq!(parsed[0]["d"], json!("x\"y"));
        assert_eq!(source.name, "transaction-group-3.json");
    }
}
