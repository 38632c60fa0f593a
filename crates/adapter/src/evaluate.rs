//! The hover expression grammar: `stack[<signed index>]` and
//! `scratch[<slot>]`.
//!
//! Out-of-range and malformed expressions produce a textual result, never a
//! failed request.

use avmdbg_backend::{AvmValue, ReconstructedState};

/// A successfully resolved value, or the text to show instead.
pub enum EvalOutcome {
    Value(AvmValue),
    Message(String),
}

pub fn evaluate(expression: &str, state: &ReconstructedState) -> EvalOutcome {
    let expr = expression.trim();
    if let Some(index) = index_of(expr, "stack") {
        let Some(index) = index else {
            return EvalOutcome::Message(format!("unable to evaluate {expr:?}"));
        };
        let resolved = if index < 0 {
            state.stack.len().checked_sub(index.unsigned_abs() as usize)
        } else {
            Some(index as usize)
        };
        return match resolved.and_then(|i| state.stack.get(i)) {
            Some(value) => EvalOutcome::Value(value.clone()),
            None => EvalOutcome::Message(format!("{expr} out of range")),
        };
    }
    if let Some(slot) = index_of(expr, "scratch") {
        let value = slot
            .and_then(|s| u8::try_from(s).ok())
            .map(|s| state.scratch.get(&s).cloned().unwrap_or_default());
        return match value {
            Some(value) => EvalOutcome::Value(value),
            None => EvalOutcome::Message(format!("{expr} out of range")),
        };
    }
    EvalOutcome::Message(format!("unable to evaluate {expr:?}"))
}

/// Parses `<name>[<signed int>]`; the outer Option is whether the shape
/// matches, the inner whether the index is a number.
fn index_of(expr: &str, name: &str) -> Option<Option<i64>> {
    let inner = expr.strip_prefix(name)?.strip_prefix('[')?.strip_suffix(']')?;
    Some(inner.trim().parse().ok())
}
