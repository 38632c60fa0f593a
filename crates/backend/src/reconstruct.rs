//! Rebuilds the visible machine state at a cursor position.
//!
//! No per-event snapshots are kept: state is replayed forward from frame
//! entry, so the result is a pure function of the tree and the cursor. The
//! event under the cursor is exclusive: a stop shows the state before the
//! highlighted instruction runs.

use std::collections::BTreeMap;

use crate::{
    artifact::trace::{AvmValue, OpcodeEvent, StateDelta},
    cursor::Cursor,
    tree::{ExecTree, Frame, FrameEvent, FrameId},
};

/// Byte-keyed application state; keys compare by content.
pub type ByteMap = BTreeMap<Vec<u8>, AvmValue>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppState {
    pub global: ByteMap,
    /// Local key/value state, per participating account address.
    pub local: BTreeMap<String, ByteMap>,
    pub boxes: ByteMap,
}

/// The projection shown to the client at a stop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconstructedState {
    /// The deepest program frame's evaluation stack, bottom first.
    pub stack: Vec<AvmValue>,
    /// Scratch slots; zero values are not materialized.
    pub scratch: BTreeMap<u8, AvmValue>,
    /// Application state visible at the cursor, per application id.
    pub apps: BTreeMap<u64, AppState>,
}

pub fn reconstruct(tree: &ExecTree, cursor: &Cursor) -> ReconstructedState {
    let mut state = ReconstructedState::default();
    let path = cursor.path();
    // Groups execute in sequence; earlier groups' state effects are visible.
    if let Some(&(root, _)) = path.first() {
        for &r in tree.roots.iter().take_while(|&&r| r != root) {
            apply_subtree(tree, r, &mut state);
        }
    }
    for (depth, &(frame_id, index)) in path.iter().enumerate() {
        let frame = tree.frame(frame_id);
        let track = depth == path.len() - 1 && frame.is_program();
        for event in &frame.events[..index] {
            apply_event(tree, frame, event, &mut state, track);
        }
    }
    state
}

/// Applies one event in full: for enter-events and spawned inner groups
/// this folds in the whole subtree's application-state effects.
fn apply_event(
    tree: &ExecTree,
    frame: &Frame,
    event: &FrameEvent,
    state: &mut ReconstructedState,
    track: bool,
) {
    match event {
        FrameEvent::Enter(child) => apply_subtree(tree, *child, state),
        FrameEvent::Op { event, inner } => {
            if let Some(inner) = inner {
                apply_subtree(tree, *inner, state);
            }
            apply_op(frame, event, state, track);
        }
    }
}

fn apply_subtree(tree: &ExecTree, frame_id: FrameId, state: &mut ReconstructedState) {
    let frame = tree.frame(frame_id);
    for event in &frame.events {
        apply_event(tree, frame, event, state, false);
    }
}

fn apply_op(frame: &Frame, event: &OpcodeEvent, state: &mut ReconstructedState, track: bool) {
    if track {
        let pops = (event.stack_pop_count as usize).min(state.stack.len());
        state.stack.truncate(state.stack.len() - pops);
        state.stack.extend(event.stack_additions.iter().cloned());
        for change in &event.scratch_changes {
            if change.new_value.is_zero() {
                state.scratch.remove(&change.slot);
            } else {
                state.scratch.insert(change.slot, change.new_value.clone());
            }
        }
    }

    if event.state_changes.is_empty() {
        return;
    }
    let Some(app_id) = frame.app_id else {
        debug!(frame = frame.id, "state changes outside an app call, ignored");
        return;
    };
    let app = state.apps.entry(app_id).or_default();
    for delta in &event.state_changes {
        match delta {
            StateDelta::GlobalWrite { key, value } => {
                app.global.insert(key.clone(), value.clone());
            }
            StateDelta::GlobalDelete { key } => {
                app.global.remove(key);
            }
            StateDelta::LocalWrite { account, key, value } => {
                app.local.entry(account.clone()).or_default().insert(key.clone(), value.clone());
            }
            StateDelta::LocalDelete { account, key } => {
                if let Some(map) = app.local.get_mut(account) {
                    map.remove(key);
                }
            }
            StateDelta::BoxWrite { key, value } => {
                app.boxes.insert(key.clone(), value.clone());
            }
            StateDelta::BoxDelete { key } => {
                app.boxes.remove(key);
            }
        }
    }
}
