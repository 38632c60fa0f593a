//! The stepping cursor: a root-to-leaf position in the execution tree and
//! the pre-order walk over it, plus the breakpoint store.

use std::collections::HashMap;

use crate::{
    sourcemap::{FileId, SourceIndex, SourceLoc},
    tree::{ExecTree, FrameId, FrameKind},
};

/// A position in the execution tree: the frames on the path from a root to
/// the current frame, each paired with the active event index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    path: Vec<(FrameId, usize)>,
}

impl Cursor {
    fn at_start(root: FrameId) -> Self {
        Self { path: vec![(root, 0)] }
    }

    pub fn path(&self) -> &[(FrameId, usize)] {
        &self.path
    }

    /// The deepest (frame, event) pair.
    pub fn top(&self) -> (FrameId, usize) {
        *self.path.last().expect("cursor path is never empty")
    }

    pub fn frame(&self) -> FrameId {
        self.top().0
    }
}

/// Why the cursor came to rest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Entry,
    Step,
    Breakpoint { ids: Vec<i64> },
    /// The trace ends in a recorded failure.
    Exception { message: String },
    /// The trace is exhausted.
    Terminated,
}

impl ExecTree {
    /// The very first position of the trace, if it has any events.
    pub fn first_position(&self) -> Option<Cursor> {
        self.roots
            .iter()
            .find(|&&r| !self.frame(r).events.is_empty())
            .map(|&r| Cursor::at_start(r))
    }

    /// The next position in pre-order: descend one level into the current
    /// event's child, else advance within the frame, else climb out.
    pub fn next(&self, cursor: &Cursor) -> Option<Cursor> {
        let (frame, index) = cursor.top();
        if let Some(child) = self.event(frame, index).child() {
            if !self.frame(child).events.is_empty() {
                let mut path = cursor.path.clone();
                path.push((child, 0));
                return Some(Cursor { path });
            }
        }
        self.position_after(cursor.path.clone(), cursor.path[0].0)
    }

    /// The next position at transaction level: descends into transaction
    /// frames like `next`, but skips program runs and spawned inner groups
    /// entirely.
    pub fn next_over(&self, cursor: &Cursor) -> Option<Cursor> {
        let (frame, index) = cursor.top();
        if let Some(child) = self.event(frame, index).child() {
            let child = self.frame(child);
            if child.kind == FrameKind::Transaction && !child.events.is_empty() {
                let mut path = cursor.path.clone();
                path.push((child.id, 0));
                return Some(Cursor { path });
            }
        }
        self.position_after(cursor.path.clone(), cursor.path[0].0)
    }

    /// The first position after leaving the current frame.
    pub fn next_out(&self, cursor: &Cursor) -> Option<Cursor> {
        let mut path = cursor.path.clone();
        let root = path[0].0;
        path.pop();
        if path.is_empty() {
            return self.next_root(root).map(Cursor::at_start);
        }
        self.position_after(path, root)
    }

    /// The previous position in pre-order: the deepest last descendant of
    /// the preceding event, else the parent position.
    pub fn prev(&self, cursor: &Cursor) -> Option<Cursor> {
        let mut path = cursor.path.clone();
        let (frame, index) = *path.last().unwrap();
        if index > 0 {
            *path.last_mut().unwrap() = (frame, index - 1);
            self.descend_last(&mut path);
            return Some(Cursor { path });
        }
        path.pop();
        if !path.is_empty() {
            return Some(Cursor { path });
        }
        let prev = self.prev_root(cursor.path[0].0)?;
        let mut path = vec![(prev, self.frame(prev).events.len() - 1)];
        self.descend_last(&mut path);
        Some(Cursor { path })
    }

    /// The mirror of `next_over`: the previous transaction-level position,
    /// skipping program runs and spawned inner groups.
    pub fn prev_over(&self, cursor: &Cursor) -> Option<Cursor> {
        let mut path = cursor.path.clone();
        let (frame, index) = *path.last().unwrap();
        if index > 0 {
            *path.last_mut().unwrap() = (frame, index - 1);
            self.descend_last_txn(&mut path);
            return Some(Cursor { path });
        }
        path.pop();
        if !path.is_empty() {
            return Some(Cursor { path });
        }
        let prev = self.prev_root(cursor.path[0].0)?;
        let mut path = vec![(prev, self.frame(prev).events.len() - 1)];
        self.descend_last_txn(&mut path);
        Some(Cursor { path })
    }

    /// The parent position: the event that entered the current frame.
    pub fn prev_out(&self, cursor: &Cursor) -> Option<Cursor> {
        let mut path = cursor.path.clone();
        path.pop();
        if path.is_empty() {
            let prev = self.prev_root(cursor.path[0].0)?;
            return Some(Cursor::at_start(prev));
        }
        Some(Cursor { path })
    }

    fn position_after(&self, mut path: Vec<(FrameId, usize)>, root: FrameId) -> Option<Cursor> {
        loop {
            let (frame, index) = *path.last().unwrap();
            if index + 1 < self.frame(frame).events.len() {
                *path.last_mut().unwrap() = (frame, index + 1);
                return Some(Cursor { path });
            }
            path.pop();
            if path.is_empty() {
                return self.next_root(root).map(Cursor::at_start);
            }
        }
    }

    /// Descends through transaction frames only, to their last event.
    fn descend_last_txn(&self, path: &mut Vec<(FrameId, usize)>) {
        loop {
            let (frame, index) = *path.last().unwrap();
            match self.event(frame, index).child() {
                Some(child)
                    if self.frame(child).kind == FrameKind::Transaction
                        && !self.frame(child).events.is_empty() =>
                {
                    path.push((child, self.frame(child).events.len() - 1));
                }
                _ => return,
            }
        }
    }

    fn descend_last(&self, path: &mut Vec<(FrameId, usize)>) {
        loop {
            let (frame, index) = *path.last().unwrap();
            match self.event(frame, index).child() {
                Some(child) if !self.frame(child).events.is_empty() => {
                    path.push((child, self.frame(child).events.len() - 1));
                }
                _ => return,
            }
        }
    }

    fn next_root(&self, root: FrameId) -> Option<FrameId> {
        self.roots
            .iter()
            .skip_while(|&&r| r != root)
            .skip(1)
            .find(|&&r| !self.frame(r).events.is_empty())
            .copied()
    }

    fn prev_root(&self, root: FrameId) -> Option<FrameId> {
        self.roots
            .iter()
            .take_while(|&&r| r != root)
            .filter(|&&r| !self.frame(r).events.is_empty())
            .last()
            .copied()
    }
}

/// A breakpoint as set (and possibly verified) for one file.
#[derive(Clone, Debug)]
pub struct SetBreakpoint {
    pub id: i64,
    pub verified: bool,
    /// Resolved position when verified, the requested one otherwise.
    pub line: u32,
    pub column: u32,
}

/// Verified breakpoints, keyed by source file.
#[derive(Clone, Debug, Default)]
pub struct BreakpointStore {
    next_id: i64,
    by_file: HashMap<FileId, Vec<SetBreakpoint>>,
}

impl BreakpointStore {
    /// Replaces the breakpoints of one file. A request is verified iff the
    /// index has a mapping on the requested line at or after the requested
    /// column; the stored position is the resolved one.
    pub fn set_file(
        &mut self,
        file: Option<FileId>,
        requests: &[(u32, Option<u32>)],
        index: &SourceIndex,
    ) -> Vec<SetBreakpoint> {
        let set: Vec<SetBreakpoint> = requests
            .iter()
            .map(|&(line, column)| {
                self.next_id += 1;
                let resolved = file.and_then(|f| index.resolve(f, line, column));
                SetBreakpoint {
                    id: self.next_id,
                    verified: resolved.is_some(),
                    line: resolved.map_or(line, |(l, _)| l),
                    column: resolved.map_or(column.unwrap_or(0), |(_, c)| c),
                }
            })
            .collect();
        if let Some(file) = file {
            self.by_file.insert(file, set.clone());
        }
        set
    }

    /// Ids of the verified breakpoints matching this exact position.
    pub fn matches(&self, loc: &SourceLoc) -> Vec<i64> {
        self.by_file
            .get(&loc.file)
            .into_iter()
            .flatten()
            .filter(|bp| bp.verified && bp.line == loc.line && bp.column == loc.column)
            .map(|bp| bp.id)
            .collect()
    }
}
