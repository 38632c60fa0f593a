//! The session-facing debugger: owns the assets, indexes, cursor and
//! breakpoints, and exposes the stepping operations.

use std::path::Path;

use crate::{
    artifact::TraceAssets,
    cursor::{BreakpointStore, Cursor, SetBreakpoint, StopReason},
    error::Result,
    reconstruct::{reconstruct, ReconstructedState},
    sourcemap::SourceIndex,
    tree::{ExecTree, FrameEvent, FrameId, Location},
};

/// How far a single step request travels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StepGranularity {
    /// One opcode event.
    Instruction,
    /// Keep stepping while the mapped line is unchanged within the frame.
    #[default]
    Line,
}

pub struct Debugger {
    assets: TraceAssets,
    index: SourceIndex,
    tree: ExecTree,
    cursor: Option<Cursor>,
    breakpoints: BreakpointStore,
    finished: bool,
}

impl Debugger {
    pub fn new(assets: TraceAssets) -> Result<Self> {
        let mut index = SourceIndex::default();
        for source in assets.programs() {
            index.add_program(&source.map);
        }
        let tree = ExecTree::build(&assets)?;
        Ok(Self {
            assets,
            index,
            tree,
            cursor: None,
            breakpoints: BreakpointStore::default(),
            finished: false,
        })
    }

    pub fn assets(&self) -> &TraceAssets {
        &self.assets
    }

    pub fn index(&self) -> &SourceIndex {
        &self.index
    }

    pub fn tree(&self) -> &ExecTree {
        &self.tree
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Moves the cursor to the first event of the trace.
    pub fn start(&mut self) -> StopReason {
        match self.tree.first_position() {
            Some(cursor) => {
                self.cursor = Some(cursor);
                StopReason::Entry
            }
            None => self.end_reason(),
        }
    }

    /// The location of the current position.
    pub fn location(&self) -> Option<Location> {
        self.cursor.as_ref().and_then(|c| self.location_at(c))
    }

    /// The reconstructed machine state at the current position.
    pub fn state(&self) -> ReconstructedState {
        match &self.cursor {
            Some(cursor) => reconstruct(&self.tree, cursor),
            None => ReconstructedState::default(),
        }
    }

    pub fn step_in(&mut self, granularity: StepGranularity) -> StopReason {
        self.step_forward(ExecTree::next, granularity)
    }

    pub fn step_over(&mut self, granularity: StepGranularity) -> StopReason {
        self.step_forward(ExecTree::next_over, granularity)
    }

    pub fn step_out(&mut self) -> StopReason {
        self.step_forward(ExecTree::next_out, StepGranularity::Instruction)
    }

    /// The mirror of `step_in`: the previous pre-order position.
    pub fn step_back(&mut self, granularity: StepGranularity) -> StopReason {
        self.step_backward(ExecTree::prev, granularity)
    }

    pub fn step_back_over(&mut self, granularity: StepGranularity) -> StopReason {
        self.step_backward(ExecTree::prev_over, granularity)
    }

    pub fn step_back_out(&mut self) -> StopReason {
        self.step_backward(ExecTree::prev_out, StepGranularity::Instruction)
    }

    /// Runs forward until a verified breakpoint matches, or the trace ends.
    pub fn continue_forward(&mut self) -> StopReason {
        let Some(mut cursor) = self.cursor.clone() else { return StopReason::Terminated };
        loop {
            match self.tree.next(&cursor) {
                None => {
                    self.cursor = Some(cursor);
                    return self.end_reason();
                }
                Some(next) => {
                    cursor = next;
                    if let Some(ids) = self.breakpoint_hit(&cursor) {
                        self.cursor = Some(cursor);
                        return StopReason::Breakpoint { ids };
                    }
                }
            }
        }
    }

    /// Runs backward to the most recent breakpoint strictly before the
    /// cursor; rests at the entry position when there is none.
    pub fn continue_backward(&mut self) -> StopReason {
        let Some(mut cursor) = self.cursor.clone() else { return StopReason::Terminated };
        loop {
            match self.tree.prev(&cursor) {
                None => {
                    self.cursor = Some(cursor);
                    return StopReason::Entry;
                }
                Some(prev) => {
                    cursor = prev;
                    if let Some(ids) = self.breakpoint_hit(&cursor) {
                        self.cursor = Some(cursor);
                        return StopReason::Breakpoint { ids };
                    }
                }
            }
        }
    }

    /// Replaces the breakpoints of `path`, resolving each against the
    /// source index.
    pub fn set_breakpoints(
        &mut self,
        path: &Path,
        requests: &[(u32, Option<u32>)],
    ) -> Vec<SetBreakpoint> {
        let file = self.assets.files.id(path);
        self.breakpoints.set_file(file, requests, &self.index)
    }

    /// Labels for the step-in targets reachable from the current event:
    /// the opcode about to execute, and the child execution it enters.
    pub fn step_in_targets(&self) -> Vec<String> {
        let Some(cursor) = &self.cursor else { return Vec::new() };
        let (frame, index) = cursor.top();
        let mut targets = Vec::new();
        if let Some(op) = self.opcode_name(frame, index) {
            targets.push(op);
        }
        if let Some(child) = self.tree.event(frame, index).child() {
            let child = self.tree.frame(child);
            let label = match child.events.first().and_then(|_| self.opcode_name(child.id, 0)) {
                Some(op) => op,
                None => child.name.clone(),
            };
            targets.push(label);
        }
        targets
    }

    /// The first token of the source line the event maps to.
    fn opcode_name(&self, frame: FrameId, index: usize) -> Option<String> {
        let FrameEvent::Op { .. } = self.tree.event(frame, index) else { return None };
        let hash = self.tree.frame(frame).program.as_ref()?;
        let source = self.assets.source(hash)?;
        let loc = match self.tree.event_location(&self.assets, frame, index)? {
            Location::Source(loc) => loc,
            Location::Pseudo { .. } => return None,
        };
        let line = source.text.lines().nth(loc.line as usize)?;
        line.split_whitespace().next().map(str::to_owned)
    }

    fn step_forward(
        &mut self,
        advance: fn(&ExecTree, &Cursor) -> Option<Cursor>,
        granularity: StepGranularity,
    ) -> StopReason {
        let Some(start) = self.cursor.clone() else { return StopReason::Terminated };
        let start_frame = start.frame();
        let start_loc = self.location();
        let mut cursor = start;
        loop {
            let Some(next) = advance(&self.tree, &cursor) else {
                self.cursor = Some(cursor);
                return self.end_reason();
            };
            cursor = next;
            if self.rests_here(&cursor, start_frame, start_loc, granularity) {
                break;
            }
        }
        self.cursor = Some(cursor);
        self.promote_step()
    }

    fn step_backward(
        &mut self,
        advance: fn(&ExecTree, &Cursor) -> Option<Cursor>,
        granularity: StepGranularity,
    ) -> StopReason {
        let Some(start) = self.cursor.clone() else { return StopReason::Terminated };
        let start_frame = start.frame();
        let start_loc = self.location();
        let mut cursor = start;
        loop {
            let Some(prev) = advance(&self.tree, &cursor) else {
                // Already at the first event: rest there.
                self.cursor = Some(cursor);
                return StopReason::Entry;
            };
            cursor = prev;
            if self.rests_here(&cursor, start_frame, start_loc, granularity) {
                break;
            }
        }
        // Walking backward enters a line at its *last* event. To mirror the
        // forward walk (which rests on a line's first event), keep going
        // while the run of the newly-reached line continues behind us.
        if granularity == StepGranularity::Line {
            let run_frame = cursor.frame();
            let run_loc = self.location_at(&cursor);
            loop {
                let Some(prev) = advance(&self.tree, &cursor) else { break };
                if prev.frame() != run_frame || !same_line(self.location_at(&prev), run_loc) {
                    break;
                }
                cursor = prev;
            }
        }
        self.cursor = Some(cursor);
        self.promote_step()
    }

    fn location_at(&self, cursor: &Cursor) -> Option<Location> {
        let (frame, index) = cursor.top();
        self.tree.event_location(&self.assets, frame, index)
    }

    /// Whether a step at `granularity` comes to rest at `cursor`.
    fn rests_here(
        &self,
        cursor: &Cursor,
        start_frame: FrameId,
        start_loc: Option<Location>,
        granularity: StepGranularity,
    ) -> bool {
        if granularity == StepGranularity::Instruction {
            return true;
        }
        if cursor.frame() != start_frame {
            return true;
        }
        !same_line(self.location_at(cursor), start_loc)
    }

    fn breakpoint_hit(&self, cursor: &Cursor) -> Option<Vec<i64>> {
        let (frame, index) = cursor.top();
        let Some(Location::Source(loc)) = self.tree.event_location(&self.assets, frame, index)
        else {
            return None;
        };
        let ids = self.breakpoints.matches(&loc);
        (!ids.is_empty()).then_some(ids)
    }

    /// Step stops are promoted to breakpoint stops on an exact match.
    fn promote_step(&mut self) -> StopReason {
        match self.cursor.as_ref().and_then(|c| self.breakpoint_hit(c)) {
            Some(ids) => StopReason::Breakpoint { ids },
            None => StopReason::Step,
        }
    }

    /// End-of-trace: an exception stop when the trace recorded a failure,
    /// termination otherwise.
    fn end_reason(&mut self) -> StopReason {
        if self.finished {
            return StopReason::Terminated;
        }
        self.finished = true;
        let failure = self
            .cursor
            .as_ref()
            .map(|c| self.tree.frame(c.path()[0].0).group)
            .and_then(|g| self.assets.response.txn_groups.get(g))
            .and_then(|g| g.failure_message.clone());
        match failure {
            Some(message) => StopReason::Exception { message },
            None => StopReason::Terminated,
        }
    }
}

fn same_line(a: Option<Location>, b: Option<Location>) -> bool {
    match (a, b) {
        (Some(Location::Source(x)), Some(Location::Source(y))) => {
            x.file == y.file && x.line == y.line
        }
        (
            Some(Location::Pseudo { group: ga, line: la }),
            Some(Location::Pseudo { group: gb, line: lb }),
        ) => ga == gb && la == lb,
        _ => false,
    }
}
