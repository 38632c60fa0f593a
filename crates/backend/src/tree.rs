//! The execution tree: transaction groups, transactions, and the program
//! runs nested under them, built once from the flat trace at load time.

use serde_json::Value;

use crate::{
    artifact::{
        trace::{ExecTrace, OpcodeEvent, ProgramHash},
        TraceAssets,
    },
    error::{ReplayError, Result},
    pseudo::GroupSource,
    sourcemap::SourceLoc,
};

pub type FrameId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    TransactionGroup { inner: bool },
    Transaction,
    LogicSig,
    AppCall,
}

/// A node in the execution tree.
///
/// Frames live in an arena (`ExecTree::frames`); parents and children are
/// indexes, so the tree holds no back-references.
#[derive(Clone, Debug)]
pub struct Frame {
    pub id: FrameId,
    /// Parent frame and the event index within it that enters this frame.
    pub parent: Option<(FrameId, usize)>,
    pub kind: FrameKind,
    pub name: String,
    /// The executed program, for program frames.
    pub program: Option<ProgramHash>,
    /// The application whose state this frame's deltas target.
    pub app_id: Option<u64>,
    /// The top-level group this frame belongs to.
    pub group: usize,
    /// Line of this frame's node in the group's pseudo-source.
    pub pseudo_line: u32,
    pub events: Vec<FrameEvent>,
}

impl Frame {
    pub fn is_program(&self) -> bool {
        matches!(self.kind, FrameKind::LogicSig | FrameKind::AppCall)
    }
}

/// One row of a frame's event sequence.
#[derive(Clone, Debug)]
pub enum FrameEvent {
    /// A VM instruction; `inner` points at the group it spawned, if any.
    Op { event: OpcodeEvent, inner: Option<FrameId> },
    /// A child execution: a transaction of a group, or a program run of a
    /// transaction.
    Enter(FrameId),
}

impl FrameEvent {
    /// The frame entered when stepping into this event.
    pub fn child(&self) -> Option<FrameId> {
        match self {
            Self::Op { inner, .. } => *inner,
            Self::Enter(child) => Some(*child),
        }
    }
}

/// Where an event rests: a TEAL position, or a line of a group's
/// pseudo-source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Source(SourceLoc),
    Pseudo { group: usize, line: u32 },
}

#[derive(Clone, Debug)]
pub struct ExecTree {
    pub frames: Vec<Frame>,
    /// Top-level group frames, in trace order.
    pub roots: Vec<FrameId>,
    /// One pseudo-source per top-level group.
    pub group_sources: Vec<GroupSource>,
}

impl ExecTree {
    pub fn build(assets: &TraceAssets) -> Result<Self> {
        let mut builder = Builder { assets, frames: Vec::new(), group_sources: Vec::new() };
        let mut roots = Vec::new();
        for (gi, group) in assets.response.txn_groups.iter().enumerate() {
            let bodies: Vec<Value> =
                group.txn_results.iter().map(|t| t.txn_result.clone()).collect();
            builder.group_sources.push(GroupSource::new(gi, bodies));

            let root = builder.new_frame(
                FrameKind::TransactionGroup { inner: false },
                format!("transaction-group-{gi}"),
                gi,
                0,
            );
            for (k, txn) in group.txn_results.iter().enumerate() {
                builder.build_txn(root, gi, k, &k.to_string(), &txn.txn_result, txn.exec_trace.as_ref())?;
            }
            roots.push(root);
        }
        debug!(frames = builder.frames.len(), "built execution tree");
        Ok(Self { frames: builder.frames, roots, group_sources: builder.group_sources })
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id]
    }

    pub fn event(&self, frame: FrameId, index: usize) -> &FrameEvent {
        &self.frames[frame].events[index]
    }

    /// The source position of the event at (frame, index).
    pub fn event_location(
        &self,
        assets: &TraceAssets,
        frame: FrameId,
        index: usize,
    ) -> Option<Location> {
        match self.event(frame, index) {
            FrameEvent::Op { event, .. } => {
                let hash = self.frames[frame].program.as_ref()?;
                let source = assets.source(hash)?;
                source.map.pc_to_loc(event.pc).map(Location::Source)
            }
            FrameEvent::Enter(child) => {
                let child = &self.frames[*child];
                Some(Location::Pseudo { group: child.group, line: child.pseudo_line })
            }
        }
    }
}

struct Builder<'a> {
    assets: &'a TraceAssets,
    frames: Vec<Frame>,
    group_sources: Vec<GroupSource>,
}

impl Builder<'_> {
    fn new_frame(&mut self, kind: FrameKind, name: String, group: usize, pseudo_line: u32) -> FrameId {
        let id = self.frames.len();
        self.frames.push(Frame {
            id,
            parent: None,
            kind,
            name,
            program: None,
            app_id: None,
            group,
            pseudo_line,
            events: Vec::new(),
        });
        id
    }

    /// Appends an enter-event for `child` to `parent`'s sequence.
    fn link_enter(&mut self, parent: FrameId, child: FrameId) {
        let index = self.frames[parent].events.len();
        self.frames[parent].events.push(FrameEvent::Enter(child));
        self.frames[child].parent = Some((parent, index));
    }

    fn build_txn(
        &mut self,
        parent: FrameId,
        group: usize,
        index: usize,
        path: &str,
        body: &Value,
        exec: Option<&ExecTrace>,
    ) -> Result<FrameId> {
        let name = match txn_type(body) {
            Some(ty) => format!("transaction {index} ({ty})"),
            None => format!("transaction {index}"),
        };
        let line = self.group_sources[group].line_of(path).unwrap_or(0);
        let txn = self.new_frame(FrameKind::Transaction, name, group, line);
        self.link_enter(parent, txn);

        let Some(exec) = exec else { return Ok(txn) };

        if let Some((hash, events)) = exec.logic_sig() {
            let line = self
                .group_sources[group]
                .line_of_first(&[format!("{path}/txn/lsig"), path.to_string()])
                .unwrap_or(0);
            let lsig = self.program_frame(txn, FrameKind::LogicSig, hash, group, line)?;
            self.fill_program(lsig, events, exec, path, body)?;
        }
        if let Some((hash, events)) = exec.app_trace() {
            let line = self
                .group_sources[group]
                .line_of_first(&[
                    format!("{path}/txn/txn/apid"),
                    format!("{path}/txn/txn"),
                    path.to_string(),
                ])
                .unwrap_or(0);
            let app = self.program_frame(txn, FrameKind::AppCall, hash, group, line)?;
            self.frames[app].app_id = app_id(body);
            self.fill_program(app, events, exec, path, body)?;
        }
        Ok(txn)
    }

    fn program_frame(
        &mut self,
        txn: FrameId,
        kind: FrameKind,
        hash: ProgramHash,
        group: usize,
        pseudo_line: u32,
    ) -> Result<FrameId> {
        let source = self
            .assets
            .source(&hash)
            .ok_or_else(|| ReplayError::MissingSource { hash: hash.to_string() })?;
        let file = source.filename.file_name().map_or_else(
            || source.filename.display().to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        let name = match kind {
            FrameKind::LogicSig => format!("{file} (lsig)"),
            _ => format!("{file} (app)"),
        };
        let id = self.new_frame(kind, name, group, pseudo_line);
        self.frames[id].program = Some(hash);
        self.link_enter(txn, id);
        Ok(id)
    }

    /// Flattens a program's opcode events, attaching spawned inner groups.
    fn fill_program(
        &mut self,
        frame: FrameId,
        events: &[OpcodeEvent],
        exec: &ExecTrace,
        path: &str,
        body: &Value,
    ) -> Result<()> {
        for event in events {
            let inner = if event.spawned_inners.is_empty() {
                None
            } else {
                Some(self.build_inner_group(frame, &event.spawned_inners, exec, path, body)?)
            };
            self.frames[frame].events.push(FrameEvent::Op { event: event.clone(), inner });
        }
        Ok(())
    }

    fn build_inner_group(
        &mut self,
        parent: FrameId,
        spawned: &[usize],
        exec: &ExecTrace,
        path: &str,
        body: &Value,
    ) -> Result<FrameId> {
        let group = self.frames[parent].group;
        let first_line = body
            .pointer(&format!("/inner-txns/{}", spawned[0]))
            .and_then(|_| self.group_sources[group].line_of(&format!("{path}/inner-txns/{}", spawned[0])))
            .unwrap_or(self.frames[parent].pseudo_line);
        let inner_group = self.new_frame(
            FrameKind::TransactionGroup { inner: true },
            "inner transaction group".to_string(),
            group,
            first_line,
        );
        // Entered through the spawning opcode, which the caller is about to
        // append at the parent's current tail.
        self.frames[inner_group].parent = Some((parent, self.frames[parent].events.len()));

        for (j, &trace_index) in spawned.iter().enumerate() {
            let inner_exec = exec.inner_trace.get(trace_index).ok_or_else(|| {
                ReplayError::bad_trace(format!("spawned inner {trace_index} has no inner-trace"))
            })?;
            let inner_path = format!("{path}/inner-txns/{trace_index}");
            let inner_body = body
                .pointer(&format!("/inner-txns/{trace_index}"))
                .cloned()
                .unwrap_or(Value::Null);
            self.build_txn(inner_group, group, j, &inner_path, &inner_body, Some(inner_exec))?;
        }
        Ok(inner_group)
    }
}

fn txn_type(body: &Value) -> Option<&str> {
    body.pointer("/txn/txn/type").and_then(|v| v.as_str())
}

fn app_id(body: &Value) -> Option<u64> {
    body.pointer("/txn/txn/apid")
        .or_else(|| body.pointer("/application-index"))
        .and_then(|v| v.as_u64())
}
