//! The DAP session: a state machine translating protocol requests into
//! replay-engine queries.
//!
//! Requests are handled strictly in arrival order; every handler returns
//! its replies and events instead of emitting them, so the transport loop
//! (and the tests) stay in control of the wire.

use std::path::{Path, PathBuf};

use avmdbg_backend::{
    Debugger, Location, OsFileReader, ReconstructedState, StepGranularity, StopReason,
    TraceAssets,
};
use dap::{
    events::{Event, OutputEventBody, StoppedEventBody, TerminatedEventBody},
    requests::{
        BreakpointLocationsArguments, Command, Request, SetBreakpointsArguments,
        StackTraceArguments,
    },
    responses::{
        BreakpointLocationsResponse, ContinueResponse, EvaluateResponse, Response, ResponseBody,
        ScopesResponse, SetBreakpointsResponse, SourceResponse, StackTraceResponse,
        StepInTargetsResponse, ThreadsResponse, VariablesResponse,
    },
    types,
};

use crate::{
    evaluate::{evaluate, EvalOutcome},
    variables::{VarNode, VariableRegistry},
};

/// The single debugged thread advertised to the client.
const THREAD_ID: i64 = 1;

/// File locations handed to the adapter at startup.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub simulation_response: PathBuf,
    pub sources_description: PathBuf,
}

/// What one request produced: replies first (in order), then events.
#[derive(Debug, Default)]
pub struct Outcome {
    pub responses: Vec<Response>,
    pub events: Vec<Event>,
    pub disconnect: bool,
}

enum Phase {
    Uninitialized,
    /// Between `initialize` and `configurationDone`. A `launch` arriving
    /// here is loaded eagerly but its reply is held back until the
    /// configuration phase ends.
    Configuring { pending_launch: Option<PendingLaunch> },
    ReadyToLaunch,
    Stopped,
    Terminated,
}

struct PendingLaunch {
    request: Request,
    stop_on_entry: bool,
}

pub struct Session {
    config: SessionConfig,
    phase: Phase,
    lines_start_at1: bool,
    columns_start_at1: bool,
    debugger: Option<Debugger>,
    state: ReconstructedState,
    registry: VariableRegistry,
    terminated_sent: bool,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            phase: Phase::Uninitialized,
            lines_start_at1: true,
            columns_start_at1: true,
            debugger: None,
            state: ReconstructedState::default(),
            registry: VariableRegistry::default(),
            terminated_sent: false,
        }
    }

    pub fn handle(&mut self, request: Request) -> Outcome {
        let mut out = Outcome::default();
        trace!(seq = request.seq, "handling request");

        if matches!(self.phase, Phase::Uninitialized)
            && !matches!(request.command, Command::Initialize(_))
        {
            out.responses.push(request.error("the session is not yet initialized"));
            return out;
        }

        // The launch reply is gated on configurationDone; any later
        // non-configuration request also releases it, bounding the wait.
        if !matches!(
            request.command,
            Command::ConfigurationDone
                | Command::SetBreakpoints(_)
                | Command::BreakpointLocations(_)
                | Command::Threads
        ) {
            self.flush_pending_launch(&mut out);
        }

        match request.command {
            Command::Initialize(ref args) => {
                self.lines_start_at1 = args.lines_start_at1.unwrap_or(true);
                self.columns_start_at1 = args.columns_start_at1.unwrap_or(true);
                self.phase = Phase::Configuring { pending_launch: None };
                out.responses.push(request.success(ResponseBody::Initialize(capabilities())));
                out.events.push(Event::Initialized);
            }
            Command::Launch(ref args) => {
                let stop_on_entry = args
                    .additional_data
                    .as_ref()
                    .and_then(|v| v.get("stopOnEntry"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                self.launch(request, stop_on_entry, &mut out);
            }
            Command::Attach(_) => self.launch(request, false, &mut out),
            Command::ConfigurationDone => {
                let pending = match &mut self.phase {
                    Phase::Configuring { pending_launch } => {
                        let pending = pending_launch.take();
                        self.phase = Phase::ReadyToLaunch;
                        pending
                    }
                    _ => None,
                };
                if let Some(pending) = pending {
                    self.complete_launch(pending, &mut out);
                }
                out.responses.push(request.success(ResponseBody::ConfigurationDone));
            }
            Command::Threads => {
                out.responses.push(request.success(ResponseBody::Threads(ThreadsResponse {
                    threads: vec![types::Thread { id: THREAD_ID, name: "main".to_string() }],
                })));
            }
            Command::SetBreakpoints(ref args) => {
                let body = self.set_breakpoints(args);
                out.responses.push(request.success(ResponseBody::SetBreakpoints(body)));
            }
            Command::BreakpointLocations(ref args) => {
                let body = self.breakpoint_locations(args);
                out.responses.push(request.success(ResponseBody::BreakpointLocations(body)));
            }
            Command::StackTrace(ref args) => match self.stack_trace(args) {
                Ok(body) => out.responses.push(request.success(ResponseBody::StackTrace(body))),
                Err(message) => out.responses.push(request.error(message)),
            },
            Command::Scopes(_) => match self.scopes() {
                Ok(body) => out.responses.push(request.success(ResponseBody::Scopes(body))),
                Err(message) => out.responses.push(request.error(message)),
            },
            Command::Variables(ref args) => {
                let variables = match self.registry.get(args.variables_reference) {
                    Some(node) => self.registry.expand(&node, &self.state),
                    None => Vec::new(),
                };
                out.responses
                    .push(request.success(ResponseBody::Variables(VariablesResponse { variables })));
            }
            Command::Evaluate(ref args) => {
                let body = self.evaluate(&args.expression);
                out.responses.push(request.success(ResponseBody::Evaluate(body)));
            }
            Command::StepInTargets(_) => {
                let targets = self
                    .debugger
                    .as_ref()
                    .map(|d| d.step_in_targets())
                    .unwrap_or_default()
                    .into_iter()
                    .enumerate()
                    .map(|(i, label)| types::StepInTarget {
                        id: i as i64,
                        label,
                        line: None,
                        column: None,
                        end_line: None,
                        end_column: None,
                    })
                    .collect();
                out.responses.push(
                    request
                        .success(ResponseBody::StepInTargets(StepInTargetsResponse { targets })),
                );
            }
            Command::Source(ref args) => {
                let reference = args
                    .source
                    .as_ref()
                    .and_then(|s| s.source_reference)
                    .unwrap_or(args.source_reference as i32);
                match self.pseudo_content(reference.into()) {
                    Some(content) => {
                        out.responses.push(request.success(ResponseBody::Source(SourceResponse {
                            content,
                            mime_type: Some("application/json".to_string()),
                        })))
                    }
                    None => out.responses.push(request.error("unknown source reference")),
                }
            }
            Command::Continue(_) => {
                out.responses.push(request.success(ResponseBody::Continue(ContinueResponse {
                    all_threads_continued: Some(true),
                })));
                self.run(&mut out, |d| d.continue_forward());
            }
            Command::ReverseContinue(_) => {
                out.responses.push(request.success(ResponseBody::ReverseContinue));
                self.run(&mut out, |d| d.continue_backward());
            }
            Command::Next(ref args) => {
                let granularity = step_granularity(args.granularity.as_ref());
                out.responses.push(request.success(ResponseBody::Next));
                self.run(&mut out, move |d| d.step_over(granularity));
            }
            Command::StepIn(ref args) => {
                let granularity = step_granularity(args.granularity.as_ref());
                out.responses.push(request.success(ResponseBody::StepIn));
                self.run(&mut out, move |d| d.step_in(granularity));
            }
            Command::StepOut(_) => {
                out.responses.push(request.success(ResponseBody::StepOut));
                self.run(&mut out, |d| d.step_out());
            }
            Command::StepBack(ref args) => {
                let granularity = step_granularity(args.granularity.as_ref());
                out.responses.push(request.success(ResponseBody::StepBack));
                self.run(&mut out, move |d| d.step_back(granularity));
            }
            Command::Disconnect(_) => {
                self.phase = Phase::Terminated;
                out.responses.push(request.success(ResponseBody::Disconnect));
                out.disconnect = true;
            }
            _ => {
                out.responses.push(request.error("unsupported request"));
            }
        }
        out
    }

    /// Handles a launch (or attach) request in the current phase.
    fn launch(&mut self, request: Request, stop_on_entry: bool, out: &mut Outcome) {
        let configuring = matches!(&self.phase, Phase::Configuring { pending_launch: None });
        let ready = matches!(&self.phase, Phase::ReadyToLaunch);
        if !configuring && !ready {
            out.responses.push(request.error("unexpected launch request"));
            return;
        }
        match self.load() {
            Err(message) => self.fail_launch(request, message, out),
            Ok(()) => {
                let pending = PendingLaunch { request, stop_on_entry };
                if configuring {
                    self.phase = Phase::Configuring { pending_launch: Some(pending) };
                } else {
                    self.complete_launch(pending, out);
                }
            }
        }
    }

    /// Loads the trace assets and builds the debugger, if not done yet.
    fn load(&mut self) -> Result<(), String> {
        if self.debugger.is_some() {
            return Ok(());
        }
        let assets = TraceAssets::load(
            &OsFileReader,
            &self.config.simulation_response,
            &self.config.sources_description,
        )
        .map_err(|e| e.to_string())?;
        self.debugger = Some(Debugger::new(assets).map_err(|e| e.to_string())?);
        Ok(())
    }

    fn fail_launch(&mut self, request: Request, message: String, out: &mut Outcome) {
        error!(%message, "launch failed");
        out.responses.push(request.error(&message));
        out.events.push(Event::Output(OutputEventBody {
            category: Some(types::OutputEventCategory::Stderr),
            output: format!("{message}\n"),
            group: None,
            variables_reference: None,
            source: None,
            line: None,
            column: None,
            data: None,
        }));
        self.push_terminated(out);
        self.phase = Phase::Terminated;
    }

    /// Replies to a held launch and starts the debuggee.
    fn complete_launch(&mut self, pending: PendingLaunch, out: &mut Outcome) {
        out.responses.push(pending.request.success(ResponseBody::Launch));
        let stop_on_entry = pending.stop_on_entry;
        self.run(out, move |d| {
            let reason = d.start();
            if stop_on_entry || !matches!(reason, StopReason::Entry) {
                reason
            } else {
                d.continue_forward()
            }
        });
    }

    fn flush_pending_launch(&mut self, out: &mut Outcome) {
        let pending = match &mut self.phase {
            Phase::Configuring { pending_launch } => pending_launch.take(),
            _ => None,
        };
        if let Some(pending) = pending {
            self.phase = Phase::ReadyToLaunch;
            self.complete_launch(pending, out);
        }
    }

    /// Runs a stepping operation and queues the resulting event.
    fn run(&mut self, out: &mut Outcome, op: impl FnOnce(&mut Debugger) -> StopReason) {
        let Some(debugger) = self.debugger.as_mut() else { return };
        let reason = op(debugger);
        self.refresh_stop();
        match reason {
            StopReason::Terminated => {
                self.push_terminated(out);
                self.phase = Phase::Terminated;
            }
            StopReason::Entry => {
                self.phase = Phase::Stopped;
                out.events.push(stopped(types::StoppedEventReason::Entry, None, None));
            }
            StopReason::Step => {
                self.phase = Phase::Stopped;
                out.events.push(stopped(types::StoppedEventReason::Step, None, None));
            }
            StopReason::Breakpoint { ids } => {
                self.phase = Phase::Stopped;
                out.events.push(stopped(types::StoppedEventReason::Breakpoint, None, Some(ids)));
            }
            StopReason::Exception { message } => {
                self.phase = Phase::Stopped;
                out.events.push(stopped(
                    types::StoppedEventReason::Exception,
                    Some(message),
                    None,
                ));
            }
        }
    }

    /// Caches the reconstructed state and resets variable references.
    fn refresh_stop(&mut self) {
        self.registry.clear();
        self.state = match &self.debugger {
            Some(debugger) => debugger.state(),
            None => ReconstructedState::default(),
        };
    }

    fn push_terminated(&mut self, out: &mut Outcome) {
        if !self.terminated_sent {
            self.terminated_sent = true;
            out.events.push(Event::Terminated(Some(TerminatedEventBody { restart: None })));
        }
    }

    fn set_breakpoints(&mut self, args: &SetBreakpointsArguments) -> SetBreakpointsResponse {
        let requested: Vec<(i64, Option<i64>)> = args
            .breakpoints
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|bp| (bp.line, bp.column))
            .collect();
        // A client position outside our numbering (e.g. line 0 with 1-based
        // lines) can never resolve.
        let internal: Vec<(u32, Option<u32>)> = requested
            .iter()
            .map(|&(line, column)| {
                (
                    self.line_from_client(line).unwrap_or(u32::MAX),
                    column.and_then(|c| self.column_from_client(c)),
                )
            })
            .collect();

        let path = args.source.path.as_deref().map(Path::new);
        let set = match (&mut self.debugger, path) {
            (Some(debugger), Some(path)) => debugger.set_breakpoints(path, &internal),
            // No debugger or no real file yet: everything is unverified.
            _ => internal
                .iter()
                .enumerate()
                .map(|(i, &(line, column))| avmdbg_backend::SetBreakpoint {
                    id: i as i64 + 1,
                    verified: false,
                    line,
                    column: column.unwrap_or(0),
                })
                .collect(),
        };

        let breakpoints = set
            .into_iter()
            .zip(&requested)
            .map(|(bp, &(req_line, req_column))| types::Breakpoint {
                id: Some(bp.id),
                verified: bp.verified,
                message: (!bp.verified)
                    .then(|| "no instruction maps to this location".to_string()),
                source: Some(args.source.clone()),
                line: Some(if bp.verified { self.line_to_client(bp.line) } else { req_line }),
                column: Some(if bp.verified {
                    self.column_to_client(bp.column)
                } else {
                    req_column.unwrap_or(0)
                }),
                end_line: None,
                end_column: None,
                instruction_reference: None,
                offset: None,
            })
            .collect();
        SetBreakpointsResponse { breakpoints }
    }

    fn breakpoint_locations(
        &self,
        args: &BreakpointLocationsArguments,
    ) -> BreakpointLocationsResponse {
        let Some(debugger) = &self.debugger else {
            return BreakpointLocationsResponse { breakpoints: Vec::new() };
        };
        let file = args
            .source
            .path
            .as_deref()
            .and_then(|p| debugger.assets().files.id(Path::new(p)));
        let Some(file) = file else {
            return BreakpointLocationsResponse { breakpoints: Vec::new() };
        };

        let Some(start) = self.line_from_client(args.line) else {
            return BreakpointLocationsResponse { breakpoints: Vec::new() };
        };
        let end = args
            .end_line
            .and_then(|l| self.line_from_client(l))
            .unwrap_or(start);

        let breakpoints = debugger
            .index()
            .breakpoint_locations(file, start..=end)
            .into_iter()
            .map(|(line, column)| types::BreakpointLocation {
                line: self.line_to_client(line),
                column: Some(self.column_to_client(column)),
                end_line: None,
                end_column: None,
            })
            .collect();
        BreakpointLocationsResponse { breakpoints }
    }

    fn stack_trace(&self, args: &StackTraceArguments) -> Result<StackTraceResponse, &'static str> {
        let debugger = self.debugger.as_ref().ok_or("no active debuggee")?;
        let cursor = debugger.cursor().ok_or("the debuggee is not stopped")?;
        let tree = debugger.tree();

        // Topmost frame first, i.e. the deepest cursor entry.
        let mut frames = Vec::new();
        for (depth, &(frame_id, index)) in cursor.path().iter().enumerate().rev() {
            let frame = tree.frame(frame_id);
            let location = tree.event_location(debugger.assets(), frame_id, index);
            let (source, line, column) = match location {
                Some(Location::Source(loc)) => {
                    let path = debugger.assets().files.path(loc.file);
                    (
                        file_source(path),
                        self.line_to_client(loc.line),
                        self.column_to_client(loc.column),
                    )
                }
                Some(Location::Pseudo { group, line }) => (
                    pseudo_source(&tree.group_sources[group].name, group),
                    self.line_to_client(line),
                    self.column_to_client(0),
                ),
                None => (file_source(Path::new("")), 0, 0),
            };
            frames.push(types::StackFrame {
                id: depth as i64,
                name: frame.name.clone(),
                source: Some(source),
                line,
                column,
                end_line: None,
                end_column: None,
                can_restart: None,
                instruction_pointer_reference: None,
                module_id: None,
                presentation_hint: None,
            });
        }

        let total = frames.len() as i64;
        let start = args.start_frame.unwrap_or(0).max(0) as usize;
        let mut frames: Vec<types::StackFrame> = frames.into_iter().skip(start).collect();
        if let Some(levels) = args.levels {
            if levels > 0 {
                frames.truncate(levels as usize);
            }
        }
        Ok(StackTraceResponse { stack_frames: frames, total_frames: Some(total) })
    }

    fn scopes(&mut self) -> Result<ScopesResponse, &'static str> {
        if self.debugger.as_ref().and_then(|d| d.cursor()).is_none() {
            return Err("the debuggee is not stopped");
        }
        let execution = self.registry.alloc(VarNode::ExecutionScope);
        let chain = self.registry.alloc(VarNode::ChainScope);
        Ok(ScopesResponse {
            scopes: vec![
                scope("Execution State", execution, 2),
                scope("On-chain State", chain, self.state.apps.len()),
            ],
        })
    }

    fn evaluate(&mut self, expression: &str) -> EvaluateResponse {
        let (result, reference) = match evaluate(expression, &self.state) {
            EvalOutcome::Value(value) => {
                let variable = self.registry.value_variable(String::new(), &value);
                (variable.value, variable.variables_reference)
            }
            EvalOutcome::Message(message) => (message, 0),
        };
        EvaluateResponse {
            result,
            type_field: None,
            presentation_hint: None,
            variables_reference: reference,
            named_variables: None,
            indexed_variables: None,
            memory_reference: None,
        }
    }

    fn pseudo_content(&self, reference: i64) -> Option<String> {
        let debugger = self.debugger.as_ref()?;
        let group = usize::try_from(reference).ok()?.checked_sub(1)?;
        debugger.tree().group_sources.get(group).map(|gs| gs.content.clone())
    }

    fn line_to_client(&self, line: u32) -> i64 {
        line as i64 + i64::from(self.lines_start_at1)
    }

    fn line_from_client(&self, line: i64) -> Option<u32> {
        u32::try_from(line - i64::from(self.lines_start_at1)).ok()
    }

    fn column_to_client(&self, column: u32) -> i64 {
        column as i64 + i64::from(self.columns_start_at1)
    }

    fn column_from_client(&self, column: i64) -> Option<u32> {
        u32::try_from(column - i64::from(self.columns_start_at1)).ok()
    }
}

fn capabilities() -> types::Capabilities {
    types::Capabilities {
        supports_configuration_done_request: Some(true),
        supports_step_back: Some(true),
        supports_breakpoint_locations_request: Some(true),
        supports_evaluate_for_hovers: Some(true),
        supports_delayed_stack_trace_loading: Some(true),
        supports_step_in_targets_request: Some(true),
        supports_stepping_granularity: Some(true),
        supports_single_thread_execution_requests: Some(false),
        ..Default::default()
    }
}

fn stopped(
    reason: types::StoppedEventReason,
    text: Option<String>,
    hit_breakpoint_ids: Option<Vec<i64>>,
) -> Event {
    Event::Stopped(StoppedEventBody {
        reason,
        description: text.clone(),
        thread_id: Some(THREAD_ID),
        preserve_focus_hint: None,
        text,
        all_threads_stopped: Some(true),
        hit_breakpoint_ids,
    })
}

fn scope(name: &str, reference: i64, named: usize) -> types::Scope {
    types::Scope {
        name: name.to_string(),
        presentation_hint: None,
        variables_reference: reference,
        named_variables: Some(named as i64),
        indexed_variables: None,
        expensive: false,
        source: None,
        line: None,
        column: None,
        end_line: None,
        end_column: None,
    }
}

fn file_source(path: &Path) -> types::Source {
    types::Source {
        name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        path: Some(path.display().to_string()),
        source_reference: None,
        presentation_hint: None,
        origin: None,
        sources: None,
        adapter_data: None,
        checksums: None,
    }
}

/// Pseudo-sources are served through the `source` request; references are
/// the 1-based group index.
fn pseudo_source(name: &str, group: usize) -> types::Source {
    types::Source {
        name: Some(name.to_string()),
        path: None,
        source_reference: Some(group as i32 + 1),
        presentation_hint: None,
        origin: Some("synthetic".to_string()),
        sources: None,
        adapter_data: None,
        checksums: None,
    }
}

fn step_granularity(granularity: Option<&types::SteppingGranularity>) -> StepGranularity {
    match granularity {
        Some(types::SteppingGranularity::Instruction) => StepGranularity::Instruction,
        _ => StepGranularity::Line,
    }
}
