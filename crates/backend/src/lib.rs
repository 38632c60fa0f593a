//! # avmdbg-backend
//!
//! Post-mortem replay engine for AVM transaction-group simulation traces:
//! loads a simulate response and its program sources, rebuilds the nested
//! execution tree, and steps a cursor through it while reconstructing the
//! stack, scratch space and application state at every stop.

#[macro_use]
extern crate tracing;

pub mod artifact;
mod core;
mod cursor;
mod error;
mod pseudo;
mod reconstruct;
mod sourcemap;
mod tree;

pub use artifact::{
    trace::{AvmValue, OpcodeEvent, ProgramHash, ScratchChange, SimulateResponse, StateDelta},
    FileReader, MemoryFileReader, OsFileReader, ProgramSource, TraceAssets,
};
pub use core::{Debugger, StepGranularity};
pub use cursor::{BreakpointStore, Cursor, SetBreakpoint, StopReason};
pub use error::{ReplayError, Result};
pub use pseudo::GroupSource;
pub use reconstruct::{reconstruct, AppState, ByteMap, ReconstructedState};
pub use sourcemap::{FileId, FileTable, SourceIndex, SourceLoc, SourceMap};
pub use tree::{ExecTree, Frame, FrameEvent, FrameId, FrameKind, Location};
