//! # avmdbg-adapter
//!
//! The Debug Adapter Protocol surface over the replay engine: a session
//! state machine translating DAP requests into cursor and reconstruction
//! queries, and the stdio/TCP server loops that carry it.

#[macro_use]
extern crate tracing;

mod evaluate;
mod server;
mod session;
mod variables;

pub use server::{serve_stdio, serve_tcp};
pub use session::{Outcome, Session, SessionConfig};
