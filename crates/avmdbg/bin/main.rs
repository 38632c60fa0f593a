#[macro_use]
extern crate tracing;

mod args;

use args::AvmdbgArgs;
use avmdbg_adapter::SessionConfig;
use clap::Parser;
use eyre::{OptionExt, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging();

    let args = AvmdbgArgs::parse();
    let config = SessionConfig {
        simulation_response: args
            .simulation_response
            .ok_or_eyre("ALGORAND_SIMULATION_RESPONSE_PATH is not set")?,
        sources_description: args
            .txn_group_sources
            .ok_or_eyre("ALGORAND_TXN_GROUP_SOURCES_DESCRIPTION_PATH is not set")?,
    };
    debug!(?config, "starting debug adapter");

    match args.server {
        Some(port) => avmdbg_adapter::serve_tcp(port, config),
        None => avmdbg_adapter::serve_stdio(config),
    }
}

/// Logging is stderr-only: stdout carries the Content-Length-framed DAP
/// messages, and a stray line there corrupts the session.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("avmdbg=info,avmdbg_adapter=info,avmdbg_backend=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
