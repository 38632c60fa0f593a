use std::path::PathBuf;

use clap::Parser;

/// avmdbg: post-mortem DAP debugger for AVM transaction-group simulations.
#[derive(Parser, Debug)]
#[command(
    name = "avmdbg",
    version,
    after_help = "The adapter replays a simulate response produced by an Algorand node; \
                  it never connects to a chain.",
    next_display_order = None,
)]
pub struct AvmdbgArgs {
    /// Listen for DAP sessions on 127.0.0.1:<PORT> instead of stdin/stdout.
    #[arg(long = "server", value_name = "PORT")]
    pub server: Option<u16>,

    /// The simulate response to replay.
    #[arg(long, env = "ALGORAND_SIMULATION_RESPONSE_PATH", value_name = "PATH")]
    pub simulation_response: Option<PathBuf>,

    /// The descriptor mapping program hashes to TEAL sources and maps.
    #[arg(long, env = "ALGORAND_TXN_GROUP_SOURCES_DESCRIPTION_PATH", value_name = "PATH")]
    pub txn_group_sources: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        AvmdbgArgs::command().debug_assert();
    }
}
