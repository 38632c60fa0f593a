//! Transport loops: a single session over stdio, or one session per TCP
//! connection.

use std::{
    io::{BufReader, BufWriter, Read, Write},
    net::TcpListener,
};

use dap::server::Server;
use eyre::{eyre, Result};

use crate::session::{Session, SessionConfig};

/// Serves a single DAP session over stdin/stdout.
pub fn serve_stdio(config: SessionConfig) -> Result<()> {
    let server = Server::new(BufReader::new(std::io::stdin()), BufWriter::new(std::io::stdout()));
    run_session(server, config)
}

/// Accepts DAP sessions on `127.0.0.1:<port>`, one connection at a time.
pub fn serve_tcp(port: u16, config: SessionConfig) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    info!(port, "listening for DAP connections");
    for stream in listener.incoming() {
        let stream = stream?;
        if let Ok(peer) = stream.peer_addr() {
            info!(%peer, "client connected");
        }
        let writer = stream.try_clone()?;
        let server = Server::new(BufReader::new(stream), BufWriter::new(writer));
        if let Err(e) = run_session(server, config.clone()) {
            warn!("session ended with an error: {e}");
        }
    }
    Ok(())
}

fn run_session<R: Read, W: Write>(mut server: Server<R, W>, config: SessionConfig) -> Result<()> {
    let mut session = Session::new(config);
    while let Some(request) = server.poll_request().map_err(|e| eyre!("transport: {e:?}"))? {
        let outcome = session.handle(request);
        for response in outcome.responses {
            server.respond(response).map_err(|e| eyre!("transport: {e:?}"))?;
        }
        for event in outcome.events {
            server.send_event(event).map_err(|e| eyre!("transport: {e:?}"))?;
        }
        if outcome.disconnect {
            break;
        }
    }
    debug!("session closed");
    Ok(())
}
