//! serve-a-page: a minimal single-threaded HTTP server
//!
//! Accepts one connection at a time, reads until the end of the header
//! block, and answers every request with the same fixed HTML page.
//!
//! Features:
//! - Lifecycle driven through a swappable transport layer
//! - Cooperative shutdown on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

mod config;
mod http;
mod server;
mod transport;

use config::Config;
use server::Server;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        port = config.port,
        bind = %config.bind,
        max_request_bytes = config.max_request_bytes,
        "Starting serve-a-page server"
    );

    let server = Arc::new(Server::new(transport::SysTransport, config.max_request_bytes)?);
    server.configure()?;
    server.bind(config.bind_addr())?;
    server.listen()?;
    info!(addr = %config.bind_addr(), "Server listening");

    // An interrupt stops the accept loop cooperatively: the signal thread
    // holds its own handle to the server and shuts the endpoint down,
    // which wakes the blocking accept.
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let handle = Arc::clone(&server);
    thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Stopping server");
            if let Err(e) = handle.shutdown() {
                error!(error = %e, "Shutdown failed");
            }
        }
    });

    server.run(None);
    info!("Server stopped");
    Ok(())
}
