//! gopherd: A Gopher content server
//!
//! Serves a single directory tree over the Gopher protocol (RFC 1436):
//! - Directories are answered with a sorted menu
//! - Regular files are streamed verbatim
//! - Selectors can never escape the configured root
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod gopher;
mod server;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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
        listen = %config.listen,
        root = %config.root.display(),
        host = %config.host,
        port = config.port,
        max_connections = ?config.max_connections,
        request_timeout = ?config.request_timeout,
        extension_match = ?config.extension_match,
        "Starting gopherd"
    );

    Server::new(&config).run().await
}
