//! Bundleyard backend binary
//!
//! This is the main entry point for running the Bundleyard project service.

use bundleyard_backend::ProjectManager;
use bundleyard_backend::config::BundleyardConfig;
use bundleyard_backend::server::SocketServer;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG environment variable to control logging (e.g., RUST_LOG=debug)
    tracing_subscriber::registry()
        .with(log_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Bundleyard Backend - appjail project uploads");

    let config = match std::env::args().nth(1) {
        Some(path) => BundleyardConfig::load(path)?,
        None => BundleyardConfig::load_defaults()?,
    };

    tracing::info!(
        projects_root = %config.ingest.projects_root,
        max_payload_bytes = config.ingest.max_payload_bytes,
        "Configuration loaded"
    );

    #[cfg(unix)]
    if unsafe { libc::getuid() } != 0 {
        tracing::warn!("Not running as root. The projects root may not be writable.");
    }

    let manager = Arc::new(ProjectManager::new(&config));
    let server = SocketServer::new(manager);

    tracing::info!("Starting Bundleyard API server...");
    server.run().await?;

    Ok(())
}

/// Filter from RUST_LOG, falling back to `info` when it is unset or invalid
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_follows_rust_log() {
        // Single test so nothing else in this binary touches RUST_LOG concurrently
        unsafe { std::env::set_var("RUST_LOG", "debug") };
        assert_eq!(log_filter().to_string(), "debug");

        unsafe { std::env::remove_var("RUST_LOG") };
        assert_eq!(log_filter().to_string(), "info");
    }
}
