//! # Server Binary Entry Point
//!
//! Thin wrapper that loads configuration, builds the scan orchestrator and
//! serves the coordinator API.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --config config/coordinator.toml
//! ```
//!
//! The server will:
//! 1. Load configuration from the specified TOML file (or use defaults)
//! 2. Create the upload and output directories
//! 3. Restore the persisted scan status
//! 4. Serve the HTTP API until Ctrl-C

use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::io::Write;
use std::sync::Arc;

use scan_coordinator::common::config::CoordinatorConfig;
use scan_coordinator::server::{router, ScanOrchestrator};

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the coordinator configuration file (TOML format)
    ///
    /// Example: config/coordinator.toml
    #[arg(short, long)]
    config: Option<String>,
}

/// Initialize the logging system with timestamp, level, and message formatting.
///
/// INFO by default; `RUST_LOG` overrides.
/// Format: `[HH:MM:SS] [LEVEL] message`
fn init_logger() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("👋 Shutting down");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let config = CoordinatorConfig::load(args.config.as_deref())?;

    let orchestrator = ScanOrchestrator::from_config(&config)?;
    let app = router(Arc::new(orchestrator), config.server.max_upload_bytes);

    info!("🚀 Scan coordinator listening on http://{}", config.server.address);
    info!("📁 Photos: {}", config.storage.upload_dir.display());
    info!("🧱 Reconstruction output: {}", config.storage.output_dir.display());

    let listener = tokio::net::TcpListener::bind(&config.server.address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
