use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use pulse_store::{ChangeFeed, Database};
use pulse_telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(name = "pulse", about = "Real-time change-notification stream server")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 9300)]
    port: u16,

    /// Directory for the database and logs (defaults to ~/.pulse)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Per-connection outbound frame queue size
    #[arg(long, default_value_t = 256)]
    max_send_queue: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let data_dir = args.data_dir.unwrap_or_else(|| dirs_home().join(".pulse"));
    std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");

    let _telemetry = pulse_telemetry::init_telemetry(TelemetryConfig {
        log_db_path: data_dir.join("database/logs.db"),
        ..Default::default()
    });

    tracing::info!("Starting pulse server");

    let db_path = data_dir.join("database/pulse.db");
    let db = Database::open(&db_path).expect("Failed to open database");

    // Change-notification hub shared by the repos and the watchers
    let feed = Arc::new(ChangeFeed::new(1024));

    let config = pulse_server::ServerConfig {
        port: args.port,
        max_send_queue: args.max_send_queue,
    };
    let handle = pulse_server::start(config, db, feed)
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "pulse server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
