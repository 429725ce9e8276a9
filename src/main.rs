use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use holo_zenoh_runtime::config::{CMD_TIMEOUT, TELEMETRY_DIVIDER};
use holo_zenoh_runtime::runtime::RuntimeOptions;

/// Holonomic base runtime: servo, odometry and goal control over Zenoh
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON file overriding servo and goal tuning
    #[arg(long)]
    tuning: Option<PathBuf>,

    /// Publish telemetry every N ticks
    #[arg(long, default_value_t = TELEMETRY_DIVIDER)]
    telemetry_divider: u32,

    /// API order watchdog timeout [ms]
    #[arg(long, default_value_t = CMD_TIMEOUT.as_millis() as u64)]
    cmd_timeout_ms: u64,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let options = RuntimeOptions {
        tuning_path: args.tuning,
        telemetry_divider: args.telemetry_divider,
        cmd_timeout: Duration::from_millis(args.cmd_timeout_ms),
    };

    if let Err(e) = holo_zenoh_runtime::runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
