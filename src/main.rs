use std::time::Duration;

use clap::Parser;
use diffbot_runtime::config::{KEY_CMD, KEY_TELEMETRY, KEY_UPDATE, MOVE_TIMEOUT, RobotConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Differential robot runtime: encoder-terminated moves over zenoh
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Serial port of the motor/sensor bridge (omit to run the simulated plant)
    #[arg(short, long)]
    port: Option<String>,

    /// Run the simulated plant even if a port is given
    #[arg(long)]
    sim: bool,

    /// Key that movement commands arrive on
    #[arg(long, default_value = KEY_CMD)]
    cmd_key: String,

    /// Key that distance telemetry is published on
    #[arg(long, default_value = KEY_TELEMETRY)]
    telemetry_key: String,

    /// Key that firmware-update events arrive on
    #[arg(long, default_value = KEY_UPDATE)]
    update_key: String,

    /// Move timeout in milliseconds
    #[arg(long, default_value_t = MOVE_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,
}

impl From<Args> for RobotConfig {
    fn from(args: Args) -> Self {
        Self {
            port: if args.sim { None } else { args.port },
            cmd_key: args.cmd_key,
            telemetry_key: args.telemetry_key,
            update_key: args.update_key,
            move_timeout: Duration::from_millis(args.timeout_ms),
            ..Self::default()
        }
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 3)]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let config = RobotConfig::from(Args::parse());

    if let Err(e) = diffbot_runtime::runtime::run(config).await {
        error!("Runtime error: {}", e);
        std::process::exit(e.status_code());
    }
}
