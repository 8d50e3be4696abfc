//! Runs the virtual device fleet against a remote service.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use iot_telemetry::{
    config::{LogFormat, SimulatorConfig},
    logging,
    simulator::{default_fleet, HttpSink, Simulator},
    Result,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("device_simulator: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    logging::init_logger(LogFormat::Compact)?;

    let config = SimulatorConfig::from_env(8000)?;
    let sink = HttpSink::new(&config.api_url, config.request_timeout)?;
    info!(target_url = sink.write_url(), "Starting device simulator");

    let handle = Simulator::new(default_fleet(), config, Arc::new(sink)).start(CancellationToken::new());

    handle.run_until(tokio::signal::ctrl_c()).await
}
