use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use iot_telemetry::{
    api::{self, AppState},
    config::{Config, StoreConfig},
    logging, metrics,
    registry::DeviceRegistry,
    simulator::{default_fleet, HttpSink, Simulator},
    store::{InfluxClient, MemoryStore, TimeSeriesStore},
    Result, TelemetryError,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        eprintln!("iot_telemetry: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    logging::init_logger(config.log_format)?;
    metrics::init_metrics();

    let store: Arc<dyn TimeSeriesStore> = match &config.store {
        StoreConfig::Influx(influx) => {
            info!(url = %influx.url, bucket = %influx.bucket, "Using InfluxDB store");
            Arc::new(InfluxClient::new(influx)?)
        }
        StoreConfig::Memory { bucket } => {
            info!(%bucket, "Using in-memory store");
            Arc::new(MemoryStore::new(bucket.clone()))
        }
    };
    let registry = Arc::new(DeviceRegistry::open(&config.registry_path)?);

    let app = api::router(AppState { store, registry }, config.request_timeout);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| TelemetryError::Internal(format!("Failed to bind to address: {}", e)))?;
    info!("Listening on {}", addr);

    let shutdown = CancellationToken::new();
    let simulator = if config.simulator.enabled {
        let sink = HttpSink::new(&config.simulator.api_url, config.simulator.request_timeout)?;
        info!(target_url = sink.write_url(), "Simulated devices will post readings");
        Some(
            Simulator::new(default_fleet(), config.simulator.clone(), Arc::new(sink))
                .start(shutdown.child_token()),
        )
    } else {
        None
    };

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => info!("Shutdown requested"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                },
                _ = signal.cancelled() => {}
            }
        })
        .await
        .map_err(|e| TelemetryError::Internal(format!("Server error: {}", e)))?;

    shutdown.cancel();
    if let Some(simulator) = simulator {
        simulator.shutdown().await;
    }
    Ok(())
}
