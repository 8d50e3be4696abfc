//! Background fleet of virtual devices.
//!
//! Every device gets its own task that samples a bounded random value,
//! submits it through a [`ReadingSink`] and sleeps until the next tick.
//! Tasks share nothing but the sink, so a failing or panicking device
//! never holds up the rest of the fleet.

pub mod sink;

use chrono::Utc;
use futures::FutureExt;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{config::SimulatorConfig, metrics, models::WriteRequest, shaping::DEVICE_TAG};
use crate::{Result, TelemetryError};

pub use sink::{HttpSink, ReadingSink};

/// Decimal places kept on every simulated value.
const PRECISION: i32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualDevice {
    pub device_id: String,
    pub field_name: String,
    pub min_value: f64,
    pub max_value: f64,
}

impl VirtualDevice {
    pub fn new(
        device_id: impl Into<String>,
        field_name: impl Into<String>,
        min_value: f64,
        max_value: f64,
    ) -> Result<Self> {
        if !min_value.is_finite() || !max_value.is_finite() || min_value > max_value {
            return Err(TelemetryError::Validation(format!(
                "invalid value range [{}, {}]",
                min_value, max_value
            )));
        }

        Ok(Self {
            device_id: device_id.into(),
            field_name: field_name.into(),
            min_value,
            max_value,
        })
    }

    /// Draws a value uniformly from `[min_value, max_value]`, rounded to
    /// two decimals.
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        let raw = rng.gen_range(self.min_value..=self.max_value);
        let scale = 10f64.powi(PRECISION);
        ((raw * scale).round() / scale).clamp(self.min_value, self.max_value)
    }

    pub fn reading(&self, measurement: &str, value: f64) -> WriteRequest {
        let mut tag = BTreeMap::new();
        tag.insert(DEVICE_TAG.to_string(), self.device_id.clone());
        let mut field = BTreeMap::new();
        field.insert(self.field_name.clone(), value);

        WriteRequest {
            measurement: measurement.to_string(),
            tag,
            field,
            timestamp: Some(Utc::now()),
        }
    }
}

/// The fixed fleet started alongside the service.
pub fn default_fleet() -> Vec<VirtualDevice> {
    vec![
        VirtualDevice {
            device_id: "dev-temp-001".to_string(),
            field_name: "temperature".to_string(),
            min_value: 20.0,
            max_value: 40.0,
        },
        VirtualDevice {
            device_id: "dev-press-001".to_string(),
            field_name: "pressure".to_string(),
            min_value: 800.0,
            max_value: 1200.0,
        },
        VirtualDevice {
            device_id: "dev-wind-001".to_string(),
            field_name: "wind_speed".to_string(),
            min_value: 0.0,
            max_value: 60.0,
        },
    ]
}

pub struct Simulator {
    devices: Vec<VirtualDevice>,
    config: SimulatorConfig,
    sink: Arc<dyn ReadingSink>,
}

impl Simulator {
    pub fn new(
        devices: Vec<VirtualDevice>,
        config: SimulatorConfig,
        sink: Arc<dyn ReadingSink>,
    ) -> Self {
        Self {
            devices,
            config,
            sink,
        }
    }

    /// Spawns one task per device. Tasks stop when `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> SimulatorHandle {
        info!(devices = self.devices.len(), "Starting device simulation");

        let tasks = self
            .devices
            .into_iter()
            .map(|device| {
                let device_id = device.device_id.clone();
                let task = tokio::spawn(run_device(
                    device,
                    self.config.clone(),
                    Arc::clone(&self.sink),
                    shutdown.clone(),
                ));
                (device_id, task)
            })
            .collect();

        SimulatorHandle { shutdown, tasks }
    }
}

pub struct SimulatorHandle {
    shutdown: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl SimulatorHandle {
    pub fn device_count(&self) -> usize {
        self.tasks.len()
    }

    /// Device ids whose loop is still running.
    pub fn running(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Runs the fleet until `signal` resolves, then shuts it down.
    ///
    /// The fleet is stopped even when the signal itself fails; that error
    /// is returned afterwards.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let result = signal.await;
        match &result {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        self.shutdown().await;
        result.map_err(|e| TelemetryError::Internal(format!("Failed to listen for shutdown signal: {}", e)))
    }

    /// Signals every device loop to stop and waits for them to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        let (ids, tasks): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (device_id, result) in ids.iter().zip(futures::future::join_all(tasks).await) {
            if let Err(e) = result {
                error!(%device_id, "Device loop ended abnormally: {}", e);
            }
        }
        info!("Device simulation stopped");
    }
}

async fn run_device(
    device: VirtualDevice,
    config: SimulatorConfig,
    sink: Arc<dyn ReadingSink>,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = shutdown.cancelled() => return,
        _ = tokio::time::sleep(config.initial_delay) => {}
    }
    info!(device_id = %device.device_id, "Device online");

    let mut rng = StdRng::from_entropy();
    loop {
        let value = device.sample(&mut rng);
        let request = device.reading(&config.measurement, value);

        // A panic in the write path counts as one failed submission.
        let submission = AssertUnwindSafe(sink.submit(&request)).catch_unwind();
        let outcome = tokio::select! {
            _ = shutdown.cancelled() => break,
            outcome = submission => outcome.unwrap_or_else(|_| {
                Err(TelemetryError::Submission("submission panicked".to_string()))
            }),
        };
        match outcome {
            Ok(()) => {
                metrics::record_simulated_reading(&device.device_id, true);
                info!(device_id = %device.device_id, value, "Reading sent");
            }
            Err(e) => {
                metrics::record_simulated_reading(&device.device_id, false);
                warn!(device_id = %device.device_id, "Failed send: {}", e);
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}
