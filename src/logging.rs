use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{config::LogFormat, Result, TelemetryError};

const DEFAULT_FILTER: &str = "iot_telemetry=info,device_simulator=info,tower_http=info";

/// Sets up the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_logger(format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_level(true)
                    .compact(),
            )
            .try_init(),
    };

    result.map_err(|e| TelemetryError::Internal(format!("Failed to initialize logger: {}", e)))
}
