//! Process configuration, read once from the environment at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{Result, TelemetryError};

pub const DEFAULT_INFLUX_URL: &str = "https://us-east-1-1.aws.cloud2.influxdata.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreConfig,
    /// DuckDB file backing the device registry; `:memory:` keeps it in RAM.
    pub registry_path: String,
    pub request_timeout: Duration,
    pub log_format: LogFormat,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Influx(InfluxConfig),
    Memory { bucket: String },
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// Upper bound on every store call.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub enabled: bool,
    /// Base URL of the service whose ingestion endpoint receives readings.
    pub api_url: String,
    pub measurement: String,
    pub interval: Duration,
    pub initial_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "http://localhost:8000".to_string(),
            measurement: "weather".to_string(),
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = parse_var("PORT", 8000)?;

        let store = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "influx".to_string())
            .as_str()
        {
            "influx" => StoreConfig::Influx(InfluxConfig {
                url: env::var("INFLUX_URL").unwrap_or_else(|_| DEFAULT_INFLUX_URL.to_string()),
                token: required_var("INFLUX_TOKEN")?,
                org: required_var("INFLUX_ORG")?,
                bucket: required_var("INFLUX_BUCKET")?,
                timeout: Duration::from_secs(parse_var("STORE_TIMEOUT_SECS", 10)?),
            }),
            "memory" => StoreConfig::Memory {
                bucket: env::var("INFLUX_BUCKET").unwrap_or_else(|_| "iot".to_string()),
            },
            other => {
                return Err(TelemetryError::Config(format!(
                    "Invalid STORE_BACKEND {:?}. Must be 'influx' or 'memory'",
                    other
                )))
            }
        };

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        Ok(Self {
            port,
            store,
            registry_path: env::var("REGISTRY_PATH").unwrap_or_else(|_| "devices.duckdb".to_string()),
            request_timeout: Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", 30)?),
            log_format,
            simulator: SimulatorConfig::from_env(port)?,
        })
    }
}

impl SimulatorConfig {
    pub fn from_env(port: u16) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            enabled: parse_var("SIMULATOR_ENABLED", defaults.enabled)?,
            api_url: env::var("SIMULATOR_API_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            measurement: env::var("SIMULATOR_MEASUREMENT").unwrap_or(defaults.measurement),
            interval: Duration::from_secs(parse_var(
                "SIMULATOR_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
            initial_delay: Duration::from_secs(parse_var(
                "SIMULATOR_INITIAL_DELAY_SECS",
                defaults.initial_delay.as_secs(),
            )?),
            request_timeout: defaults.request_timeout,
        })
    }
}

fn required_var(key: &str) -> Result<String> {
    env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| TelemetryError::Config(format!("{} must be set", key)))
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| TelemetryError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}
