pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod point;
pub mod query;
pub mod registry;
pub mod shaping;
pub mod simulator;
pub mod store;

pub use error::{Result, TelemetryError};
