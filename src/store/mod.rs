//! Facade over the time-series store.
//!
//! Handlers and the simulator only ever see [`TimeSeriesStore`]; the
//! concrete backend is picked once at startup and shared as an
//! `Arc<dyn TimeSeriesStore>`.

pub mod annotated_csv;
pub mod influx;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::{point::Point, Result};

pub use influx::InfluxClient;
pub use memory::MemoryStore;

/// One time-tagged row as returned by a range query.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub time: DateTime<Utc>,
    pub measurement: String,
    pub field: String,
    pub value: serde_json::Value,
    pub tags: BTreeMap<String, String>,
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Name of the bucket queries should select from.
    fn bucket(&self) -> &str;

    /// Writes one point, returning once the store has accepted or rejected it.
    async fn write(&self, point: &Point) -> Result<()>;

    /// Runs a Flux query and returns its rows in store order.
    async fn query(&self, flux: &str) -> Result<Vec<RawRow>>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;
}
