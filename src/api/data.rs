use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use tracing::{debug, info};

use super::AppState;
use crate::{
    metrics::{self, RequestTimer},
    models::{Acknowledgement, ReadRequest, WriteRequest},
    query::{build_query, RangeQuerySpec},
    shaping::{shape, DeviceSeries},
    store::TimeSeriesStore,
    Result, TelemetryError,
};

/// Validates a write request and stores it as exactly one point.
pub async fn ingest(store: &dyn TimeSeriesStore, request: WriteRequest) -> Result<()> {
    let point = request.into_point()?;

    let result = store.write(&point).await;
    metrics::record_write(result.is_ok());
    result?;

    debug!(measurement = point.measurement(), "Point recorded");
    Ok(())
}

/// Runs a range read and groups the rows by device.
pub async fn read_series(store: &dyn TimeSeriesStore, spec: &RangeQuerySpec) -> Result<DeviceSeries> {
    let flux = build_query(store.bucket(), spec);
    debug!(%flux, "Executing range query");

    let result = store.query(&flux).await;
    metrics::record_query(result.is_ok());

    Ok(shape(result?))
}

pub async fn record_data(
    State(state): State<AppState>,
    payload: std::result::Result<Json<WriteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Acknowledgement>)> {
    let _timer = RequestTimer::new("record_data");
    let Json(request) = payload.map_err(no_data)?;
    info!(measurement = %request.measurement, fields = request.field.len(), "Recording data");

    ingest(state.store.as_ref(), request).await?;

    Ok((
        StatusCode::CREATED,
        Json(Acknowledgement {
            message: "Recorded!".to_string(),
        }),
    ))
}

pub async fn read_data(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ReadRequest>, JsonRejection>,
) -> Result<Json<DeviceSeries>> {
    let _timer = RequestTimer::new("read_data");
    let Json(request) = payload.map_err(no_data)?;
    let spec = RangeQuerySpec::try_from(request)?;
    info!(
        measurement = %spec.measurement,
        window_hours = spec.window_hours,
        "Reading data"
    );

    let series = read_series(state.store.as_ref(), &spec).await?;
    Ok(Json(series))
}

fn no_data(rejection: JsonRejection) -> TelemetryError {
    TelemetryError::BadRequest(format!("No data provided: {}", rejection.body_text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RawRow};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and fails every one of them.
    #[derive(Default)]
    struct DownStore {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl TimeSeriesStore for DownStore {
        fn bucket(&self) -> &str {
            "iot"
        }

        async fn write(&self, _point: &crate::point::Point) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(TelemetryError::StoreUnavailable("connection refused".to_string()))
        }

        async fn query(&self, _flux: &str) -> Result<Vec<RawRow>> {
            Err(TelemetryError::StoreUnavailable("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<()> {
            Err(TelemetryError::StoreUnavailable("connection refused".to_string()))
        }
    }

    fn write_request(field: BTreeMap<String, f64>) -> WriteRequest {
        let mut tag = BTreeMap::new();
        tag.insert("device_id".to_string(), "dev-temp-001".to_string());
        WriteRequest {
            measurement: "weather".to_string(),
            tag,
            field,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_empty_fields_never_reach_store() {
        let store = DownStore::default();
        let err = ingest(&store, write_request(BTreeMap::new())).await.unwrap_err();

        assert!(matches!(err, TelemetryError::BadRequest(_)));
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = DownStore::default();
        let mut field = BTreeMap::new();
        field.insert("temperature".to_string(), 21.5);

        let err = ingest(&store, write_request(field)).await.unwrap_err();
        assert!(matches!(err, TelemetryError::StoreUnavailable(_)));
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = MemoryStore::new("iot");
        let written_at = Utc::now() - Duration::minutes(10);
        let written_at = Utc.timestamp_opt(written_at.timestamp(), 0).unwrap();

        let mut field = BTreeMap::new();
        field.insert("temperature".to_string(), 21.5);
        let mut request = write_request(field);
        request.timestamp = Some(written_at);
        ingest(&store, request).await.unwrap();

        let mut tags = BTreeMap::new();
        tags.insert("device_id".to_string(), "dev-temp-001".to_string());
        let spec = RangeQuerySpec::new(1, "weather", tags, vec!["All".to_string()]).unwrap();

        let series = read_series(&store, &spec).await.unwrap();
        assert_eq!(series.len(), 1);
        let records = &series["dev-temp-001"];
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, json!(21.5));
        assert_eq!(records[0].time, written_at);
        assert_eq!(records[0].field, "temperature");
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_mapping() {
        let store = MemoryStore::new("iot");
        let spec = RangeQuerySpec::new(24, "weather", BTreeMap::new(), vec!["All".to_string()])
            .unwrap();

        let series = read_series(&store, &spec).await.unwrap();
        assert_eq!(series, DeviceSeries::new());
    }

    #[tokio::test]
    async fn test_repeated_reads_are_identical() {
        let store = MemoryStore::new("iot");
        for (i, device) in ["dev-a", "dev-b", "dev-a"].into_iter().enumerate() {
            let mut field = BTreeMap::new();
            field.insert("temperature".to_string(), i as f64);
            let mut request = write_request(field);
            request.tag.insert("device_id".to_string(), device.to_string());
            request.timestamp = Some(Utc::now() - Duration::minutes(i as i64 + 1));
            ingest(&store, request).await.unwrap();
        }

        let spec = RangeQuerySpec::new(1, "weather", BTreeMap::new(), vec!["All".to_string()])
            .unwrap();
        let first = read_series(&store, &spec).await.unwrap();
        let second = read_series(&store, &spec).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["dev-a"].len(), 2);
    }
}
