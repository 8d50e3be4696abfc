use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{point::Point, query::RangeQuerySpec, Result, TelemetryError};

/// Body of `POST /data/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub measurement: String,
    #[serde(default)]
    pub tag: BTreeMap<String, String>,
    #[serde(default)]
    pub field: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WriteRequest {
    pub fn into_point(self) -> Result<Point> {
        if self.field.is_empty() {
            return Err(TelemetryError::BadRequest("No field values provided".to_string()));
        }
        Point::new(self.measurement, self.tag, self.field, self.timestamp)
    }
}

/// Body of `POST /data/read/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub time_interval: u32,
    pub measurement_name: String,
    #[serde(default)]
    pub tag: BTreeMap<String, String>,
    pub field: Vec<String>,
}

impl TryFrom<ReadRequest> for RangeQuerySpec {
    type Error = TelemetryError;

    fn try_from(request: ReadRequest) -> Result<Self> {
        RangeQuerySpec::new(
            request.time_interval,
            request.measurement_name,
            request.tag,
            request.field,
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub location: String,
    pub name: String,
    pub quantity_measured: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceListQuery {
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub device_id: Option<String>,
}

fn default_limit() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_request_without_fields_is_bad_request() {
        let request: WriteRequest = serde_json::from_value(json!({
            "measurement": "weather",
            "tag": {"device_id": "dev-temp-001"},
            "field": {}
        }))
        .unwrap();
        let err = request.into_point().unwrap_err();
        assert!(matches!(err, TelemetryError::BadRequest(_)));
    }

    #[test]
    fn test_write_request_into_point() {
        let request: WriteRequest = serde_json::from_value(json!({
            "measurement": "weather",
            "tag": {"device_id": "dev-temp-001"},
            "field": {"temperature": 21.5},
            "timestamp": "2023-11-14T22:13:20+00:00"
        }))
        .unwrap();
        let point = request.into_point().unwrap();
        assert_eq!(point.timestamp().timestamp(), 1_700_000_000);
        assert_eq!(point.tags()["device_id"], "dev-temp-001");
    }

    #[test]
    fn test_read_request_into_spec() {
        let request: ReadRequest = serde_json::from_value(json!({
            "time_interval": 24,
            "measurement_name": "weather",
            "tag": {},
            "field": ["All"]
        }))
        .unwrap();
        let spec = RangeQuerySpec::try_from(request).unwrap();
        assert_eq!(spec.window_hours, 24);
        assert!(spec.selects_all_fields());
    }

    #[test]
    fn test_negative_interval_does_not_deserialize() {
        let result = serde_json::from_value::<ReadRequest>(json!({
            "time_interval": -1,
            "measurement_name": "weather",
            "field": ["All"]
        }));
        assert!(result.is_err());
    }
}
