//! Regrouping of flat query rows into per-device series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::RawRow;

/// Tag that carries device identity.
pub const DEVICE_TAG: &str = "device_id";

/// Key used for rows that carry no [`DEVICE_TAG`].
pub const UNKNOWN_DEVICE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub time: DateTime<Utc>,
    pub field: String,
    pub value: serde_json::Value,
    pub tags: BTreeMap<String, String>,
}

/// Device id to its records, each list in the order the store returned them.
pub type DeviceSeries = BTreeMap<String, Vec<SeriesRecord>>;

/// Stable partition of `rows` by device. Rows are never reordered within a
/// device.
pub fn shape(rows: impl IntoIterator<Item = RawRow>) -> DeviceSeries {
    let mut series = DeviceSeries::new();

    for row in rows {
        let device = row
            .tags
            .get(DEVICE_TAG)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());

        series.entry(device).or_default().push(SeriesRecord {
            time: row.time,
            field: row.field,
            value: row.value,
            tags: row.tags,
        });
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(device: Option<&str>, secs: i64, value: f64) -> RawRow {
        let mut tags = BTreeMap::new();
        if let Some(device) = device {
            tags.insert(DEVICE_TAG.to_string(), device.to_string());
        }
        RawRow {
            time: Utc.timestamp_opt(secs, 0).unwrap(),
            measurement: "weather".to_string(),
            field: "temperature".to_string(),
            value: json!(value),
            tags,
        }
    }

    #[test]
    fn test_rows_without_device_go_to_unknown() {
        let series = shape(vec![row(None, 1, 1.0), row(Some("dev-a"), 2, 2.0)]);
        assert_eq!(series.len(), 2);
        assert_eq!(series[UNKNOWN_DEVICE].len(), 1);
        assert_eq!(series[UNKNOWN_DEVICE][0].value, json!(1.0));
    }

    #[test]
    fn test_grouping_preserves_arrival_order() {
        // Deliberately out of time order: shaping must not sort.
        let rows = vec![
            row(Some("dev-a"), 30, 3.0),
            row(Some("dev-b"), 5, 9.0),
            row(Some("dev-a"), 10, 1.0),
            row(Some("dev-a"), 20, 2.0),
        ];
        let series = shape(rows);

        let values: Vec<_> = series["dev-a"].iter().map(|r| r.value.clone()).collect();
        assert_eq!(values, vec![json!(3.0), json!(1.0), json!(2.0)]);
        assert_eq!(series["dev-b"].len(), 1);
    }

    #[test]
    fn test_empty_rows_give_empty_mapping() {
        assert!(shape(Vec::new()).is_empty());
    }

    #[test]
    fn test_record_serializes_rfc3339_time() {
        let series = shape(vec![row(Some("dev-a"), 1_700_000_000, 21.5)]);
        let value = serde_json::to_value(&series).unwrap();
        assert_eq!(value["dev-a"][0]["time"], json!("2023-11-14T22:13:20Z"));
        assert_eq!(value["dev-a"][0]["field"], json!("temperature"));
        assert_eq!(value["dev-a"][0]["tags"]["device_id"], json!("dev-a"));
    }
}
