//! In-memory representation of one time-series observation.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::{Result, TelemetryError};

/// One observation: measurement name, tag set, field set and timestamp.
///
/// Tags and fields are kept in sorted maps so the serialized point is
/// deterministic regardless of the order the caller supplied them in.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, f64>,
    timestamp: DateTime<Utc>,
}

impl Point {
    /// Builds a point, stamping it with the current UTC instant when no
    /// timestamp is supplied.
    pub fn new(
        measurement: impl Into<String>,
        tags: impl IntoIterator<Item = (String, String)>,
        fields: impl IntoIterator<Item = (String, f64)>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let mut builder = Point::builder(measurement);
        for (key, value) in tags {
            builder = builder.tag(key, value);
        }
        for (key, value) in fields {
            builder = builder.field(key, value);
        }
        if let Some(ts) = timestamp {
            builder = builder.timestamp(ts);
        }
        builder.build()
    }

    pub fn builder(measurement: impl Into<String>) -> PointBuilder {
        PointBuilder {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn fields(&self) -> &BTreeMap<String, f64> {
        &self.fields
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Serializes the point into line protocol with nanosecond precision.
    ///
    /// `weather,device_id=dev-temp-001 temperature=21.5 1700000000000000000`
    pub fn to_line_protocol(&self) -> Result<String> {
        let nanos = self.timestamp.timestamp_nanos_opt().ok_or_else(|| {
            TelemetryError::Validation(format!(
                "timestamp {} is outside the nanosecond range",
                self.timestamp
            ))
        })?;

        let mut line = escape_measurement(&self.measurement);
        for (key, value) in &self.tags {
            let _ = write!(line, ",{}={}", escape_key(key), escape_key(value));
        }

        let fields = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape_key(key), value))
            .collect::<Vec<_>>()
            .join(",");

        let _ = write!(line, " {} {}", fields, nanos);
        Ok(line)
    }
}

pub struct PointBuilder {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, f64>,
    timestamp: Option<DateTime<Utc>>,
}

impl PointBuilder {
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> Result<Point> {
        if self.measurement.is_empty() {
            return Err(TelemetryError::Validation(
                "measurement must not be empty".to_string(),
            ));
        }
        if self.fields.is_empty() {
            return Err(TelemetryError::Validation(
                "a point needs at least one field".to_string(),
            ));
        }
        if self.tags.keys().any(String::is_empty) {
            return Err(TelemetryError::Validation("empty tag key".to_string()));
        }

        // Line protocol has no escape for line breaks.
        let names = std::iter::once(&self.measurement)
            .chain(self.tags.iter().flat_map(|(k, v)| [k, v]))
            .chain(self.fields.keys());
        for name in names {
            if has_line_break(name) {
                return Err(TelemetryError::Validation(format!(
                    "line breaks are not allowed in names or tag values: {:?}",
                    name
                )));
            }
        }

        for (key, value) in &self.fields {
            if key.is_empty() {
                return Err(TelemetryError::Validation("empty field key".to_string()));
            }
            if !value.is_finite() {
                return Err(TelemetryError::Validation(format!(
                    "field {} has non-finite value {}",
                    key, value
                )));
            }
        }

        Ok(Point {
            measurement: self.measurement,
            tags: self.tags,
            fields: self.fields,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\n', '\r'])
}

fn escape_measurement(value: &str) -> String {
    value.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys share the same escaping rules.
fn escape_key(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
