//! Translation of a structured range read into Flux query text.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::{Result, TelemetryError};

/// Field selector that disables the field filter when it is the only entry.
pub const ALL_FIELDS: &str = "All";

/// One range read: lookback window, measurement and equality filters.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuerySpec {
    pub window_hours: u32,
    pub measurement: String,
    /// ANDed equality filters.
    pub tags: BTreeMap<String, String>,
    /// ORed equality filters on the field name.
    pub fields: Vec<String>,
}

impl RangeQuerySpec {
    pub fn new(
        window_hours: u32,
        measurement: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: Vec<String>,
    ) -> Result<Self> {
        if fields.is_empty() {
            return Err(TelemetryError::Validation(format!(
                "at least one field (or \"{}\") is required",
                ALL_FIELDS
            )));
        }

        Ok(Self {
            window_hours,
            measurement: measurement.into(),
            tags,
            fields,
        })
    }

    pub fn selects_all_fields(&self) -> bool {
        self.fields.len() == 1 && self.fields[0] == ALL_FIELDS
    }

    /// Field names with duplicates removed, in first-seen order.
    fn distinct_fields(&self) -> Vec<&str> {
        let mut seen = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            if !seen.contains(&field.as_str()) {
                seen.push(field.as_str());
            }
        }
        seen
    }
}

/// Renders the spec as a Flux pipeline against `bucket`.
///
/// Clause order is fixed: source, range, measurement, one filter per tag,
/// then a single ORed field filter (omitted for [`ALL_FIELDS`]). String
/// values are quoted with [`flux_string`]; the comparison semantics are
/// plain equality either way.
pub fn build_query(bucket: &str, spec: &RangeQuerySpec) -> String {
    let mut query = format!("from(bucket: {})", flux_string(bucket));
    let _ = write!(query, "\n  |> range(start: -{}h)", spec.window_hours);
    let _ = write!(
        query,
        "\n  |> filter(fn: (r) => r[\"_measurement\"] == {})",
        flux_string(&spec.measurement)
    );

    for (key, value) in &spec.tags {
        let _ = write!(
            query,
            "\n  |> filter(fn: (r) => r[{}] == {})",
            flux_string(key),
            flux_string(value)
        );
    }

    if !spec.selects_all_fields() {
        let predicate = spec
            .distinct_fields()
            .into_iter()
            .map(|field| format!("r[\"_field\"] == {}", flux_string(field)))
            .collect::<Vec<_>>()
            .join(" or ");
        let _ = write!(query, "\n  |> filter(fn: (r) => {})", predicate);
    }

    query
}

/// Quotes a value as a Flux string literal.
pub fn flux_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '$' => quoted.push_str("\\$"),
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(fields: &[&str]) -> RangeQuerySpec {
        let mut tags = BTreeMap::new();
        tags.insert("device_id".to_string(), "dev-temp-001".to_string());
        RangeQuerySpec::new(
            24,
            "weather",
            tags,
            fields.iter().map(|f| f.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_all_fields_has_no_field_clause() {
        let query = build_query("iot", &spec(&["All"]));
        assert_eq!(
            query,
            "from(bucket: \"iot\")\n  |> range(start: -24h)\n  |> filter(fn: (r) => r[\"_measurement\"] == \"weather\")\n  |> filter(fn: (r) => r[\"device_id\"] == \"dev-temp-001\")"
        );
        assert!(!query.contains("_field"));
    }

    #[test]
    fn test_field_clause_is_or_of_fields() {
        let query = build_query("iot", &spec(&["temperature", "pressure"]));
        assert!(query.ends_with(
            "|> filter(fn: (r) => r[\"_field\"] == \"temperature\" or r[\"_field\"] == \"pressure\")"
        ));
        assert_eq!(query.matches("_field").count(), 2);
    }

    #[test]
    fn test_duplicate_fields_appear_once() {
        let query = build_query("iot", &spec(&["temperature", "temperature", "wind_speed"]));
        assert_eq!(query.matches("\"temperature\"").count(), 1);
        assert_eq!(query.matches("\"wind_speed\"").count(), 1);
    }

    #[test]
    fn test_all_mixed_with_other_fields_is_a_filter() {
        let query = build_query("iot", &spec(&["All", "temperature"]));
        assert!(query.contains("r[\"_field\"] == \"All\" or r[\"_field\"] == \"temperature\""));
    }

    #[test]
    fn test_clause_order() {
        let query = build_query("iot", &spec(&["temperature"]));
        let source = query.find("from(").unwrap();
        let range = query.find("range(").unwrap();
        let measurement = query.find("_measurement").unwrap();
        let tag = query.find("device_id").unwrap();
        let field = query.find("_field").unwrap();
        assert!(source < range && range < measurement && measurement < tag && tag < field);
    }

    #[test]
    fn test_empty_fields_rejected() {
        let err = RangeQuerySpec::new(1, "weather", BTreeMap::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, TelemetryError::Validation(_)));
    }

    #[test]
    fn test_quotes_cannot_break_out_of_literal() {
        let mut tags = BTreeMap::new();
        tags.insert(
            "device_id".to_string(),
            "x\") |> drop(columns: [\"_value\"]) //".to_string(),
        );
        let spec = RangeQuerySpec::new(1, "weather", tags, vec!["All".to_string()]).unwrap();
        let query = build_query("iot", &spec);
        assert!(query.contains("== \"x\\\") |> drop(columns: [\\\"_value\\\"]) //\")"));
    }

    #[test]
    fn test_flux_string() {
        assert_eq!(flux_string("plain"), "\"plain\"");
        assert_eq!(flux_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(flux_string("a\\b"), "\"a\\\\b\"");
        assert_eq!(flux_string("${x}"), "\"\\${x}\"");
    }
}
