//! In-process store for local runs and tests.
//!
//! Understands the pipeline produced by [`crate::query::build_query`]:
//! a bucket source, a `range(start: -Nh)` clause and any number of
//! `filter` clauses made of `r["column"] == "value"` comparisons joined
//! with `or`. Anything else is reported as a query error.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{RawRow, TimeSeriesStore};
use crate::{point::Point, Result, TelemetryError};

#[derive(Debug, Clone)]
pub struct MemoryStore {
    bucket: String,
    points: Arc<RwLock<Vec<Point>>>,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            points: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn write(&self, point: &Point) -> Result<()> {
        // Same acceptance rule as the remote store: it must serialize.
        point.to_line_protocol()?;
        self.points.write().await.push(point.clone());
        Ok(())
    }

    async fn query(&self, flux: &str) -> Result<Vec<RawRow>> {
        let plan = Plan::parse(flux)?;
        if plan.bucket != self.bucket {
            return Err(TelemetryError::QuerySyntax(format!(
                "bucket {:?} not found",
                plan.bucket
            )));
        }

        let now = Utc::now();
        // A window reaching past the representable range covers everything.
        let start = now
            .checked_sub_signed(Duration::hours(i64::from(plan.window_hours)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let points = self.points.read().await;
        let mut rows: Vec<RawRow> = points
            .iter()
            .filter(|p| p.timestamp() >= start && p.timestamp() <= now)
            .flat_map(|p| {
                p.fields().iter().map(move |(field, value)| RawRow {
                    time: p.timestamp(),
                    measurement: p.measurement().to_string(),
                    field: field.clone(),
                    value: serde_json::Number::from_f64(*value)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null),
                    tags: p.tags().clone(),
                })
            })
            .filter(|row| plan.matches(row))
            .collect();

        // One table per series, each in ascending time.
        rows.sort_by(|a, b| {
            (&a.measurement, &a.tags, &a.field, a.time)
                .cmp(&(&b.measurement, &b.tags, &b.field, b.time))
        });
        Ok(rows)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Parsed form of the supported Flux pipeline.
#[derive(Debug, PartialEq)]
struct Plan {
    bucket: String,
    window_hours: u32,
    /// Each entry is an OR of `(column, value)` equalities; entries are ANDed.
    filters: Vec<Vec<(String, String)>>,
}

impl Plan {
    fn parse(flux: &str) -> Result<Self> {
        let mut cursor = Cursor::new(flux);

        cursor.expect("from(bucket:")?;
        let bucket = cursor.string_literal()?;
        cursor.expect(")")?;

        let mut window_hours = None;
        let mut filters = Vec::new();

        while !cursor.at_end() {
            cursor.expect("|>")?;
            if cursor.consume("range(start:") {
                cursor.expect("-")?;
                window_hours = Some(cursor.number()?);
                cursor.expect("h")?;
                cursor.expect(")")?;
            } else if cursor.consume("filter(fn:") {
                cursor.expect("(r)")?;
                cursor.expect("=>")?;
                let mut any_of = Vec::new();
                loop {
                    cursor.expect("r[")?;
                    let column = cursor.string_literal()?;
                    cursor.expect("]")?;
                    cursor.expect("==")?;
                    let value = cursor.string_literal()?;
                    any_of.push((column, value));
                    if !cursor.consume("or ") {
                        break;
                    }
                }
                cursor.expect(")")?;
                filters.push(any_of);
            } else {
                return Err(cursor.error("unsupported pipeline stage"));
            }
        }

        let window_hours = window_hours
            .ok_or_else(|| TelemetryError::QuerySyntax("query must contain a range".to_string()))?;

        Ok(Self {
            bucket,
            window_hours,
            filters,
        })
    }

    fn matches(&self, row: &RawRow) -> bool {
        self.filters.iter().all(|any_of| {
            any_of.iter().any(|(column, value)| {
                let actual = match column.as_str() {
                    "_measurement" => Some(row.measurement.as_str()),
                    "_field" => Some(row.field.as_str()),
                    tag => row.tags.get(tag).map(String::as_str),
                };
                actual == Some(value.as_str())
            })
        })
    }
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.rest.is_empty()
    }

    /// Consumes `token` (ignoring spaces inside it) if it comes next.
    fn consume(&mut self, token: &str) -> bool {
        let saved = self.rest;
        for part in token.split_whitespace() {
            self.skip_ws();
            match self.rest.strip_prefix(part) {
                Some(rest) => self.rest = rest,
                None => {
                    self.rest = saved;
                    return false;
                }
            }
        }
        // A trailing space in the token demands a separator.
        if token.ends_with(' ') && !self.rest.starts_with(char::is_whitespace) {
            self.rest = saved;
            return false;
        }
        true
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.consume(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", token.trim())))
        }
    }

    fn number(&mut self) -> Result<u32> {
        self.skip_ws();
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        let (digits, rest) = self.rest.split_at(end);
        let value = digits
            .parse()
            .map_err(|_| self.error("expected a duration"))?;
        self.rest = rest;
        Ok(value)
    }

    fn string_literal(&mut self) -> Result<String> {
        self.skip_ws();
        let input = self.rest;
        let mut chars = input.char_indices();
        if !matches!(chars.next(), Some((_, '"'))) {
            return Err(self.error("expected a string literal"));
        }

        let mut value = String::new();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.rest = &input[i + 1..];
                    return Ok(value);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, escaped @ ('\\' | '"' | '$'))) => value.push(escaped),
                    _ => return Err(self.error("invalid escape in string literal")),
                },
                _ => value.push(c),
            }
        }

        Err(self.error("unterminated string literal"))
    }

    fn error(&self, what: &str) -> TelemetryError {
        let near: String = self.rest.chars().take(24).collect();
        TelemetryError::QuerySyntax(format!("{} near {:?}", what, near))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{build_query, RangeQuerySpec};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn point(device: &str, field: &str, value: f64, at: DateTime<Utc>) -> Point {
        Point::builder("weather")
            .tag("device_id", device)
            .field(field, value)
            .timestamp(at)
            .build()
            .unwrap()
    }

    fn spec(tags: &[(&str, &str)], fields: &[&str]) -> RangeQuerySpec {
        RangeQuerySpec::new(
            1,
            "weather",
            tags.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            fields.iter().map(|f| f.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_built_query() {
        let query = build_query("iot", &spec(&[("device_id", "a\"b")], &["x", "y"]));
        let plan = Plan::parse(&query).unwrap();
        assert_eq!(
            plan,
            Plan {
                bucket: "iot".to_string(),
                window_hours: 1,
                filters: vec![
                    vec![("_measurement".to_string(), "weather".to_string())],
                    vec![("device_id".to_string(), "a\"b".to_string())],
                    vec![
                        ("_field".to_string(), "x".to_string()),
                        ("_field".to_string(), "y".to_string()),
                    ],
                ],
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_stage() {
        let err = Plan::parse("from(bucket: \"iot\") |> range(start: -1h) |> drop(columns: [\"x\"])")
            .unwrap_err();
        assert!(matches!(err, TelemetryError::QuerySyntax(_)));

        let err = Plan::parse("from(bucket: \"iot\")").unwrap_err();
        assert!(matches!(err, TelemetryError::QuerySyntax(_)));
    }

    #[tokio::test]
    async fn test_query_filters_and_window() {
        let store = MemoryStore::new("iot");
        let now = Utc::now();
        store.write(&point("dev-a", "temperature", 21.5, now - Duration::minutes(5))).await.unwrap();
        store.write(&point("dev-b", "pressure", 990.0, now - Duration::minutes(4))).await.unwrap();
        store.write(&point("dev-a", "temperature", 30.0, now - Duration::hours(3))).await.unwrap();

        let rows = store
            .query(&build_query("iot", &spec(&[("device_id", "dev-a")], &["All"])))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, json!(21.5));

        let rows = store
            .query(&build_query("iot", &spec(&[], &["pressure", "wind_speed"])))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field, "pressure");
    }

    #[tokio::test]
    async fn test_huge_window_is_unbounded() {
        let store = MemoryStore::new("iot");
        let old = Utc::now() - Duration::days(365 * 50);
        store.write(&point("dev-a", "temperature", 21.5, old)).await.unwrap();

        let spec = RangeQuerySpec::new(u32::MAX, "weather", BTreeMap::new(), vec!["All".to_string()])
            .unwrap();
        let rows = store.query(&build_query("iot", &spec)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, old);
    }

    #[tokio::test]
    async fn test_rows_grouped_by_series_in_time_order() {
        let store = MemoryStore::new("iot");
        let now = Utc::now();
        store.write(&point("dev-b", "pressure", 2.0, now - Duration::minutes(1))).await.unwrap();
        store.write(&point("dev-a", "temperature", 1.0, now - Duration::minutes(2))).await.unwrap();
        store.write(&point("dev-b", "pressure", 3.0, now - Duration::minutes(3))).await.unwrap();

        let rows = store
            .query(&build_query("iot", &spec(&[], &["All"])))
            .await
            .unwrap();
        let values: Vec<_> = rows.iter().map(|r| r.value.clone()).collect();
        assert_eq!(values, vec![json!(1.0), json!(3.0), json!(2.0)]);
    }

    #[tokio::test]
    async fn test_unknown_bucket() {
        let store = MemoryStore::new("iot");
        let err = store
            .query(&build_query("other", &spec(&[], &["All"])))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::QuerySyntax(_)));
    }
}
