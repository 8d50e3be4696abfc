//! Parser for the CSV result format returned by the Flux query API.
//!
//! A response is a sequence of tables separated by blank lines. Each table
//! starts with an optional block of `#` annotation rows and a header row;
//! the first column is always the (empty) annotation column.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::RawRow;
use crate::{Result, TelemetryError};

/// Columns that describe the query rather than the series.
const BOOKKEEPING_COLUMNS: &[&str] = &["", "result", "table", "_start", "_stop"];

pub fn parse(body: &str) -> Result<Vec<RawRow>> {
    let mut rows = Vec::new();
    let mut header: Option<Vec<String>> = None;

    for line in body.lines() {
        if line.trim().is_empty() {
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let cells = split_record(line)?;
        match &header {
            None => header = Some(cells),
            Some(columns) => {
                if let Some(index) = columns.iter().position(|c| c == "error") {
                    let message = cells.into_iter().nth(index).unwrap_or_default();
                    return Err(TelemetryError::QuerySyntax(message));
                }
                rows.push(to_row(columns, cells)?);
            }
        }
    }

    Ok(rows)
}

fn to_row(columns: &[String], cells: Vec<String>) -> Result<RawRow> {
    if cells.len() != columns.len() {
        return Err(TelemetryError::QuerySyntax(format!(
            "row has {} cells but the header has {}",
            cells.len(),
            columns.len()
        )));
    }

    let mut time = None;
    let mut measurement = String::new();
    let mut field = String::new();
    let mut value = serde_json::Value::Null;
    let mut tags = BTreeMap::new();

    for (column, cell) in columns.iter().zip(cells) {
        match column.as_str() {
            name if BOOKKEEPING_COLUMNS.contains(&name) => {}
            "_time" => time = Some(parse_time(&cell)?),
            "_measurement" => measurement = cell,
            "_field" => field = cell,
            "_value" => value = parse_value(cell),
            _ => {
                if !cell.is_empty() {
                    tags.insert(column.clone(), cell);
                }
            }
        }
    }

    let time = time.ok_or_else(|| {
        TelemetryError::QuerySyntax("result table has no _time column".to_string())
    })?;

    Ok(RawRow {
        time,
        measurement,
        field,
        value,
        tags,
    })
}

fn parse_time(cell: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(cell)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TelemetryError::QuerySyntax(format!("bad _time {:?}: {}", cell, e)))
}

fn parse_value(cell: String) -> serde_json::Value {
    cell.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::String(cell))
}

/// Splits one CSV record, honouring double quotes and `""` escapes.
fn split_record(line: &str) -> Result<Vec<String>> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                cell.push('"');
            }
            ('"', true) => in_quotes = false,
            ('"', false) if cell.is_empty() => in_quotes = true,
            (',', false) => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }

    if in_quotes {
        return Err(TelemetryError::QuerySyntax(format!(
            "unterminated quote in {:?}",
            line
        )));
    }
    cells.push(cell);
    Ok(cells)
}
