// src/tabular.rs
//
// Everything that knows about the legacy `{DataSet:{Table:[...]}}` envelopes and
// the loose scalar encodings the backend uses lives here. Readers above this
// module only see canonical Rust types.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;

pub type Row = Map<String, Value>;

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{4})-(\d{1,2})-(\d{1,2})").expect("valid regex"));
static DMY_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,2})[/-](\d{1,2})[/-](\d{4})").expect("valid regex"));
static LEGACY_MS_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*/Date\((-?\d+)(?:[+-]\d{4})?\)/\s*$").expect("valid regex"));

const ENVELOPE_KEYS: [&str; 3] = ["DataSet", "dataSet", "dataset"];
const TABLE_KEYS: [&str; 3] = ["Table", "table", "Table1"];

/// Flattens any accepted envelope into its rows. Non-object entries are dropped.
pub fn table_rows(payload: &Value) -> Vec<Row> {
    match payload {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        Value::Object(obj) => {
            if let Some(inner) = first_present(obj, &ENVELOPE_KEYS) {
                return table_rows(inner);
            }
            if let Some(table) = first_present(obj, &TABLE_KEYS) {
                return table_rows(table);
            }
            vec![obj.clone()]
        }
        _ => Vec::new(),
    }
}

fn first_present<'a>(obj: &'a Row, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// First non-null value among `aliases`.
pub fn field<'a>(row: &'a Row, aliases: &[&str]) -> Option<&'a Value> {
    first_present(row, aliases)
}

pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "s" | "sim" | "y" | "yes"
        ),
        _ => false,
    }
}

pub fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.replace(',', ".").parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

/// Accepts numbers and strings, with either `.` or `,` as decimal separator.
pub fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(&s.trim().replace(',', ".")).ok(),
        _ => None,
    }
}

/// Parses a calendar date without ever going through a UTC instant, except for
/// `/Date(ms)/` values which are instants by definition and mapped to local time.
pub fn parse_date_str(input: &str) -> Option<NaiveDate> {
    if let Some(caps) = ISO_DATE.captures(input) {
        let y = caps[1].parse().ok()?;
        let m = caps[2].parse().ok()?;
        let d = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }
    if let Some(caps) = DMY_DATE.captures(input) {
        let d = caps[1].parse().ok()?;
        let m = caps[2].parse().ok()?;
        let y = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }
    if let Some(caps) = LEGACY_MS_DATE.captures(input) {
        let millis: i64 = caps[1].parse().ok()?;
        let instant = Utc.timestamp_millis_opt(millis).single()?;
        return Some(instant.with_timezone(&Local).date_naive());
    }
    None
}

pub fn value_to_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_str(s),
        _ => None,
    }
}

/// RFC 3339 timestamps keep their offset; naive ones are read as local time.
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let trimmed = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS.iter().find_map(|fmt| {
        let naive = NaiveDateTime::parse_from_str(trimmed, fmt).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    })
}

/// Picks the human-readable message out of an error body, falling back to the
/// raw text.
pub fn server_message(body: &str) -> String {
    const MESSAGE_KEYS: [&str; 5] = ["message", "mensagem", "error", "erro", "Message"];
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = MESSAGE_KEYS
            .iter()
            .filter_map(|k| obj.get(*k))
            .find_map(value_to_string)
        {
            return msg;
        }
    }
    body.trim().to_string()
}
