// src/holidays.rs

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::tabular::{field, parse_date_str, table_rows, value_to_date, Row};

pub const DATE_ALIASES: [&str; 15] = [
    "data",
    "Data",
    "date",
    "Date",
    "dia",
    "Dia",
    "DataFeriado",
    "dataFeriado",
    "feriado",
    "Feriado",
    "dataInicio",
    "DataInicio",
    "inicio",
    "start",
    "startDate",
];

pub const END_ALIASES: [&str; 7] = ["dataFim", "DataFim", "fim", "Fim", "end", "endDate", "ate"];

/// Upper bound on a single range expansion, guards against garbage end dates.
const MAX_RANGE_DAYS: i64 = 366;

/// Canonical holiday keys for one year. Replaced wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolidaySet {
    days: BTreeSet<NaiveDate>,
}

impl HolidaySet {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.days.contains(&date)
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NaiveDate> {
        self.days.iter()
    }

    /// `YYYY-MM-DD` keys in ascending order.
    pub fn keys(&self) -> Vec<String> {
        self.days
            .iter()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect()
    }
}

impl FromIterator<NaiveDate> for HolidaySet {
    fn from_iter<I: IntoIterator<Item = NaiveDate>>(iter: I) -> Self {
        Self {
            days: iter.into_iter().collect(),
        }
    }
}

/// Every calendar day in `[start, end]`, inclusive. Reversed bounds are swapped.
pub fn expand_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let (start, end) = if start <= end { (start, end) } else { (end, start) };
    start.iter_days().take_while(|d| *d <= end).collect()
}

fn row_days(row: &Row) -> Vec<NaiveDate> {
    let start = field(row, &DATE_ALIASES).and_then(value_to_date);
    let end = field(row, &END_ALIASES).and_then(value_to_date);
    match (start, end) {
        (Some(start), Some(end)) => {
            if (end - start).num_days().abs() > MAX_RANGE_DAYS {
                warn!("Ignoring holiday range {}..{}: too long", start, end);
                return vec![start];
            }
            expand_days(start, end)
        }
        (Some(start), None) => vec![start],
        (None, _) => Vec::new(),
    }
}

/// Converts any accepted holiday payload into the set of days in `year`.
pub fn normalize_holidays(payload: &Value, year: i32) -> HolidaySet {
    let mut days = BTreeSet::new();
    let mut skipped = 0usize;

    let strings: Vec<&str> = match payload {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        Value::String(s) => vec![s.as_str()],
        _ => Vec::new(),
    };
    for s in strings {
        match parse_date_str(s) {
            Some(d) => {
                days.insert(d);
            }
            None => skipped += 1,
        }
    }

    for row in table_rows(payload) {
        let expanded = row_days(&row);
        if expanded.is_empty() {
            skipped += 1;
        }
        days.extend(expanded);
    }

    if skipped > 0 {
        debug!("Skipped {} holiday entries without a usable date", skipped);
    }

    days.into_iter().filter(|d| d.year() == year).collect()
}
