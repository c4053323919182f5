// src/punches.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::models::{de_id, WorkedDuration};
use crate::tabular::{parse_timestamp, value_to_bool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunchKind {
    Entrada,
    Saida,
}

impl PunchKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "entrada" | "in" | "e" => Some(PunchKind::Entrada),
            "saida" | "saída" | "out" | "s" => Some(PunchKind::Saida),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PunchKind::Entrada => "entrada",
            PunchKind::Saida => "saida",
        }
    }
}

/// A single clock event. Never mutated: corrections cancel and recreate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunchEvent {
    pub id: String,
    pub work_site_id: String,
    pub work_site_name: Option<String>,
    pub kind: PunchKind,
    pub timestamp: DateTime<Utc>,
    pub justification: Option<String>,
    pub confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct RawWorkSiteRef {
    #[serde(default)]
    nome: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPunch {
    #[serde(deserialize_with = "de_id")]
    id: String,
    #[serde(alias = "obraId", deserialize_with = "de_id")]
    obra_id: String,
    tipo: String,
    timestamp: String,
    #[serde(default)]
    justificacao: Option<String>,
    #[serde(default)]
    is_confirmed: Option<Value>,
    #[serde(default, rename = "Obra")]
    obra: Option<RawWorkSiteRef>,
}

impl PunchEvent {
    fn from_raw(raw: RawPunch) -> Option<Self> {
        let kind = PunchKind::parse(&raw.tipo)?;
        let timestamp = parse_timestamp(&raw.timestamp)?;
        Some(Self {
            id: raw.id,
            work_site_id: raw.obra_id,
            work_site_name: raw.obra.and_then(|o| o.nome),
            kind,
            timestamp,
            justification: raw.justificacao.filter(|j| !j.trim().is_empty()),
            confirmed: raw.is_confirmed.as_ref().map(value_to_bool).unwrap_or(false),
        })
    }
}

/// Parses the day-punches payload row by row; malformed rows are dropped.
pub fn parse_punches(payload: &Value) -> Vec<PunchEvent> {
    let items = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Null => return Vec::new(),
        other => {
            warn!("Day punches payload is not a list: {}", other);
            return Vec::new();
        }
    };
    items
        .iter()
        .filter_map(|item| {
            let parsed = serde_json::from_value::<RawPunch>(item.clone())
                .ok()
                .and_then(PunchEvent::from_raw);
            if parsed.is_none() {
                warn!("Skipping malformed punch: {}", item);
            }
            parsed
        })
        .collect()
}

/// Accumulated time for one work site on one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteTotal {
    pub work_site_id: String,
    pub work_site_name: Option<String>,
    pub total_minutes: f64,
    pub hours: i64,
    pub minutes: i64,
    /// Entry still open after the last punch.
    pub open_since: Option<DateTime<Utc>>,
}

impl SiteTotal {
    pub fn duration(&self) -> WorkedDuration {
        WorkedDuration {
            hours: self.hours,
            minutes: self.minutes,
        }
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 60_000.0).max(0.0)
}

struct SiteAccumulator {
    name: Option<String>,
    minutes: f64,
    open: Option<DateTime<Utc>>,
}

fn sorted(punches: &[PunchEvent]) -> Vec<&PunchEvent> {
    let mut ordered: Vec<&PunchEvent> = punches.iter().collect();
    ordered.sort_by_key(|p| p.timestamp);
    ordered
}

/// Rebuilds per-site totals for one day's punches.
///
/// `live_now` is `Some(now)` only when the day is today; open entries then
/// accrue up to `now`. Sites are returned in order of first punch.
pub fn reconstruct_day(punches: &[PunchEvent], live_now: Option<DateTime<Utc>>) -> Vec<SiteTotal> {
    let mut order: Vec<String> = Vec::new();
    let mut sites: HashMap<String, SiteAccumulator> = HashMap::new();

    for punch in sorted(punches) {
        let site = sites
            .entry(punch.work_site_id.clone())
            .or_insert_with(|| {
                order.push(punch.work_site_id.clone());
                SiteAccumulator {
                    name: None,
                    minutes: 0.0,
                    open: None,
                }
            });
        if site.name.is_none() {
            site.name = punch.work_site_name.clone();
        }

        match punch.kind {
            // Last entrada wins over a stale open one.
            PunchKind::Entrada => site.open = Some(punch.timestamp),
            PunchKind::Saida => {
                if let Some(opened) = site.open.take() {
                    site.minutes += minutes_between(opened, punch.timestamp);
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| {
            let site = sites.remove(&id)?;
            let mut total = site.minutes;
            if let (Some(opened), Some(now)) = (site.open, live_now) {
                total += minutes_between(opened, now);
            }
            let duration = WorkedDuration::from_fractional_minutes(total);
            Some(SiteTotal {
                work_site_id: id,
                work_site_name: site.name,
                total_minutes: total,
                hours: duration.hours,
                minutes: duration.minutes,
                open_since: site.open,
            })
        })
        .collect()
}

/// Minutes accrued by entries still open at `now`, across all sites.
pub fn live_minutes(punches: &[PunchEvent], now: DateTime<Utc>) -> f64 {
    let mut open: HashMap<&str, Option<DateTime<Utc>>> = HashMap::new();
    for punch in sorted(punches) {
        let slot = open.entry(punch.work_site_id.as_str()).or_insert(None);
        match punch.kind {
            PunchKind::Entrada => *slot = Some(punch.timestamp),
            PunchKind::Saida => *slot = None,
        }
    }
    open.values()
        .flatten()
        .map(|opened| minutes_between(*opened, now))
        .sum()
}
