// src/models.rs

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::tabular::{
    field, value_to_bool, value_to_date, value_to_decimal, value_to_string, Row,
};

/// Hours at or above which a day counts as a full working day.
pub const FULL_DAY_HOURS: i64 = 8;

// --- Work sites ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSite {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "codigo")]
    pub code: Option<String>,
    #[serde(alias = "nome")]
    pub name: String,
    #[serde(default, alias = "estado")]
    pub status: Option<String>,
}

/// Ids arrive as numbers from some endpoints and strings from others.
pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_string(&value).ok_or_else(|| serde::de::Error::custom("expected string or number id"))
}

// --- Ledger ---

/// Worked time for one day, as the calendar shows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkedDuration {
    pub hours: i64,
    pub minutes: i64,
}

impl WorkedDuration {
    pub fn from_minutes(total: i64) -> Self {
        let total = total.max(0);
        Self {
            hours: total / 60,
            minutes: total % 60,
        }
    }

    /// `floor(total/60)` hours and `round(total mod 60)` minutes; a rounded 60
    /// carries into the hour.
    pub fn from_fractional_minutes(total: f64) -> Self {
        let total = total.max(0.0);
        let mut hours = (total / 60.0).floor() as i64;
        let mut minutes = (total % 60.0).round() as i64;
        if minutes >= 60 {
            hours += 1;
            minutes -= 60;
        }
        Self { hours, minutes }
    }

    pub fn total_minutes(&self) -> i64 {
        self.hours * 60 + self.minutes
    }

    pub fn plus_minutes(&self, extra: i64) -> Self {
        Self::from_minutes(self.total_minutes() + extra)
    }

    pub fn is_full_day(&self) -> bool {
        self.hours >= FULL_DAY_HOURS
    }
}

impl fmt::Display for WorkedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h{:02}", self.hours, self.minutes)
    }
}

/// One row of the monthly summary read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlySummaryEntry {
    #[serde(alias = "dia", deserialize_with = "de_date")]
    pub day: NaiveDate,
    #[serde(default, alias = "horas")]
    pub hours: i64,
    #[serde(default, alias = "minutos")]
    pub minutes: i64,
}

pub(crate) fn de_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_date(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", value)))
}

/// Derived per-day worked duration map.
pub type DayLedger = BTreeMap<NaiveDate, WorkedDuration>;

pub fn ledger_from_summary(entries: &[MonthlySummaryEntry]) -> DayLedger {
    let mut ledger = DayLedger::new();
    for entry in entries {
        let minutes = minutes_of(entry.hours, entry.minutes);
        let slot = ledger.entry(entry.day).or_default();
        *slot = slot.plus_minutes(minutes);
    }
    ledger
}

// --- Absences ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceRecord {
    pub id: Option<String>,
    pub code: String,
    pub date: NaiveDate,
    pub is_hourly: bool,
    /// Hours when `is_hourly`, whole days otherwise.
    pub amount: Decimal,
    pub notes: Option<String>,
    pub discounts_meal: bool,
    pub discounts_shift_allowance: bool,
}

impl AbsenceRecord {
    pub fn from_row(row: &Row) -> Option<Self> {
        let date = field(row, &["Data", "data"]).and_then(value_to_date)?;
        let code = field(row, &["Falta", "falta", "Codigo"]).and_then(value_to_string)?;
        Some(Self {
            id: field(row, &["Id", "id", "ID"]).and_then(value_to_string),
            code,
            date,
            is_hourly: field(row, &["Horas", "horas"])
                .map(value_to_bool)
                .unwrap_or(false),
            amount: field(row, &["Tempo", "tempo"])
                .and_then(value_to_decimal)
                .unwrap_or(Decimal::ZERO),
            notes: field(row, &["Observacoes", "observacoes"]).and_then(value_to_string),
            discounts_meal: field(row, &["DescontaSubsAlim"])
                .map(value_to_bool)
                .unwrap_or(false),
            discounts_shift_allowance: field(row, &["DescontaSubsTurno"])
                .map(value_to_bool)
                .unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceType {
    pub code: String,
    pub description: String,
    pub is_hourly: bool,
    pub discounts_meal: bool,
    pub discounts_shift_allowance: bool,
}

impl AbsenceType {
    pub fn from_row(row: &Row) -> Option<Self> {
        let code = field(row, &["Falta", "falta", "Codigo"]).and_then(value_to_string)?;
        let description = field(row, &["Descricao", "descricao"])
            .and_then(value_to_string)
            .unwrap_or_else(|| code.clone());
        Some(Self {
            code,
            description,
            is_hourly: field(row, &["Horas", "horas"])
                .map(value_to_bool)
                .unwrap_or(false),
            discounts_meal: field(row, &["DescontaSubsAlim"])
                .map(value_to_bool)
                .unwrap_or(false),
            discounts_shift_allowance: field(row, &["DescontaSubsTurno"])
                .map(value_to_bool)
                .unwrap_or(false),
        })
    }
}

pub fn absence_descriptions(types: &[AbsenceType]) -> HashMap<String, String> {
    types
        .iter()
        .map(|t| (t.code.clone(), t.description.clone()))
        .collect()
}

pub fn absences_on(absences: &[AbsenceRecord], day: NaiveDate) -> Vec<AbsenceRecord> {
    absences.iter().filter(|a| a.date == day).cloned().collect()
}

// --- Schedules ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSchedule {
    pub code: String,
    pub description: Option<String>,
    /// Remaining columns, kept as delivered.
    pub extra: Row,
}

impl WorkSchedule {
    const CODE_ALIASES: [&'static str; 5] = ["Horario", "horario", "Codigo", "codigo", "Id"];
    const DESCRIPTION_ALIASES: [&'static str; 2] = ["Descricao", "descricao"];

    pub fn from_row(row: &Row) -> Option<Self> {
        let code = field(row, &Self::CODE_ALIASES).and_then(value_to_string)?;
        let description = field(row, &Self::DESCRIPTION_ALIASES).and_then(value_to_string);
        let extra = row
            .iter()
            .filter(|(k, _)| {
                !Self::CODE_ALIASES.contains(&k.as_str())
                    && !Self::DESCRIPTION_ALIASES.contains(&k.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(Self {
            code,
            description,
            extra,
        })
    }
}

/// The catalog entry describing the employee's assigned schedule.
pub fn schedule_detail(
    assigned: Option<&WorkSchedule>,
    catalog: &[WorkSchedule],
) -> Option<WorkSchedule> {
    let assigned = assigned?;
    catalog
        .iter()
        .find(|s| s.code == assigned.code)
        .cloned()
}

// --- Vacation ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationTotals {
    pub entitled_days: Decimal,
    pub used_days: Decimal,
    pub remaining_days: Decimal,
}

impl VacationTotals {
    pub fn from_row(row: &Row) -> Option<Self> {
        let entitled = field(row, &["DiasDireito", "Direito", "diasDireito", "Total"])
            .and_then(value_to_decimal);
        let used = field(row, &["DiasGozados", "Gozados", "diasGozados", "Usados"])
            .and_then(value_to_decimal);
        let remaining = field(
            row,
            &["DiasPorGozar", "PorGozar", "Restantes", "diasPorGozar", "Saldo"],
        )
        .and_then(value_to_decimal);

        if entitled.is_none() && used.is_none() && remaining.is_none() {
            return None;
        }
        let entitled_days = entitled.unwrap_or(Decimal::ZERO);
        let used_days = used.unwrap_or(Decimal::ZERO);
        Some(Self {
            entitled_days,
            used_days,
            remaining_days: remaining.unwrap_or(entitled_days - used_days),
        })
    }
}

/// Whole minutes for an hours/minutes pair. Minutes above 59 are taken as given.
pub fn minutes_of(hours: i64, minutes: i64) -> i64 {
    hours * 60 + minutes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn duration_display_and_rounding() {
        assert_eq!(WorkedDuration::from_minutes(485).to_string(), "8h05");
        let d = WorkedDuration::from_fractional_minutes(59.6);
        assert_eq!((d.hours, d.minutes), (1, 0));
        let d = WorkedDuration::from_fractional_minutes(90.4);
        assert_eq!((d.hours, d.minutes), (1, 30));
        assert!(WorkedDuration::from_minutes(480).is_full_day());
        assert!(!WorkedDuration::from_minutes(479).is_full_day());
    }

    #[test]
    fn summary_accepts_portuguese_aliases() {
        let entries: Vec<MonthlySummaryEntry> = serde_json::from_value(json!([
            {"dia": "2025-06-02", "horas": 8, "minutos": 15},
            {"day": "2025-06-03T00:00:00", "hours": 4}
        ]))
        .unwrap();
        let ledger = ledger_from_summary(&entries);
        let first = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert_eq!(ledger[&first].to_string(), "8h15");
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn work_site_ids_may_be_numbers() {
        let site: WorkSite =
            serde_json::from_value(json!({"id": 12, "nome": "Obra Norte", "codigo": "N1"}))
                .unwrap();
        assert_eq!(site.id, "12");
        assert_eq!(site.code.as_deref(), Some("N1"));
        assert_eq!(site.status, None);
    }

    #[test]
    fn absence_row_parsing() {
        let record = AbsenceRecord::from_row(&row(json!({
            "Data": "2025-06-10T00:00:00",
            "Falta": "F10",
            "Horas": 1,
            "Tempo": "2,5",
            "Observacoes": "consulta",
            "DescontaSubsAlim": true,
            "DescontaSubsTurno": "N"
        })))
        .unwrap();
        assert_eq!(record.code, "F10");
        assert!(record.is_hourly);
        assert_eq!(record.amount, dec!(2.5));
        assert!(record.discounts_meal);
        assert!(!record.discounts_shift_allowance);

        assert!(AbsenceRecord::from_row(&row(json!({"Falta": "F10"}))).is_none());
    }

    #[test]
    fn schedule_detail_matches_catalog() {
        let assigned = WorkSchedule::from_row(&row(json!({"Horario": "H1"}))).unwrap();
        let catalog = vec![
            WorkSchedule::from_row(&row(json!({"Horario": "H0", "Descricao": "Turno"}))).unwrap(),
            WorkSchedule::from_row(&row(json!({"Horario": "H1", "Descricao": "Normal", "HoraEntrada": "08:00"})))
                .unwrap(),
        ];
        let detail = schedule_detail(Some(&assigned), &catalog).unwrap();
        assert_eq!(detail.description.as_deref(), Some("Normal"));
        assert_eq!(detail.extra["HoraEntrada"], "08:00");
        assert!(schedule_detail(None, &catalog).is_none());
    }

    #[test]
    fn vacation_remaining_is_derived() {
        let totals =
            VacationTotals::from_row(&row(json!({"DiasDireito": 22, "DiasGozados": 5}))).unwrap();
        assert_eq!(totals.remaining_days, dec!(17));
        assert!(VacationTotals::from_row(&row(json!({"Outro": 1}))).is_none());
    }
}
