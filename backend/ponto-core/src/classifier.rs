// src/classifier.rs

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::aggregator::CalendarState;
use crate::holidays::HolidaySet;
use crate::models::{AbsenceRecord, DayLedger, WorkedDuration};

/// Visual class of one calendar cell. Exactly one per dated cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DayClass {
    Holiday,
    Selected,
    Absence,
    Today,
    Pending,
    WorkedFull,
    WorkedPartial,
    Empty,
}

/// Everything classification looks at, borrowed from one published state.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierContext<'a> {
    pub today: NaiveDate,
    pub selected_day: Option<NaiveDate>,
    pub holidays: &'a HolidaySet,
    pub absences: &'a [AbsenceRecord],
    pub pending_days: &'a BTreeSet<NaiveDate>,
    pub ledger: &'a DayLedger,
}

impl<'a> ClassifierContext<'a> {
    pub fn from_state(state: &'a CalendarState, today: NaiveDate) -> Self {
        Self {
            today,
            selected_day: state.selected_day,
            holidays: &state.holidays,
            absences: &state.absences,
            pending_days: &state.pending_days,
            ledger: &state.ledger,
        }
    }

    fn has_absence(&self, day: NaiveDate) -> bool {
        self.absences.iter().any(|a| a.date == day)
    }

    fn worked(&self, day: NaiveDate) -> Option<WorkedDuration> {
        self.ledger.get(&day).copied()
    }
}

/// First match wins: holiday, selected, absence, today, pending, worked, empty.
/// Padding cells (`None`) are not classified.
pub fn classify(day: Option<NaiveDate>, ctx: &ClassifierContext<'_>) -> Option<DayClass> {
    let day = day?;
    let class = if ctx.holidays.contains(day) {
        DayClass::Holiday
    } else if ctx.selected_day == Some(day) {
        DayClass::Selected
    } else if ctx.has_absence(day) {
        DayClass::Absence
    } else if day == ctx.today {
        DayClass::Today
    } else if ctx.pending_days.contains(&day) {
        DayClass::Pending
    } else {
        match ctx.worked(day) {
            Some(worked) if worked.is_full_day() => DayClass::WorkedFull,
            Some(_) => DayClass::WorkedPartial,
            None => DayClass::Empty,
        }
    };
    Some(class)
}

fn is_weekday(day: NaiveDate) -> bool {
    !matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Past Mon-Fri day with nothing in the ledger. Shown alongside the class.
pub fn missing_record(day: Option<NaiveDate>, ctx: &ClassifierContext<'_>) -> bool {
    match day {
        Some(day) => day < ctx.today && is_weekday(day) && !ctx.ledger.contains_key(&day),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarCell {
    pub day: Option<NaiveDate>,
    pub class: Option<DayClass>,
    pub missing_record: bool,
}

/// Monday-first weeks for `year`/`month`, padded with empty cells.
/// `None` for an invalid month.
pub fn month_grid(year: i32, month: u32) -> Option<Vec<[Option<NaiveDate>; 7]>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let lead = first.weekday().num_days_from_monday() as usize;

    let mut cells: Vec<Option<NaiveDate>> = vec![None; lead];
    cells.extend(
        first
            .iter_days()
            .take_while(|d| d.month() == month)
            .map(Some),
    );
    while cells.len() % 7 != 0 {
        cells.push(None);
    }

    Some(
        cells
            .chunks(7)
            .map(|week| {
                let mut row = [None; 7];
                row.copy_from_slice(week);
                row
            })
            .collect(),
    )
}

/// The visible month of `state`, classified cell by cell.
pub fn calendar(state: &CalendarState, today: NaiveDate) -> Vec<Vec<CalendarCell>> {
    let ctx = ClassifierContext::from_state(state, today);
    month_grid(state.year, state.month)
        .unwrap_or_default()
        .into_iter()
        .map(|week| {
            week.iter()
                .map(|day| CalendarCell {
                    day: *day,
                    class: classify(*day, &ctx),
                    missing_record: missing_record(*day, &ctx),
                })
                .collect()
        })
        .collect()
}
