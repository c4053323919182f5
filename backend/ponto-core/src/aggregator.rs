// src/aggregator.rs

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::SessionContext;
use crate::error::{PontoError, PontoResult};
use crate::holidays::{normalize_holidays, HolidaySet};
use crate::models::{
    absence_descriptions, absences_on, ledger_from_summary, schedule_detail, AbsenceRecord,
    DayLedger, MonthlySummaryEntry, VacationTotals, WorkSchedule, WorkSite, WorkedDuration,
};
use crate::pending::{pending_days, pending_for_day, PendingRequest};
use crate::portal::PortalApi;
use crate::punches::{live_minutes, reconstruct_day, PunchEvent, SiteTotal};

/// Everything the calendar view shows, published as one unit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CalendarState {
    pub year: i32,
    pub month: u32,
    pub selected_day: Option<NaiveDate>,
    pub holidays: HolidaySet,
    /// Year the holiday set was loaded for.
    pub holiday_year: Option<i32>,
    /// Summary totals as the backend reported them, before the live fold.
    pub closed_ledger: DayLedger,
    pub ledger: DayLedger,
    pub work_sites: Vec<WorkSite>,
    pub absences: Vec<AbsenceRecord>,
    pub absence_descriptions: HashMap<String, String>,
    pub selected_day_absences: Vec<AbsenceRecord>,
    pub pending_requests: Vec<PendingRequest>,
    pub pending_days: BTreeSet<NaiveDate>,
    pub selected_day_pending: Vec<PendingRequest>,
    pub today_punches: Vec<PunchEvent>,
    pub selected_day_punches: Vec<PunchEvent>,
    pub selected_day_sites: Vec<SiteTotal>,
    pub schedule: Option<WorkSchedule>,
    pub schedule_catalog: Vec<WorkSchedule>,
    pub schedule_detail: Option<WorkSchedule>,
    pub vacation_totals: Option<VacationTotals>,
    pub failed_sources: Vec<&'static str>,
    pub loading: bool,
    pub alert: Option<String>,
    pub sequence: u64,
}

impl CalendarState {
    pub fn is_visible(&self, day: NaiveDate) -> bool {
        day.year() == self.year && day.month() == self.month
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    MonthChanged { year: i32, month: u32 },
    DaySelected(NaiveDate),
    MutationCommitted,
    PeriodicTick,
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshTrigger::MonthChanged { year, month } => {
                write!(f, "MonthChanged({}-{:02})", year, month)
            }
            RefreshTrigger::DaySelected(day) => write!(f, "DaySelected({})", day),
            RefreshTrigger::MutationCommitted => write!(f, "MutationCommitted"),
            RefreshTrigger::PeriodicTick => write!(f, "PeriodicTick"),
        }
    }
}

// Source names, as recorded in `failed_sources`.
const SRC_HOLIDAYS: &str = "holidays";
const SRC_SUMMARY: &str = "monthly summary";
const SRC_WORK_SITES: &str = "work sites";
const SRC_ABSENCES: &str = "absences";
const SRC_ABSENCE_TYPES: &str = "absence types";
const SRC_SCHEDULE: &str = "work schedule";
const SRC_CATALOG: &str = "schedule catalog";
const SRC_VACATION: &str = "vacation totals";
const SRC_PENDING: &str = "pending requests";
const SRC_TODAY_PUNCHES: &str = "today punches";
const SRC_DAY_PUNCHES: &str = "selected day punches";

const CATASTROPHIC_ALERT: &str = "Unable to load attendance data. Please try again later.";

/// Unwraps one batch member, falling back to `default` and recording the source on failure.
fn settle<T>(
    result: PontoResult<T>,
    source_name: &'static str,
    default: T,
    failed: &mut Vec<&'static str>,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("Source '{}' unavailable, using default: {}", source_name, e);
            failed.push(source_name);
            default
        }
    }
}

/// Adds today's still-open punch time on top of the closed total from the summary.
fn fold_live_accrual(ledger: &mut DayLedger, today: NaiveDate, live: f64) {
    if live <= 0.0 {
        return;
    }
    let closed = ledger.get(&today).map(|d| d.total_minutes()).unwrap_or(0);
    let folded = WorkedDuration::from_fractional_minutes(closed as f64 + live);
    ledger.insert(today, folded);
}

pub struct AttendanceEngine {
    api: Arc<dyn PortalApi>,
    session: SessionContext,
    clock: Arc<dyn Clock>,
    state: RwLock<CalendarState>,
    sequence: AtomicU64,
}

impl AttendanceEngine {
    /// The engine starts on the current month with today selected; nothing is
    /// loaded until the first trigger.
    pub fn new(api: Arc<dyn PortalApi>, session: SessionContext, clock: Arc<dyn Clock>) -> Self {
        let today = clock.today();
        let state = CalendarState {
            year: today.year(),
            month: today.month(),
            selected_day: Some(today),
            ..CalendarState::default()
        };
        Self {
            api,
            session,
            clock,
            state: RwLock::new(state),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn api(&self) -> &Arc<dyn PortalApi> {
        &self.api
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn snapshot(&self) -> CalendarState {
        self.state.read().await.clone()
    }

    /// Runs the routine mapped to `trigger` and publishes its result.
    pub async fn handle(&self, trigger: RefreshTrigger) -> PontoResult<()> {
        debug!("Handling refresh trigger {}", trigger);
        let current = self.snapshot().await;
        match trigger {
            RefreshTrigger::MonthChanged { year, month } => {
                let selected = match current.selected_day {
                    Some(day) if day.year() == year && day.month() == month => Some(day),
                    _ => {
                        let today = self.clock.today();
                        if today.year() == year && today.month() == month {
                            Some(today)
                        } else {
                            NaiveDate::from_ymd_opt(year, month, 1)
                        }
                    }
                };
                self.bootstrap(year, month, selected).await
            }
            RefreshTrigger::DaySelected(day) => {
                self.bootstrap(day.year(), day.month(), Some(day)).await
            }
            RefreshTrigger::MutationCommitted => {
                self.bootstrap(current.year, current.month, current.selected_day)
                    .await
            }
            RefreshTrigger::PeriodicTick => self.tick(current).await,
        }
    }

    async fn set_loading(&self, loading: bool) {
        self.state.write().await.loading = loading;
    }

    /// Swaps in `next` wholesale. Concurrent routines race; the last one to
    /// finish wins.
    async fn publish(&self, mut next: CalendarState) {
        next.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        next.loading = false;
        let mut guard = self.state.write().await;
        if next.sequence < guard.sequence {
            debug!(
                "Publishing state #{} over newer #{} (last write wins)",
                next.sequence, guard.sequence
            );
        }
        *guard = next;
    }

    /// Keeps the last consistent state and raises a single alert.
    async fn fail_catastrophically(&self, reason: String) -> PontoResult<()> {
        error!("Attendance bootstrap failed: {}", reason);
        let mut guard = self.state.write().await;
        guard.loading = false;
        guard.alert = Some(CATASTROPHIC_ALERT.to_string());
        Err(PontoError::Bootstrap(reason))
    }

    /// Inserts a request the backend just accepted, ahead of the full refresh.
    pub async fn insert_pending(&self, request: PendingRequest) {
        let mut next = self.snapshot().await;
        next.pending_requests.push(request);
        next.pending_days = pending_days(&next.pending_requests, &self.session.employee_id);
        if let Some(day) = next.selected_day {
            next.selected_day_pending =
                pending_for_day(&next.pending_requests, &self.session.employee_id, day);
        }
        self.publish(next).await;
    }

    async fn load_holidays(
        &self,
        current: &CalendarState,
        year: i32,
        failed: &mut Vec<&'static str>,
    ) -> (HolidaySet, Option<i32>) {
        if current.holiday_year == Some(year) {
            debug!("Reusing holiday set for {}", year);
            return (current.holidays.clone(), Some(year));
        }
        match self.api.holidays(year).await {
            Ok(payload) => {
                let set = normalize_holidays(&payload, year);
                info!("Loaded {} holidays for {}", set.len(), year);
                (set, Some(year))
            }
            Err(e) => {
                warn!("Holidays for {} unavailable, continuing without: {}", year, e);
                failed.push(SRC_HOLIDAYS);
                (HolidaySet::default(), None)
            }
        }
    }

    async fn bootstrap(
        &self,
        year: i32,
        month: u32,
        selected_day: Option<NaiveDate>,
    ) -> PontoResult<()> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return self
                .fail_catastrophically(format!("invalid month {}-{}", year, month))
                .await;
        }
        self.set_loading(true).await;
        let current = self.snapshot().await;
        let today = self.clock.today();
        let employee_id = self.session.employee_id.as_str();
        let mut failed: Vec<&'static str> = Vec::new();

        let (holidays, holiday_year) = self.load_holidays(&current, year, &mut failed).await;

        let other_day = selected_day.filter(|d| *d != today);
        let selected_punches = async {
            match other_day {
                Some(day) => self.api.day_punches(day).await,
                None => Ok(Vec::new()),
            }
        };
        let (
            summary,
            work_sites,
            absences,
            absence_types,
            schedule,
            catalog,
            vacation,
            pending,
            today_punches,
            day_punches,
        ) = tokio::join!(
            self.api.monthly_summary(year, month),
            self.api.work_sites(&self.session.company_id),
            self.api.absences(employee_id),
            self.api.absence_types(),
            self.api.work_schedule(employee_id),
            self.api.work_schedule_catalog(),
            self.api.vacation_totals(employee_id),
            self.api.pending_requests(),
            self.api.day_punches(today),
            selected_punches,
        );
        let batch_size = if other_day.is_some() { 10 } else { 9 };
        let batch_start = failed.len();

        let summary: Vec<MonthlySummaryEntry> = settle(summary, SRC_SUMMARY, Vec::new(), &mut failed);
        let work_sites = settle(work_sites, SRC_WORK_SITES, Vec::new(), &mut failed);
        let absences = settle(absences, SRC_ABSENCES, Vec::new(), &mut failed);
        let absence_types = settle(absence_types, SRC_ABSENCE_TYPES, Vec::new(), &mut failed);
        let schedule = settle(schedule, SRC_SCHEDULE, None, &mut failed);
        let schedule_catalog = settle(catalog, SRC_CATALOG, Vec::new(), &mut failed);
        let vacation_totals = settle(vacation, SRC_VACATION, None, &mut failed);
        let pending_requests = settle(pending, SRC_PENDING, Vec::new(), &mut failed);
        let today_punches = settle(today_punches, SRC_TODAY_PUNCHES, Vec::new(), &mut failed);
        let day_punches = settle(day_punches, SRC_DAY_PUNCHES, Vec::new(), &mut failed);

        if failed.len() - batch_start == batch_size {
            return self
                .fail_catastrophically(format!("all {} sources failed", batch_size))
                .await;
        }

        let now = self.clock.now().with_timezone(&Utc);
        let closed_ledger = ledger_from_summary(&summary);
        let mut ledger = closed_ledger.clone();
        if today.year() == year && today.month() == month {
            fold_live_accrual(&mut ledger, today, live_minutes(&today_punches, now));
        }

        let selected_day_punches = match selected_day {
            Some(day) if day == today => today_punches.clone(),
            Some(_) => day_punches,
            None => Vec::new(),
        };
        let live_now = (selected_day == Some(today)).then_some(now);

        let next = CalendarState {
            year,
            month,
            selected_day,
            holidays,
            holiday_year,
            closed_ledger,
            ledger,
            work_sites,
            absence_descriptions: absence_descriptions(&absence_types),
            selected_day_absences: selected_day
                .map(|d| absences_on(&absences, d))
                .unwrap_or_default(),
            absences,
            pending_days: pending_days(&pending_requests, employee_id),
            selected_day_pending: selected_day
                .map(|d| pending_for_day(&pending_requests, employee_id, d))
                .unwrap_or_default(),
            pending_requests,
            selected_day_sites: reconstruct_day(&selected_day_punches, live_now),
            selected_day_punches,
            today_punches,
            schedule_detail: schedule_detail(schedule.as_ref(), &schedule_catalog),
            schedule,
            schedule_catalog,
            vacation_totals,
            failed_sources: failed,
            loading: false,
            alert: None,
            sequence: 0,
        };
        info!(
            "Loaded {}-{:02}: {} ledger days, {} failed sources",
            year,
            month,
            next.ledger.len(),
            next.failed_sources.len()
        );
        self.publish(next).await;
        Ok(())
    }

    /// Refreshes today's punches and the monthly summary while today is selected.
    async fn tick(&self, current: CalendarState) -> PontoResult<()> {
        let today = self.clock.today();
        if current.selected_day != Some(today) || !current.is_visible(today) {
            debug!("Periodic tick skipped: today is not selected");
            return Ok(());
        }

        let (summary, punches) = tokio::join!(
            self.api.monthly_summary(current.year, current.month),
            self.api.day_punches(today),
        );
        let mut next = current;
        let mut failed = Vec::new();
        let summary = summary.map_err(|e| {
            warn!("Periodic summary refresh failed: {}", e);
            failed.push(SRC_SUMMARY);
            e
        });
        let punches = punches.map_err(|e| {
            warn!("Periodic punch refresh failed: {}", e);
            failed.push(SRC_TODAY_PUNCHES);
            e
        });
        if let Ok(punches) = punches {
            next.today_punches = punches;
        }
        let now = self.clock.now().with_timezone(&Utc);
        if let Ok(summary) = summary {
            next.closed_ledger = ledger_from_summary(&summary);
        }
        // The live part moves with the clock even when the summary is stale.
        next.ledger = next.closed_ledger.clone();
        fold_live_accrual(&mut next.ledger, today, live_minutes(&next.today_punches, now));
        next.selected_day_punches = next.today_punches.clone();
        next.selected_day_sites = reconstruct_day(&next.selected_day_punches, Some(now));
        next.failed_sources = failed;

        self.publish(next).await;
        Ok(())
    }
}

/// Fires `PeriodicTick` on `interval` until the task is dropped.
pub async fn run_periodic_refresh(engine: Arc<AttendanceEngine>, interval: Duration) {
    info!(
        "Starting periodic refresh task (every {} seconds)",
        interval.as_secs()
    );
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; the bootstrap already covered it.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = engine.handle(RefreshTrigger::PeriodicTick).await {
            error!("Periodic refresh failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn live_accrual_creates_or_extends_today() {
        let today = d("2025-06-10");
        let mut ledger = DayLedger::new();
        fold_live_accrual(&mut ledger, today, 90.4);
        assert_eq!(ledger[&today], WorkedDuration { hours: 1, minutes: 30 });

        ledger.insert(today, WorkedDuration { hours: 4, minutes: 0 });
        fold_live_accrual(&mut ledger, today, 30.0);
        assert_eq!(ledger[&today].to_string(), "4h30");
    }

    #[test]
    fn zero_accrual_leaves_ledger_untouched() {
        let mut ledger = DayLedger::new();
        fold_live_accrual(&mut ledger, d("2025-06-10"), 0.0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn settle_records_failed_source() {
        let mut failed = Vec::new();
        let value: Vec<u8> = settle(
            Err(PontoError::MissingField("x")),
            SRC_WORK_SITES,
            Vec::new(),
            &mut failed,
        );
        assert!(value.is_empty());
        assert_eq!(failed, vec![SRC_WORK_SITES]);
        assert_eq!(settle(Ok(3), SRC_SUMMARY, 0, &mut failed), 3);
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn trigger_display() {
        let t = RefreshTrigger::MonthChanged { year: 2025, month: 6 };
        assert_eq!(t.to_string(), "MonthChanged(2025-06)");
    }
}
