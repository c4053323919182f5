// src/aggregator_tests.rs

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use crate::aggregator::{AttendanceEngine, RefreshTrigger};
    use crate::classifier::{classify, ClassifierContext, DayClass};
    use crate::clock::FixedClock;
    use crate::config::SessionContext;
    use crate::error::{FetchError, PontoError, PontoResult};
    use crate::models::{
        AbsenceRecord, AbsenceType, MonthlySummaryEntry, VacationTotals, WorkSchedule, WorkSite,
        WorkedDuration,
    };
    use crate::pending::{ApprovalState, PendingRequest, RequestDates, RequestOperation, RequestType};
    use crate::portal::{
        AbsenceSubmission, ManualPunch, MutationAck, PortalApi, SplitOutcome, SplitSubmission,
        VacationSubmission,
    };
    use crate::punches::{PunchEvent, PunchKind};
    use crate::requests::{AbsenceDraft, PunchDraft, VacationDraft};
    use crate::split::{SplitAllocation, SplitRequest};

    const BATCH_SOURCES: [&str; 9] = [
        "summary",
        "work_sites",
        "absences",
        "absence_types",
        "schedule",
        "catalog",
        "vacation",
        "pending",
        "punches",
    ];

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn local(s: &str) -> DateTime<Utc> {
        let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn punch(id: &str, site: &str, kind: PunchKind, at: &str) -> PunchEvent {
        PunchEvent {
            id: id.to_string(),
            work_site_id: site.to_string(),
            work_site_name: Some(format!("Obra {}", site)),
            kind,
            timestamp: local(at),
            justification: None,
            confirmed: true,
        }
    }

    fn summary(day: &str, hours: i64, minutes: i64) -> MonthlySummaryEntry {
        MonthlySummaryEntry {
            day: d(day),
            hours,
            minutes,
        }
    }

    fn absence(day: &str, code: &str) -> AbsenceRecord {
        AbsenceRecord {
            id: None,
            code: code.to_string(),
            date: d(day),
            is_hourly: false,
            amount: dec!(1),
            notes: None,
            discounts_meal: true,
            discounts_shift_allowance: false,
        }
    }

    // In-memory portal; every call is recorded, any source can be made to fail
    #[derive(Default)]
    struct FakePortal {
        summary: Mutex<Vec<MonthlySummaryEntry>>,
        work_sites: Vec<WorkSite>,
        absences: Vec<AbsenceRecord>,
        absence_types: Vec<AbsenceType>,
        schedule: Option<WorkSchedule>,
        catalog: Vec<WorkSchedule>,
        vacation: Option<VacationTotals>,
        pending: Mutex<Vec<PendingRequest>>,
        punches: Mutex<HashMap<NaiveDate, Vec<PunchEvent>>>,
        holidays: Value,
        failing: Mutex<HashSet<&'static str>>,
        reject_writes: Mutex<Option<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakePortal {
        fn call(&self, source: &'static str, detail: String) -> PontoResult<()> {
            self.calls.lock().unwrap().push(format!("{}{}", source, detail));
            if self.failing.lock().unwrap().contains(source) {
                return Err(PontoError::Fetch(FetchError::Timeout { timeout_ms: 12_000 }));
            }
            Ok(())
        }

        fn write(&self, source: &'static str, detail: String) -> PontoResult<()> {
            self.call(source, detail)?;
            if let Some(message) = self.reject_writes.lock().unwrap().clone() {
                return Err(PontoError::Rejected { message });
            }
            Ok(())
        }

        fn fail(&self, sources: &[&'static str]) {
            self.failing.lock().unwrap().extend(sources.iter().copied());
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }

        fn writes(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with("write:"))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl PortalApi for FakePortal {
        async fn monthly_summary(&self, year: i32, month: u32) -> PontoResult<Vec<MonthlySummaryEntry>> {
            self.call("summary", format!(":{}-{}", year, month))?;
            Ok(self.summary.lock().unwrap().clone())
        }

        async fn work_sites(&self, company_id: &str) -> PontoResult<Vec<WorkSite>> {
            self.call("work_sites", format!(":{}", company_id))?;
            Ok(self.work_sites.clone())
        }

        async fn absences(&self, _employee_id: &str) -> PontoResult<Vec<AbsenceRecord>> {
            self.call("absences", String::new())?;
            Ok(self.absences.clone())
        }

        async fn absence_types(&self) -> PontoResult<Vec<AbsenceType>> {
            self.call("absence_types", String::new())?;
            Ok(self.absence_types.clone())
        }

        async fn work_schedule(&self, _employee_id: &str) -> PontoResult<Option<WorkSchedule>> {
            self.call("schedule", String::new())?;
            Ok(self.schedule.clone())
        }

        async fn work_schedule_catalog(&self) -> PontoResult<Vec<WorkSchedule>> {
            self.call("catalog", String::new())?;
            Ok(self.catalog.clone())
        }

        async fn vacation_totals(&self, _employee_id: &str) -> PontoResult<Option<VacationTotals>> {
            self.call("vacation", String::new())?;
            Ok(self.vacation.clone())
        }

        async fn pending_requests(&self) -> PontoResult<Vec<PendingRequest>> {
            self.call("pending", String::new())?;
            Ok(self.pending.lock().unwrap().clone())
        }

        async fn day_punches(&self, day: NaiveDate) -> PontoResult<Vec<PunchEvent>> {
            self.call("punches", format!(":{}", day))?;
            Ok(self
                .punches
                .lock()
                .unwrap()
                .get(&day)
                .cloned()
                .unwrap_or_default())
        }

        async fn holidays(&self, year: i32) -> PontoResult<Value> {
            self.call("holidays", format!(":{}", year))?;
            Ok(self.holidays.clone())
        }

        async fn submit_split(&self, submission: &SplitSubmission) -> PontoResult<SplitOutcome> {
            self.write("write:split", format!(":{}", submission.source_work_site_id))?;
            Ok(SplitOutcome {
                total_records_deleted: 2,
                total_records_created: 2 * submission.allocations.len() as u64,
            })
        }

        async fn submit_absence_request(&self, submission: &AbsenceSubmission) -> PontoResult<MutationAck> {
            self.write("write:absence", format!(":{}", submission.date))?;
            self.pending.lock().unwrap().push(PendingRequest {
                id: "500".to_string(),
                request_type: RequestType::Absence,
                operation: RequestOperation::Create,
                employee_id: submission.employee_id.clone(),
                dates: RequestDates::Single(submission.date),
                approval_state: ApprovalState::Pending,
            });
            Ok(MutationAck {
                id: Some("500".to_string()),
                message: None,
            })
        }

        async fn submit_vacation_request(&self, submission: &VacationSubmission) -> PontoResult<MutationAck> {
            self.write("write:vacation", format!(":{}..{}", submission.start, submission.end))?;
            Ok(MutationAck::default())
        }

        async fn cancel_request(&self, request_id: &str) -> PontoResult<MutationAck> {
            self.write("write:cancel_request", format!(":{}", request_id))?;
            Ok(MutationAck::default())
        }

        async fn submit_manual_punch(&self, punch: &ManualPunch) -> PontoResult<MutationAck> {
            let justification = punch.justification.clone().unwrap_or_default();
            self.write("write:manual_punch", format!(":{}:{}", punch.work_site_id, justification))?;
            Ok(MutationAck::default())
        }

        async fn cancel_punch(&self, punch_id: &str, justification: &str) -> PontoResult<MutationAck> {
            self.write("write:cancel_punch", format!(":{}:{}", punch_id, justification))?;
            Ok(MutationAck::default())
        }
    }

    // June 2025 with a holiday on the 10th, some worked days and an open entry today
    fn june_portal() -> FakePortal {
        let portal = FakePortal {
            work_sites: vec![WorkSite {
                id: "7".to_string(),
                code: Some("OS".to_string()),
                name: "Obra Sul".to_string(),
                status: Some("Ativa".to_string()),
            }],
            absences: vec![absence("2025-06-10", "FI"), absence("2025-06-05", "FJ")],
            absence_types: vec![AbsenceType {
                code: "FJ".to_string(),
                description: "Falta justificada".to_string(),
                is_hourly: false,
                discounts_meal: true,
                discounts_shift_allowance: false,
            }],
            holidays: json!([{"data": "2025-06-10"}, {"data": "2025-06-13"}]),
            ..FakePortal::default()
        };
        *portal.summary.lock().unwrap() = vec![
            summary("2025-06-02", 8, 0),
            summary("2025-06-03", 6, 45),
            summary("2025-06-16", 0, 30),
        ];
        portal.punches.lock().unwrap().insert(
            d("2025-06-16"),
            vec![
                punch("1", "7", PunchKind::Entrada, "2025-06-16 07:30:00"),
                punch("2", "7", PunchKind::Saida, "2025-06-16 08:00:00"),
                punch("3", "7", PunchKind::Entrada, "2025-06-16 09:00:00"),
            ],
        );
        portal.punches.lock().unwrap().insert(
            d("2025-06-03"),
            vec![
                punch("4", "7", PunchKind::Entrada, "2025-06-03 08:00:00"),
                punch("5", "7", PunchKind::Saida, "2025-06-03 14:45:00"),
            ],
        );
        portal
    }

    fn setup(portal: FakePortal) -> (Arc<FakePortal>, Arc<FixedClock>, AttendanceEngine) {
        let portal = Arc::new(portal);
        let clock = Arc::new(FixedClock::at("2025-06-16 10:30:00").unwrap());
        let engine = AttendanceEngine::new(
            portal.clone(),
            SessionContext::new("42", "1"),
            clock.clone(),
        );
        (portal, clock, engine)
    }

    #[tokio::test]
    async fn test_work_site_failure_does_not_block_ledger() {
        let (portal, _clock, engine) = setup(june_portal());
        portal.fail(&["work_sites"]);

        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-16")))
            .await
            .expect("partial failure must not escalate");

        let state = engine.snapshot().await;
        assert!(state.work_sites.is_empty());
        assert_eq!(state.ledger[&d("2025-06-02")], WorkedDuration { hours: 8, minutes: 0 });
        assert_eq!(state.failed_sources, vec!["work sites"]);
        assert_eq!(state.alert, None);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn test_holiday_loads_before_batch_and_wins_over_absence() {
        let (portal, clock, engine) = setup(june_portal());
        engine
            .handle(RefreshTrigger::MonthChanged { year: 2025, month: 6 })
            .await
            .unwrap();

        let calls = portal.calls.lock().unwrap().clone();
        assert_eq!(calls[0], "holidays:2025");

        let state = engine.snapshot().await;
        let ctx = ClassifierContext::from_state(&state, clock_today(&clock));
        assert_eq!(classify(Some(d("2025-06-10")), &ctx), Some(DayClass::Holiday));
        assert_eq!(classify(Some(d("2025-06-05")), &ctx), Some(DayClass::Absence));
        assert_eq!(
            state.absence_descriptions.get("FJ").map(String::as_str),
            Some("Falta justificada")
        );
    }

    fn clock_today(clock: &FixedClock) -> NaiveDate {
        use crate::clock::Clock;
        clock.today()
    }

    #[tokio::test]
    async fn test_live_accrual_is_folded_into_today() {
        let (_portal, clock, engine) = setup(june_portal());
        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-16")))
            .await
            .unwrap();

        let state = engine.snapshot().await;
        // 30 closed minutes from the summary plus 90 open since 09:00
        assert_eq!(state.ledger[&d("2025-06-16")].to_string(), "2h00");
        assert_eq!(state.selected_day_sites.len(), 1);
        assert_eq!(state.selected_day_sites[0].total_minutes, 120.0);
        assert!(state.selected_day_sites[0].open_since.is_some());
        let first_sequence = state.sequence;

        clock.advance(Duration::minutes(30));
        engine.handle(RefreshTrigger::PeriodicTick).await.unwrap();

        let state = engine.snapshot().await;
        assert_eq!(state.ledger[&d("2025-06-16")].to_string(), "2h30");
        assert_eq!(state.selected_day_sites[0].total_minutes, 150.0);
        assert!(state.sequence > first_sequence);
    }

    #[tokio::test]
    async fn test_live_accrual_advances_when_summary_tick_fails() {
        let (portal, clock, engine) = setup(june_portal());
        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-16")))
            .await
            .unwrap();
        assert_eq!(engine.snapshot().await.ledger[&d("2025-06-16")].to_string(), "2h00");

        clock.advance(Duration::minutes(30));
        portal.fail(&["summary"]);
        engine.handle(RefreshTrigger::PeriodicTick).await.unwrap();

        let state = engine.snapshot().await;
        // Closed 0h30 kept from the last good summary, live part recomputed
        assert_eq!(state.ledger[&d("2025-06-16")].to_string(), "2h30");
        assert_eq!(state.closed_ledger[&d("2025-06-16")].to_string(), "0h30");
        assert_eq!(state.selected_day_sites[0].total_minutes, 150.0);
        assert_eq!(state.failed_sources, vec!["monthly summary"]);
    }

    #[tokio::test]
    async fn test_periodic_tick_skipped_for_other_days() {
        let (portal, _clock, engine) = setup(june_portal());
        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-03")))
            .await
            .unwrap();
        let state = engine.snapshot().await;
        assert_eq!(state.selected_day_sites[0].total_minutes, 405.0);
        assert!(state.selected_day_sites[0].open_since.is_none());
        // Today's entry still accrues even though another day is selected
        assert_eq!(state.ledger[&d("2025-06-16")].to_string(), "2h00");

        let before = portal.calls.lock().unwrap().len();
        engine.handle(RefreshTrigger::PeriodicTick).await.unwrap();
        assert_eq!(portal.calls.lock().unwrap().len(), before);
        assert_eq!(portal.count("punches:2025-06-03"), 1);
    }

    #[tokio::test]
    async fn test_holidays_reused_within_year() {
        let (portal, _clock, engine) = setup(june_portal());
        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-16")))
            .await
            .unwrap();
        engine
            .handle(RefreshTrigger::MonthChanged { year: 2025, month: 7 })
            .await
            .unwrap();
        assert_eq!(portal.count("holidays"), 1);

        let state = engine.snapshot().await;
        assert_eq!(state.selected_day, Some(d("2025-07-01")));
        assert_eq!(state.holidays.len(), 2);

        engine
            .handle(RefreshTrigger::MonthChanged { year: 2026, month: 1 })
            .await
            .unwrap();
        assert_eq!(portal.count("holidays"), 2);
        // Only days of the requested year are kept
        assert!(engine.snapshot().await.holidays.is_empty());
    }

    #[tokio::test]
    async fn test_holiday_failure_falls_back_to_empty_set() {
        let (portal, _clock, engine) = setup(june_portal());
        portal.fail(&["holidays"]);

        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-16")))
            .await
            .unwrap();

        let state = engine.snapshot().await;
        assert!(state.holidays.is_empty());
        assert_eq!(state.holiday_year, None);
        assert_eq!(state.failed_sources, vec!["holidays"]);
        assert!(!state.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_total_failure_keeps_previous_state() {
        let (portal, _clock, engine) = setup(june_portal());
        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-16")))
            .await
            .unwrap();
        let before = engine.snapshot().await;

        portal.fail(&BATCH_SOURCES);
        let result = engine.handle(RefreshTrigger::MutationCommitted).await;
        assert!(matches!(result, Err(PontoError::Bootstrap(_))));

        let after = engine.snapshot().await;
        assert_eq!(after.ledger, before.ledger);
        assert_eq!(after.sequence, before.sequence);
        assert!(after.alert.is_some());
        assert!(!after.loading);
    }

    #[tokio::test]
    async fn test_invalid_month_raises_alert() {
        let (portal, _clock, engine) = setup(june_portal());
        let result = engine
            .handle(RefreshTrigger::MonthChanged { year: 2025, month: 13 })
            .await;
        assert!(result.is_err());
        assert!(engine.snapshot().await.alert.is_some());
        assert!(portal.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_split_commits_then_reloads() {
        let (portal, _clock, engine) = setup(june_portal());
        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-03")))
            .await
            .unwrap();
        let site = engine.snapshot().await.selected_day_sites[0].clone();

        let request = SplitRequest::for_site(d("2025-06-03"), &site)
            .with_allocation(SplitAllocation::new("8", 4, 0))
            .with_allocation(SplitAllocation::new("9", 2, 45));
        let outcome = engine.split_hours(&request).await.unwrap();

        assert_eq!(outcome.total_records_created, 4);
        assert_eq!(portal.writes(), vec!["write:split:7"]);
        assert_eq!(portal.count("summary"), 2);
    }

    #[tokio::test]
    async fn test_split_mismatch_never_reaches_portal() {
        let (portal, _clock, engine) = setup(june_portal());
        let mut request = SplitRequest::default()
            .with_allocation(SplitAllocation::new("8", 4, 0));
        request.source_work_site_id = Some("7".to_string());
        request.day = Some(d("2025-06-03"));
        request.source = WorkedDuration { hours: 6, minutes: 45 };

        let err = engine.split_hours(&request).await.unwrap_err();
        assert!(err.is_validation());
        assert!(portal.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_split_rejection_is_verbatim_and_skips_refresh() {
        let (portal, _clock, engine) = setup(june_portal());
        *portal.reject_writes.lock().unwrap() = Some("Dia já fechado".to_string());

        let request = SplitRequest {
            source_work_site_id: Some("7".to_string()),
            day: Some(d("2025-06-03")),
            source: WorkedDuration { hours: 1, minutes: 0 },
            allocations: vec![SplitAllocation::new("8", 1, 0)],
        };
        let err = engine.split_hours(&request).await.unwrap_err();

        assert_eq!(err.to_string(), "Dia já fechado");
        assert_eq!(portal.count("summary"), 0);
    }

    #[tokio::test]
    async fn test_absence_request_marks_day_pending() {
        let (_portal, _clock, engine) = setup(june_portal());
        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-18")))
            .await
            .unwrap();

        let draft = AbsenceDraft {
            code: Some("FJ".to_string()),
            date: Some(d("2025-06-18")),
            is_hourly: false,
            amount: dec!(1),
            notes: None,
        };
        let ack = engine.request_absence(&draft).await.unwrap();
        assert_eq!(ack.id.as_deref(), Some("500"));

        let state = engine.snapshot().await;
        assert!(state.pending_days.contains(&d("2025-06-18")));
        assert_eq!(state.selected_day_pending.len(), 1);
        assert_eq!(state.selected_day_pending[0].id, "500");
    }

    #[tokio::test]
    async fn test_optimistic_insert_publishes_immediately() {
        let (_portal, _clock, engine) = setup(june_portal());
        engine
            .handle(RefreshTrigger::DaySelected(d("2025-06-11")))
            .await
            .unwrap();
        let before = engine.snapshot().await.sequence;

        engine
            .insert_pending(PendingRequest {
                id: "local".to_string(),
                request_type: RequestType::Vacation,
                operation: RequestOperation::Create,
                employee_id: "42".to_string(),
                dates: RequestDates::Range {
                    start: d("2025-06-10"),
                    end: d("2025-06-12"),
                },
                approval_state: ApprovalState::Pending,
            })
            .await;

        let state = engine.snapshot().await;
        assert_eq!(state.sequence, before + 1);
        assert_eq!(state.pending_days.len(), 3);
        assert_eq!(state.selected_day_pending.len(), 1);
    }

    #[tokio::test]
    async fn test_reversed_vacation_is_rejected_locally() {
        let (portal, _clock, engine) = setup(june_portal());
        let draft = VacationDraft {
            start: Some(d("2025-06-12")),
            end: Some(d("2025-06-10")),
            notes: None,
        };
        let err = engine.request_vacation(&draft).await.unwrap_err();
        assert!(matches!(err, PontoError::InvalidDateRange { .. }));
        assert!(portal.writes().is_empty());
    }

    #[tokio::test]
    async fn test_punch_edit_cancels_then_recreates() {
        let (portal, _clock, engine) = setup(june_portal());
        let replacement = PunchDraft {
            work_site_id: Some("7".to_string()),
            kind: Some(PunchKind::Entrada),
            timestamp: Some(local("2025-06-16 08:45:00")),
            justification: None,
        };

        let err = engine.edit_punch("3", &replacement, "   ").await.unwrap_err();
        assert!(matches!(err, PontoError::MissingField("justification")));
        assert!(portal.writes().is_empty());

        engine
            .edit_punch("3", &replacement, "Esqueci de picar")
            .await
            .unwrap();
        assert_eq!(
            portal.writes(),
            vec![
                "write:cancel_punch:3:Esqueci de picar",
                "write:manual_punch:7:Esqueci de picar"
            ]
        );
        assert_eq!(portal.count("summary"), 1);
    }

    #[tokio::test]
    async fn test_cancel_request_refreshes() {
        let (portal, _clock, engine) = setup(june_portal());
        engine.cancel_request("77").await.unwrap();
        assert_eq!(portal.writes(), vec!["write:cancel_request:77"]);
        assert_eq!(portal.count("summary"), 1);

        assert!(engine.cancel_request(" ").await.is_err());
    }
}
