// src/requests.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::aggregator::{AttendanceEngine, RefreshTrigger};
use crate::error::{PontoError, PontoResult};
use crate::pending::{ApprovalState, PendingRequest, RequestDates, RequestOperation, RequestType};
use crate::portal::{AbsenceSubmission, ManualPunch, MutationAck, VacationSubmission};
use crate::punches::PunchKind;

/// Upper bound for an hourly absence amount.
const MAX_ABSENCE_HOURS: i64 = 24;

fn required_text(value: &Option<String>, name: &'static str) -> PontoResult<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(PontoError::MissingField(name))
}

fn clean_notes(notes: &Option<String>) -> Option<String> {
    notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbsenceDraft {
    pub code: Option<String>,
    pub date: Option<NaiveDate>,
    pub is_hourly: bool,
    /// Hours when `is_hourly`, days otherwise.
    pub amount: Decimal,
    pub notes: Option<String>,
}

impl AbsenceDraft {
    pub fn validate(&self, employee_id: &str) -> PontoResult<AbsenceSubmission> {
        let code = required_text(&self.code, "absence code")?;
        let date = self.date.ok_or(PontoError::MissingField("absence date"))?;
        if self.amount <= Decimal::ZERO {
            return Err(PontoError::InvalidValue {
                field: "amount",
                detail: "must be greater than zero".to_string(),
            });
        }
        if self.is_hourly && self.amount > Decimal::from(MAX_ABSENCE_HOURS) {
            return Err(PontoError::InvalidValue {
                field: "amount",
                detail: format!("{} hours exceeds one day", self.amount),
            });
        }
        Ok(AbsenceSubmission {
            employee_id: employee_id.to_string(),
            code,
            date,
            is_hourly: self.is_hourly,
            amount: self.amount,
            notes: clean_notes(&self.notes),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VacationDraft {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl VacationDraft {
    pub fn validate(&self, employee_id: &str) -> PontoResult<VacationSubmission> {
        let start = self.start.ok_or(PontoError::MissingField("vacation start"))?;
        let end = self.end.ok_or(PontoError::MissingField("vacation end"))?;
        if start > end {
            return Err(PontoError::InvalidDateRange { start, end });
        }
        Ok(VacationSubmission {
            employee_id: employee_id.to_string(),
            start,
            end,
            notes: clean_notes(&self.notes),
        })
    }
}

/// A "forgotten" punch, or the replacement half of a punch edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PunchDraft {
    pub work_site_id: Option<String>,
    pub kind: Option<PunchKind>,
    pub timestamp: Option<DateTime<Utc>>,
    pub justification: Option<String>,
}

impl PunchDraft {
    pub fn validate(&self, employee_id: &str) -> PontoResult<ManualPunch> {
        Ok(ManualPunch {
            employee_id: employee_id.to_string(),
            work_site_id: required_text(&self.work_site_id, "work site")?,
            kind: self.kind.ok_or(PontoError::MissingField("punch type"))?,
            timestamp: self.timestamp.ok_or(PontoError::MissingField("punch time"))?,
            justification: clean_notes(&self.justification),
        })
    }
}

fn optimistic_request(
    ack: &MutationAck,
    request_type: RequestType,
    employee_id: &str,
    dates: RequestDates,
) -> PendingRequest {
    let id = ack.id.clone().unwrap_or_else(|| {
        let first = dates.days().first().map(|d| d.to_string()).unwrap_or_default();
        format!("local-{}-{}", request_type.wire_name(), first)
    });
    PendingRequest {
        id,
        request_type,
        operation: RequestOperation::Create,
        employee_id: employee_id.to_string(),
        dates,
        approval_state: ApprovalState::Pending,
    }
}

impl AttendanceEngine {
    async fn refresh_after(&self, action: &str) {
        if let Err(e) = self.handle(RefreshTrigger::MutationCommitted).await {
            warn!("Refresh after {} failed: {}", action, e);
        }
    }

    pub async fn request_absence(&self, draft: &AbsenceDraft) -> PontoResult<MutationAck> {
        let employee_id = self.session().employee_id.clone();
        let submission = draft.validate(&employee_id)?;
        let ack = self.api().submit_absence_request(&submission).await?;
        info!("Absence request for {} accepted", submission.date);

        let pending = optimistic_request(
            &ack,
            RequestType::Absence,
            &employee_id,
            RequestDates::Single(submission.date),
        );
        self.insert_pending(pending).await;
        self.refresh_after("absence request").await;
        Ok(ack)
    }

    pub async fn request_vacation(&self, draft: &VacationDraft) -> PontoResult<MutationAck> {
        let employee_id = self.session().employee_id.clone();
        let submission = draft.validate(&employee_id)?;
        let ack = self.api().submit_vacation_request(&submission).await?;
        info!(
            "Vacation request {}..{} accepted",
            submission.start, submission.end
        );

        let pending = optimistic_request(
            &ack,
            RequestType::Vacation,
            &employee_id,
            RequestDates::Range {
                start: submission.start,
                end: submission.end,
            },
        );
        self.insert_pending(pending).await;
        self.refresh_after("vacation request").await;
        Ok(ack)
    }

    pub async fn cancel_request(&self, request_id: &str) -> PontoResult<MutationAck> {
        let request_id = request_id.trim();
        if request_id.is_empty() {
            return Err(PontoError::MissingField("request id"));
        }
        let ack = self.api().cancel_request(request_id).await?;
        info!("Request {} cancelled", request_id);
        self.refresh_after("cancellation").await;
        Ok(ack)
    }

    pub async fn submit_forgotten_punch(&self, draft: &PunchDraft) -> PontoResult<MutationAck> {
        let punch = draft.validate(&self.session().employee_id)?;
        let ack = self.api().submit_manual_punch(&punch).await?;
        info!(
            "Manual {} punch at {} recorded",
            punch.kind.as_str(),
            punch.timestamp
        );
        self.refresh_after("manual punch").await;
        Ok(ack)
    }

    /// Punches are never modified in place: the old one is cancelled and a new
    /// one created, both carrying the same justification.
    pub async fn edit_punch(
        &self,
        punch_id: &str,
        replacement: &PunchDraft,
        justification: &str,
    ) -> PontoResult<MutationAck> {
        let punch_id = punch_id.trim();
        if punch_id.is_empty() {
            return Err(PontoError::MissingField("punch id"));
        }
        let justification = justification.trim();
        if justification.is_empty() {
            return Err(PontoError::MissingField("justification"));
        }
        let mut punch = replacement.validate(&self.session().employee_id)?;
        punch.justification = Some(justification.to_string());

        self.api().cancel_punch(punch_id, justification).await?;
        let created = self.api().submit_manual_punch(&punch).await;
        if let Err(e) = &created {
            error!(
                "Punch {} was cancelled but its replacement failed: {}",
                punch_id, e
            );
        }
        self.refresh_after("punch edit").await;
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn absence_requires_code_date_and_positive_amount() {
        let mut draft = AbsenceDraft {
            code: Some(" ".to_string()),
            date: Some(d("2025-06-10")),
            is_hourly: true,
            amount: dec!(2.5),
            notes: Some("consulta".to_string()),
        };
        assert!(matches!(
            draft.validate("42"),
            Err(PontoError::MissingField("absence code"))
        ));

        draft.code = Some("FJ".to_string());
        let submission = draft.validate("42").unwrap();
        assert_eq!(submission.amount, dec!(2.5));
        assert_eq!(submission.notes.as_deref(), Some("consulta"));

        draft.amount = dec!(25);
        assert!(draft.validate("42").unwrap_err().is_validation());
        draft.amount = Decimal::ZERO;
        assert!(draft.validate("42").is_err());
        draft.amount = dec!(1);
        draft.date = None;
        assert!(matches!(
            draft.validate("42"),
            Err(PontoError::MissingField("absence date"))
        ));
    }

    #[test]
    fn vacation_rejects_reversed_range() {
        let draft = VacationDraft {
            start: Some(d("2025-06-12")),
            end: Some(d("2025-06-10")),
            notes: None,
        };
        assert!(matches!(
            draft.validate("42"),
            Err(PontoError::InvalidDateRange { .. })
        ));

        let single_day = VacationDraft {
            start: Some(d("2025-06-10")),
            end: Some(d("2025-06-10")),
            notes: Some("  ".to_string()),
        };
        let submission = single_day.validate("42").unwrap();
        assert_eq!(submission.notes, None);
    }

    #[test]
    fn punch_draft_requires_site_kind_and_time() {
        let mut draft = PunchDraft::default();
        assert!(matches!(
            draft.validate("42"),
            Err(PontoError::MissingField("work site"))
        ));
        draft.work_site_id = Some("7".to_string());
        draft.kind = Some(PunchKind::Saida);
        assert!(matches!(
            draft.validate("42"),
            Err(PontoError::MissingField("punch time"))
        ));
        draft.timestamp = Some(Utc.with_ymd_and_hms(2025, 6, 10, 17, 0, 0).unwrap());
        assert_eq!(draft.validate("42").unwrap().work_site_id, "7");
    }

    #[test]
    fn optimistic_request_uses_ack_id_or_placeholder() {
        let dates = RequestDates::Single(d("2025-06-10"));
        let with_id = MutationAck {
            id: Some("77".to_string()),
            message: None,
        };
        assert_eq!(
            optimistic_request(&with_id, RequestType::Absence, "42", dates).id,
            "77"
        );
        let pending = optimistic_request(&MutationAck::default(), RequestType::Absence, "42", dates);
        assert_eq!(pending.id, "local-FALTA-2025-06-10");
        assert!(pending.is_pending_for("42"));
    }
}
