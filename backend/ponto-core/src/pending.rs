// src/pending.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

use crate::holidays::expand_days;
use crate::tabular::{field, table_rows, value_to_date, value_to_string, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Absence,
    Vacation,
}

impl RequestType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "FALTA" | "ABSENCE" => Some(RequestType::Absence),
            "FERIAS" | "FÉRIAS" | "VACATION" => Some(RequestType::Vacation),
            _ => None,
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            RequestType::Absence => "FALTA",
            RequestType::Vacation => "FERIAS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestOperation {
    #[default]
    Create,
    Edit,
    Cancel,
}

impl RequestOperation {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "EDITAR" | "EDIT" | "ALTERAR" => RequestOperation::Edit,
            "CANCELAR" | "CANCEL" | "ANULAR" => RequestOperation::Cancel,
            _ => RequestOperation::Create,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    Other(String),
}

impl ApprovalState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pendente" | "pending" | "em aprovação" | "em aprovacao" => ApprovalState::Pending,
            "aprovado" | "aprovada" | "approved" => ApprovalState::Approved,
            "rejeitado" | "rejeitada" | "recusado" | "rejected" => ApprovalState::Rejected,
            other => ApprovalState::Other(other.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ApprovalState::Pending)
    }
}

/// Absence requests carry one day; vacation requests a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestDates {
    Single(NaiveDate),
    Range { start: NaiveDate, end: NaiveDate },
}

impl RequestDates {
    pub fn days(&self) -> Vec<NaiveDate> {
        match *self {
            RequestDates::Single(day) => vec![day],
            RequestDates::Range { start, end } => expand_days(start, end),
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        match *self {
            RequestDates::Single(d) => d == day,
            RequestDates::Range { start, end } => start <= day && day <= end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub id: String,
    pub request_type: RequestType,
    pub operation: RequestOperation,
    pub employee_id: String,
    pub dates: RequestDates,
    pub approval_state: ApprovalState,
}

impl PendingRequest {
    /// Builds a request from one wire row; `None` if the type/date invariant
    /// does not hold.
    pub fn from_row(row: &Row) -> Option<Self> {
        let request_type = field(row, &["tipoPedido", "TipoPedido", "tipo"])
            .and_then(Value::as_str)
            .and_then(RequestType::parse)?;
        let single = field(row, &["dataPedido", "DataPedido", "data"]).and_then(value_to_date);
        let start = field(row, &["dataInicio", "DataInicio"]).and_then(value_to_date);
        let end = field(row, &["dataFim", "DataFim"]).and_then(value_to_date);

        // Absences carry one day, vacations both ends of a range.
        let dates = match request_type {
            RequestType::Absence => RequestDates::Single(single?),
            RequestType::Vacation => {
                let (start, end) = (start?, end?);
                RequestDates::Range {
                    start: start.min(end),
                    end: start.max(end),
                }
            }
        };

        Some(Self {
            id: field(row, &["id", "Id"]).and_then(value_to_string)?,
            request_type,
            operation: field(row, &["operacao", "Operacao"])
                .and_then(Value::as_str)
                .map(RequestOperation::parse)
                .unwrap_or_default(),
            employee_id: field(row, &["funcionario", "Funcionario", "employeeId"])
                .and_then(value_to_string)
                .unwrap_or_default(),
            dates,
            approval_state: field(row, &["estadoAprovacao", "EstadoAprovacao", "estado"])
                .and_then(Value::as_str)
                .map(ApprovalState::parse)?,
        })
    }

    pub fn is_pending_for(&self, employee_id: &str) -> bool {
        self.approval_state.is_pending() && self.employee_id == employee_id
    }
}

pub fn parse_pending_requests(payload: &Value) -> Vec<PendingRequest> {
    table_rows(payload)
        .iter()
        .filter_map(|row| {
            let parsed = PendingRequest::from_row(row);
            if parsed.is_none() {
                warn!("Skipping pending request without type, id, dates or state: {:?}", row);
            }
            parsed
        })
        .collect()
}

/// Union of days covered by the employee's still-pending requests.
pub fn pending_days(requests: &[PendingRequest], employee_id: &str) -> BTreeSet<NaiveDate> {
    requests
        .iter()
        .filter(|r| r.is_pending_for(employee_id))
        .flat_map(|r| r.dates.days())
        .collect()
}

/// Pending requests of `employee_id` touching `day`.
pub fn pending_for_day(
    requests: &[PendingRequest],
    employee_id: &str,
    day: NaiveDate,
) -> Vec<PendingRequest> {
    requests
        .iter()
        .filter(|r| r.is_pending_for(employee_id) && r.dates.contains(day))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample() -> Vec<PendingRequest> {
        parse_pending_requests(&json!([
            {"id": 1, "tipoPedido": "FERIAS", "funcionario": 42,
             "dataInicio": "2025-06-10", "dataFim": "2025-06-12", "estadoAprovacao": "Pendente"},
            {"id": 2, "tipoPedido": "FALTA", "operacao": "CANCELAR", "funcionario": "42",
             "dataPedido": "2025-06-20", "estadoAprovacao": "pendente"},
            {"id": 3, "tipoPedido": "FALTA", "funcionario": "42",
             "dataPedido": "2025-06-21", "estadoAprovacao": "Aprovado"},
            {"id": 4, "tipoPedido": "FALTA", "funcionario": "99",
             "dataPedido": "2025-06-22", "estadoAprovacao": "Pendente"},
            {"id": 5, "tipoPedido": "OUTRO", "funcionario": "42", "dataPedido": "2025-06-23"}
        ]))
    }

    #[test]
    fn vacation_range_expands_to_each_day() {
        let days = pending_days(&sample()[..1], "42");
        let keys: Vec<_> = days.iter().map(|d| d.to_string()).collect();
        assert_eq!(keys, vec!["2025-06-10", "2025-06-11", "2025-06-12"]);
    }

    #[test]
    fn membership_excludes_resolved_and_foreign_requests() {
        let requests = sample();
        assert_eq!(requests.len(), 4);
        let days = pending_days(&requests, "42");
        assert!(days.contains(&d("2025-06-20")));
        assert!(!days.contains(&d("2025-06-21")));
        assert!(!days.contains(&d("2025-06-22")));
        assert_eq!(days.len(), 4);
    }

    #[test]
    fn requests_for_day_use_range_containment() {
        let requests = sample();
        let for_day = pending_for_day(&requests, "42", d("2025-06-11"));
        assert_eq!(for_day.len(), 1);
        assert_eq!(for_day[0].id, "1");
        assert!(pending_for_day(&requests, "42", d("2025-06-21")).is_empty());
        assert_eq!(requests[1].operation, RequestOperation::Cancel);
    }

    #[test]
    fn vacation_needs_both_range_ends() {
        let requests = parse_pending_requests(&json!([
            {"id": 6, "tipoPedido": "FERIAS", "funcionario": "42",
             "dataInicio": "2025-07-01", "estadoAprovacao": "Pendente"},
            {"id": 7, "tipoPedido": "FERIAS", "funcionario": "42",
             "dataFim": "2025-07-03", "estadoAprovacao": "Pendente"},
            {"id": 8, "tipoPedido": "FERIAS", "funcionario": "42",
             "dataInicio": "2025-07-09", "dataFim": "2025-07-08", "estadoAprovacao": "Pendente"}
        ]));
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].dates,
            RequestDates::Range { start: d("2025-07-08"), end: d("2025-07-09") }
        );
    }

    #[test]
    fn absence_uses_request_date_only() {
        let requests = parse_pending_requests(&json!([
            {"id": 9, "tipoPedido": "FALTA", "funcionario": "42",
             "dataInicio": "2025-07-01", "estadoAprovacao": "Pendente"}
        ]));
        assert!(requests.is_empty());
    }

    #[test]
    fn row_without_state_never_marks_a_day() {
        let requests = parse_pending_requests(&json!([
            {"id": 10, "tipoPedido": "FALTA", "funcionario": "42", "dataPedido": "2025-07-02"}
        ]));
        assert!(requests.is_empty());
        assert!(pending_days(&requests, "42").is_empty());
    }

    #[test]
    fn state_parsing_is_case_insensitive() {
        assert!(ApprovalState::parse("PENDENTE").is_pending());
        assert_eq!(ApprovalState::parse("Rejeitado"), ApprovalState::Rejected);
        assert_eq!(
            ApprovalState::parse("Arquivado"),
            ApprovalState::Other("arquivado".to_string())
        );
    }
}
