// src/portal.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, SessionContext};
use crate::error::{FetchError, PontoError, PontoResult};
use crate::fetch::FetchClient;
use crate::models::{AbsenceRecord, AbsenceType, MonthlySummaryEntry, VacationTotals, WorkSchedule, WorkSite};
use crate::pending::{parse_pending_requests, PendingRequest};
use crate::punches::{parse_punches, PunchEvent, PunchKind};
use crate::tabular::{field, server_message, table_rows, value_to_bool, value_to_i64, value_to_string};

// --- Endpoints ---
pub const MONTHLY_SUMMARY_PATH: &str = "/registo-ponto/resumo-mensal";
pub const DAY_PUNCHES_PATH: &str = "/registo-ponto/dia";
pub const SPLIT_HOURS_PATH: &str = "/registo-ponto/dividir-horas";
pub const MANUAL_PUNCH_PATH: &str = "/registo-ponto/esquecido";
pub const WORK_SITES_PATH: &str = "/obras/empresa";
pub const ABSENCES_PATH: &str = "/faltas/funcionario";
pub const ABSENCE_TYPES_PATH: &str = "/faltas/tipos";
pub const WORK_SCHEDULE_PATH: &str = "/horarios/funcionario";
pub const SCHEDULE_CATALOG_PATH: &str = "/horarios";
pub const VACATION_TOTALS_PATH: &str = "/ferias/totais";
pub const PENDING_REQUESTS_PATH: &str = "/aprovacoes/pendentes";
pub const ABSENCE_REQUEST_PATH: &str = "/aprovacoes/faltas";
pub const VACATION_REQUEST_PATH: &str = "/aprovacoes/ferias";
pub const HOLIDAYS_PATH: &str = "/feriados";

// --- Write payloads ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitAllocationPayload {
    pub destination_work_site_id: String,
    pub minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitSubmission {
    pub day: NaiveDate,
    pub source_work_site_id: String,
    pub allocations: Vec<SplitAllocationPayload>,
}

/// Counts reported by the backend after rebuilding the punches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitOutcome {
    pub total_records_deleted: u64,
    pub total_records_created: u64,
}

impl SplitOutcome {
    /// Counts may arrive as numbers or strings. Anything unreadable is 0.
    pub fn from_value(value: &Value) -> Self {
        let count = |aliases: &[&str]| {
            value
                .as_object()
                .and_then(|row| field(row, aliases))
                .and_then(value_to_i64)
                .map_or(0, |n| n.max(0) as u64)
        };
        Self {
            total_records_deleted: count(&["totalRecordsDeleted", "TotalRecordsDeleted", "total_records_deleted"]),
            total_records_created: count(&["totalRecordsCreated", "TotalRecordsCreated", "total_records_created"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbsenceSubmission {
    #[serde(rename = "funcionario")]
    pub employee_id: String,
    #[serde(rename = "falta")]
    pub code: String,
    #[serde(rename = "dataPedido")]
    pub date: NaiveDate,
    #[serde(rename = "horas")]
    pub is_hourly: bool,
    #[serde(rename = "tempo")]
    pub amount: Decimal,
    #[serde(rename = "observacoes", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VacationSubmission {
    #[serde(rename = "funcionario")]
    pub employee_id: String,
    #[serde(rename = "dataInicio")]
    pub start: NaiveDate,
    #[serde(rename = "dataFim")]
    pub end: NaiveDate,
    #[serde(rename = "observacoes", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualPunch {
    #[serde(rename = "funcionario")]
    pub employee_id: String,
    #[serde(rename = "obra_id")]
    pub work_site_id: String,
    #[serde(rename = "tipo")]
    pub kind: PunchKind,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "justificacao", skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

/// Body of a successful write. Only the id is used, for the optimistic insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationAck {
    pub id: Option<String>,
    pub message: Option<String>,
}

/// Every remote read and write the engine depends on.
#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn monthly_summary(&self, year: i32, month: u32) -> PontoResult<Vec<MonthlySummaryEntry>>;
    async fn work_sites(&self, company_id: &str) -> PontoResult<Vec<WorkSite>>;
    async fn absences(&self, employee_id: &str) -> PontoResult<Vec<AbsenceRecord>>;
    async fn absence_types(&self) -> PontoResult<Vec<AbsenceType>>;
    async fn work_schedule(&self, employee_id: &str) -> PontoResult<Option<WorkSchedule>>;
    async fn work_schedule_catalog(&self) -> PontoResult<Vec<WorkSchedule>>;
    async fn vacation_totals(&self, employee_id: &str) -> PontoResult<Option<VacationTotals>>;
    async fn pending_requests(&self) -> PontoResult<Vec<PendingRequest>>;
    async fn day_punches(&self, day: NaiveDate) -> PontoResult<Vec<PunchEvent>>;
    /// Raw payload; normalized by `holidays::normalize_holidays`.
    async fn holidays(&self, year: i32) -> PontoResult<Value>;

    async fn submit_split(&self, submission: &SplitSubmission) -> PontoResult<SplitOutcome>;
    async fn submit_absence_request(&self, submission: &AbsenceSubmission) -> PontoResult<MutationAck>;
    async fn submit_vacation_request(&self, submission: &VacationSubmission) -> PontoResult<MutationAck>;
    async fn cancel_request(&self, request_id: &str) -> PontoResult<MutationAck>;
    async fn submit_manual_punch(&self, punch: &ManualPunch) -> PontoResult<MutationAck>;
    async fn cancel_punch(&self, punch_id: &str, justification: &str) -> PontoResult<MutationAck>;
}

/// `PortalApi` over HTTP, through the resilient fetch layer.
#[derive(Clone)]
pub struct HttpPortalClient {
    fetch: FetchClient,
}

impl HttpPortalClient {
    pub fn new(fetch: FetchClient) -> Self {
        Self { fetch }
    }

    pub fn from_config(config: &EngineConfig, session: &SessionContext) -> PontoResult<Self> {
        let fetch = FetchClient::new(&config.base_url, session.token.clone(), config.retry_policy())?;
        Ok(Self::new(fetch))
    }

    async fn read(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        context_msg: &str,
    ) -> PontoResult<Value> {
        let payload = self.fetch.get(endpoint, query, context_msg).await?;
        Ok(payload.unwrap_or(Value::Null))
    }

    async fn write(&self, endpoint: &str, body: &Value, context_msg: &str) -> PontoResult<Value> {
        match self.fetch.post(endpoint, body, context_msg).await {
            Ok(payload) => {
                let payload = payload.unwrap_or(Value::Null);
                reject_unsuccessful(&payload)?;
                info!("'{}' accepted by the portal", context_msg);
                Ok(payload)
            }
            // Retries are already spent here, so any status is final.
            Err(FetchError::Status { status, body }) => {
                let message = server_message(&body);
                warn!("'{}' rejected ({}): {}", context_msg, status, message);
                Err(PontoError::Rejected { message })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A 2xx body can still carry `success: false`.
fn reject_unsuccessful(payload: &Value) -> PontoResult<()> {
    let Some(obj) = payload.as_object() else {
        return Ok(());
    };
    let success = field(obj, &["success", "sucesso"]).map(value_to_bool);
    if success == Some(false) {
        let message = field(obj, &["message", "mensagem", "error", "erro"])
            .and_then(value_to_string)
            .unwrap_or_else(|| payload.to_string());
        return Err(PontoError::Rejected { message });
    }
    Ok(())
}

fn ack_from(payload: &Value) -> MutationAck {
    let obj = payload.as_object();
    let lookup = |aliases: &[&str]| obj.and_then(|o| field(o, aliases)).and_then(value_to_string);
    MutationAck {
        id: lookup(&["id", "Id", "pedidoId"]),
        message: lookup(&["message", "mensagem"]),
    }
}

fn parse_each<T: serde::de::DeserializeOwned>(payload: &Value, source_name: &'static str) -> Vec<T> {
    table_rows(payload)
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(Value::Object(row)) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed '{}' row: {}", source_name, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl PortalApi for HttpPortalClient {
    async fn monthly_summary(&self, year: i32, month: u32) -> PontoResult<Vec<MonthlySummaryEntry>> {
        let query = [("ano", year.to_string()), ("mes", month.to_string())];
        let payload = self.read(MONTHLY_SUMMARY_PATH, &query, "Get Monthly Summary").await?;
        Ok(parse_each(&payload, "monthly summary"))
    }

    async fn work_sites(&self, company_id: &str) -> PontoResult<Vec<WorkSite>> {
        let endpoint = format!("{}/{}", WORK_SITES_PATH, company_id);
        let payload = self.read(&endpoint, &[], "Get Work Sites").await?;
        Ok(parse_each(&payload, "work sites"))
    }

    async fn absences(&self, employee_id: &str) -> PontoResult<Vec<AbsenceRecord>> {
        let endpoint = format!("{}/{}", ABSENCES_PATH, employee_id);
        let payload = self.read(&endpoint, &[], "Get Absences").await?;
        Ok(table_rows(&payload)
            .iter()
            .filter_map(AbsenceRecord::from_row)
            .collect())
    }

    async fn absence_types(&self) -> PontoResult<Vec<AbsenceType>> {
        let payload = self.read(ABSENCE_TYPES_PATH, &[], "Get Absence Types").await?;
        Ok(table_rows(&payload)
            .iter()
            .filter_map(AbsenceType::from_row)
            .collect())
    }

    async fn work_schedule(&self, employee_id: &str) -> PontoResult<Option<WorkSchedule>> {
        let endpoint = format!("{}/{}", WORK_SCHEDULE_PATH, employee_id);
        let payload = self.read(&endpoint, &[], "Get Work Schedule").await?;
        Ok(table_rows(&payload).iter().find_map(WorkSchedule::from_row))
    }

    async fn work_schedule_catalog(&self) -> PontoResult<Vec<WorkSchedule>> {
        let payload = self.read(SCHEDULE_CATALOG_PATH, &[], "Get Schedule Catalog").await?;
        Ok(table_rows(&payload)
            .iter()
            .filter_map(WorkSchedule::from_row)
            .collect())
    }

    async fn vacation_totals(&self, employee_id: &str) -> PontoResult<Option<VacationTotals>> {
        let endpoint = format!("{}/{}", VACATION_TOTALS_PATH, employee_id);
        let payload = self.read(&endpoint, &[], "Get Vacation Totals").await?;
        Ok(table_rows(&payload).iter().find_map(VacationTotals::from_row))
    }

    async fn pending_requests(&self) -> PontoResult<Vec<PendingRequest>> {
        let payload = self.read(PENDING_REQUESTS_PATH, &[], "Get Pending Requests").await?;
        Ok(parse_pending_requests(&payload))
    }

    async fn day_punches(&self, day: NaiveDate) -> PontoResult<Vec<PunchEvent>> {
        let query = [("data", day.format("%Y-%m-%d").to_string())];
        let payload = self.read(DAY_PUNCHES_PATH, &query, "Get Day Punches").await?;
        let punches = parse_punches(&payload);
        debug!("Loaded {} punches for {}", punches.len(), day);
        Ok(punches)
    }

    async fn holidays(&self, year: i32) -> PontoResult<Value> {
        let query = [("ano", year.to_string())];
        self.read(HOLIDAYS_PATH, &query, "Get Holidays").await
    }

    async fn submit_split(&self, submission: &SplitSubmission) -> PontoResult<SplitOutcome> {
        let body = serde_json::to_value(submission).map_err(FetchError::from)?;
        let payload = self.write(SPLIT_HOURS_PATH, &body, "Split Hours").await?;
        Ok(SplitOutcome::from_value(&payload))
    }

    async fn submit_absence_request(&self, submission: &AbsenceSubmission) -> PontoResult<MutationAck> {
        let mut body = serde_json::to_value(submission).map_err(FetchError::from)?;
        body["tipoPedido"] = json!("FALTA");
        body["operacao"] = json!("CRIAR");
        let payload = self.write(ABSENCE_REQUEST_PATH, &body, "Submit Absence Request").await?;
        Ok(ack_from(&payload))
    }

    async fn submit_vacation_request(&self, submission: &VacationSubmission) -> PontoResult<MutationAck> {
        let mut body = serde_json::to_value(submission).map_err(FetchError::from)?;
        body["tipoPedido"] = json!("FERIAS");
        body["operacao"] = json!("CRIAR");
        let payload = self.write(VACATION_REQUEST_PATH, &body, "Submit Vacation Request").await?;
        Ok(ack_from(&payload))
    }

    async fn cancel_request(&self, request_id: &str) -> PontoResult<MutationAck> {
        let endpoint = format!("/aprovacoes/{}/cancelar", request_id);
        let payload = self.write(&endpoint, &json!({}), "Cancel Request").await?;
        Ok(ack_from(&payload))
    }

    async fn submit_manual_punch(&self, punch: &ManualPunch) -> PontoResult<MutationAck> {
        let body = serde_json::to_value(punch).map_err(FetchError::from)?;
        let payload = self.write(MANUAL_PUNCH_PATH, &body, "Submit Manual Punch").await?;
        Ok(ack_from(&payload))
    }

    async fn cancel_punch(&self, punch_id: &str, justification: &str) -> PontoResult<MutationAck> {
        let endpoint = format!("/registo-ponto/{}/cancelar", punch_id);
        let body = json!({ "justificacao": justification });
        let payload = self.write(&endpoint, &body, "Cancel Punch").await?;
        Ok(ack_from(&payload))
    }
}
