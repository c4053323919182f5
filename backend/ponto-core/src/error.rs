// src/error.rs

use chrono::NaiveDate;
use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single remote call, after the retry policy has run its course.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    // Carries the raw response body so callers can surface the server message.
    #[error("Portal API error: Status={status}, Body='{body}'")]
    Status { status: StatusCode, body: String },

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl FetchError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Request(e) => e.status(),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum PontoError {
    #[error("Data source unavailable: {0}")]
    Fetch(#[from] FetchError),

    // --- Local validation, raised before any network call ---
    #[error("Distributed total ({allocated}) does not match the original total ({original})")]
    SplitTotalMismatch { allocated: String, original: String },

    #[error("Allocation row {row} has no destination work site")]
    MissingDestination { row: usize },

    #[error("Select a work site and a day before splitting hours")]
    NoSplitSource,

    #[error("Add at least one allocation before splitting hours")]
    EmptyAllocation,

    #[error("Required field missing: {0}")]
    MissingField(&'static str),

    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid value for {field}: {detail}")]
    InvalidValue { field: &'static str, detail: String },

    // Server said no; the message is shown to the user verbatim.
    #[error("{message}")]
    Rejected { message: String },

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),

    #[error("Unable to load attendance data: {0}")]
    Bootstrap(String),
}

impl PontoError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PontoError::SplitTotalMismatch { .. }
                | PontoError::MissingDestination { .. }
                | PontoError::NoSplitSource
                | PontoError::EmptyAllocation
                | PontoError::MissingField(_)
                | PontoError::InvalidDateRange { .. }
                | PontoError::InvalidValue { .. }
        )
    }
}

pub type PontoResult<T> = Result<T, PontoError>;
