// src/split.rs

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::aggregator::{AttendanceEngine, RefreshTrigger};
use crate::error::{PontoError, PontoResult};
use crate::models::{minutes_of, WorkedDuration};
use crate::portal::{SplitAllocationPayload, SplitOutcome, SplitSubmission};
use crate::punches::SiteTotal;

/// Allowed gap between the distributed and the original total, in minutes.
pub const SPLIT_TOLERANCE_MINUTES: i64 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAllocation {
    pub destination_work_site_id: Option<String>,
    pub hours: i64,
    pub minutes: i64,
}

impl SplitAllocation {
    pub fn new(destination: impl Into<String>, hours: i64, minutes: i64) -> Self {
        Self {
            destination_work_site_id: Some(destination.into()),
            hours,
            minutes,
        }
    }

    pub fn total_minutes(&self) -> i64 {
        minutes_of(self.hours, self.minutes)
    }
}

/// Redistribution of one site's time on one day, as edited in the dialog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitRequest {
    pub source_work_site_id: Option<String>,
    pub day: Option<NaiveDate>,
    pub source: WorkedDuration,
    pub allocations: Vec<SplitAllocation>,
}

fn describe_minutes(total: i64) -> String {
    format!("{} ({} min)", WorkedDuration::from_minutes(total), total)
}

impl SplitRequest {
    pub fn for_site(day: NaiveDate, site: &SiteTotal) -> Self {
        Self {
            source_work_site_id: Some(site.work_site_id.clone()),
            day: Some(day),
            source: site.duration(),
            allocations: Vec::new(),
        }
    }

    pub fn with_allocation(mut self, allocation: SplitAllocation) -> Self {
        self.allocations.push(allocation);
        self
    }

    pub fn allocated_minutes(&self) -> i64 {
        self.allocations.iter().map(SplitAllocation::total_minutes).sum()
    }

    /// Checks the request locally and builds the wire payload.
    pub fn validate(&self) -> PontoResult<SplitSubmission> {
        let (Some(source_id), Some(day)) = (self.source_work_site_id.as_ref(), self.day) else {
            return Err(PontoError::NoSplitSource);
        };
        if self.allocations.is_empty() {
            return Err(PontoError::EmptyAllocation);
        }

        let mut payload = Vec::with_capacity(self.allocations.len());
        for (index, allocation) in self.allocations.iter().enumerate() {
            let row = index + 1;
            let destination = allocation
                .destination_work_site_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or(PontoError::MissingDestination { row })?;
            if allocation.hours < 0 || allocation.minutes < 0 {
                return Err(PontoError::InvalidValue {
                    field: "allocation",
                    detail: format!("row {} has a negative duration", row),
                });
            }
            payload.push(SplitAllocationPayload {
                destination_work_site_id: destination.to_string(),
                minutes: allocation.total_minutes(),
            });
        }

        let original = self.source.total_minutes();
        let allocated = self.allocated_minutes();
        if (allocated - original).abs() > SPLIT_TOLERANCE_MINUTES {
            return Err(PontoError::SplitTotalMismatch {
                allocated: describe_minutes(allocated),
                original: describe_minutes(original),
            });
        }

        Ok(SplitSubmission {
            day,
            source_work_site_id: source_id.clone(),
            allocations: payload,
        })
    }
}

impl AttendanceEngine {
    /// Validates, submits and, once the backend confirms, reloads the whole view.
    pub async fn split_hours(&self, request: &SplitRequest) -> PontoResult<SplitOutcome> {
        let submission = request.validate()?;
        let outcome = self.api().submit_split(&submission).await?;
        info!(
            "Split of site {} on {}: {} records deleted, {} created",
            submission.source_work_site_id,
            submission.day,
            outcome.total_records_deleted,
            outcome.total_records_created
        );
        if let Err(e) = self.handle(RefreshTrigger::MutationCommitted).await {
            warn!("Refresh after split failed: {}", e);
        }
        Ok(outcome)
    }
}
