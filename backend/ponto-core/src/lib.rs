// src/lib.rs

pub mod aggregator;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod holidays;
pub mod models;
pub mod pending;
pub mod portal;
pub mod punches;
pub mod requests;
pub mod split;
pub mod tabular;

pub use aggregator::{run_periodic_refresh, AttendanceEngine, CalendarState, RefreshTrigger};
pub use classifier::{calendar, classify, month_grid, CalendarCell, DayClass};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EngineConfig, SessionContext};
pub use error::{FetchError, PontoError, PontoResult};
pub use fetch::{FetchClient, RetryPolicy};
pub use portal::{HttpPortalClient, PortalApi};
pub use requests::{AbsenceDraft, PunchDraft, VacationDraft};
pub use split::{SplitAllocation, SplitRequest};


#[cfg(test)]
mod aggregator_tests;
