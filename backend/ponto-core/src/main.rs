// src/main.rs
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ponto_core::{
    calendar, run_periodic_refresh, AttendanceEngine, CalendarState, Clock, DayClass,
    EngineConfig, HttpPortalClient, RefreshTrigger, SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "ponto", about = "Attendance calendar for the timesheet portal")]
struct Args {
    /// Month to show, as YYYY-MM. Defaults to the current month.
    #[arg(long, value_parser = parse_month)]
    month: Option<(i32, u32)>,

    /// Day to select, as YYYY-MM-DD.
    #[arg(long)]
    day: Option<NaiveDate>,

    /// Keep running and refresh today's totals periodically.
    #[arg(long)]
    watch: bool,
}

fn parse_month(raw: &str) -> Result<(i32, u32), String> {
    let (year, month) = raw
        .split_once('-')
        .ok_or_else(|| format!("expected YYYY-MM, got '{}'", raw))?;
    let year = year.parse::<i32>().map_err(|e| e.to_string())?;
    let month = month.parse::<u32>().map_err(|e| e.to_string())?;
    if !(1..=12).contains(&month) {
        return Err(format!("month out of range: {}", month));
    }
    Ok((year, month))
}

fn class_marker(class: Option<DayClass>) -> char {
    match class {
        Some(DayClass::Holiday) => 'H',
        Some(DayClass::Selected) => '*',
        Some(DayClass::Absence) => 'A',
        Some(DayClass::Today) => 'T',
        Some(DayClass::Pending) => 'P',
        Some(DayClass::WorkedFull) => 'F',
        Some(DayClass::WorkedPartial) => 'p',
        Some(DayClass::Empty) => '.',
        None => ' ',
    }
}

fn print_state(state: &CalendarState, clock: &dyn Clock) {
    println!("{}-{:02}", state.year, state.month);
    println!(" Mo  Tu  We  Th  Fr  Sa  Su");
    for week in calendar(state, clock.today()) {
        let line: String = week
            .iter()
            .map(|cell| match cell.day {
                Some(day) => format!(
                    "{:>2}{}{}",
                    day.day(),
                    class_marker(cell.class),
                    if cell.missing_record { '!' } else { ' ' }
                ),
                None => "    ".to_string(),
            })
            .collect();
        println!("{}", line);
    }

    for (day, worked) in &state.ledger {
        println!("{}  {}", day, worked);
    }
    if let Some(day) = state.selected_day {
        println!("Selected {}:", day);
        for site in &state.selected_day_sites {
            let name = site.work_site_name.as_deref().unwrap_or(&site.work_site_id);
            let open = if site.open_since.is_some() { " (open)" } else { "" };
            println!("  {}  {}{}", name, site.duration(), open);
        }
        for absence in &state.selected_day_absences {
            let description = state
                .absence_descriptions
                .get(&absence.code)
                .map(String::as_str)
                .unwrap_or(absence.code.as_str());
            println!("  absence: {} ({})", description, absence.amount);
        }
        for request in &state.selected_day_pending {
            println!("  pending: {:?} {:?}", request.request_type, request.operation);
        }
    }
    if let Some(totals) = &state.vacation_totals {
        println!(
            "Vacation: {} entitled, {} used, {} remaining",
            totals.entitled_days, totals.used_days, totals.remaining_days
        );
    }
    if !state.failed_sources.is_empty() {
        warn!("Unavailable sources: {}", state.failed_sources.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting tracing subscriber failed")?;

    let args = Args::parse();

    let config = EngineConfig::from_env().context("Loading configuration failed")?;
    let session = config.session().context("Session context is incomplete")?;
    info!("Configuration loaded (base URL {}).", config.base_url);

    let api = Arc::new(HttpPortalClient::from_config(&config, &session)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(AttendanceEngine::new(api, session, clock.clone()));

    let today = clock.today();
    let trigger = match (args.day, args.month) {
        (Some(day), _) => RefreshTrigger::DaySelected(day),
        (None, Some((year, month))) => RefreshTrigger::MonthChanged { year, month },
        (None, None) => RefreshTrigger::DaySelected(today),
    };
    engine
        .handle(trigger)
        .await
        .context("Initial load failed")?;
    print_state(&engine.snapshot().await, clock.as_ref());

    if args.watch {
        info!("Watching for changes, press Ctrl+C to stop.");
        let refresher = tokio::spawn(run_periodic_refresh(
            engine.clone(),
            config.refresh_interval(),
        ));
        tokio::signal::ctrl_c()
            .await
            .context("Waiting for Ctrl+C failed")?;
        refresher.abort();
        print_state(&engine.snapshot().await, clock.as_ref());
    }

    Ok(())
}
