use crate::config::{AppConfig, BatchParams, RefreshSchedule};
use crate::data_structures::TickerSet;
use crate::workflow::{ForecastRequest, ForecastService};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MaintenanceReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Background trigger: sleeps until the next scheduled wall-clock time, then
/// runs the refresh. Never returns.
#[instrument(skip(service, config))]
pub async fn run(service: Arc<ForecastService>, config: AppConfig) {
    info!(
        time = %config.schedule.time,
        timezone = %config.schedule.timezone,
        tickers = config.tickers.len(),
        "Starting maintenance scheduler"
    );

    if config.tickers.is_empty() {
        warn!("No tickers configured, scheduled refreshes will only clear the cache");
    }

    if config.refresh_on_startup {
        info!("Running startup refresh");
        run_maintenance(&service, &config.tickers, &config.batch).await;
    }

    let mut iteration_count = 0u64;
    loop {
        let now = Utc::now();
        let next = next_run_after(now, &config.schedule);
        let wait = (next - now).to_std().unwrap_or_default();
        debug!(next_run = %next, wait_secs = wait.as_secs(), "Sleeping until next refresh");
        tokio::time::sleep(wait).await;

        iteration_count += 1;
        info!(iteration = iteration_count, "Starting scheduled refresh");
        if let Some(report) = run_maintenance(&service, &config.tickers, &config.batch).await {
            info!(
                iteration = iteration_count,
                refreshed = report.refreshed.len(),
                failed = report.failed.len(),
                "Completed scheduled refresh"
            );
        }
    }
}

/// First scheduled instant strictly after `now`. Local times skipped by a DST
/// change roll over to the following day.
pub fn next_run_after(now: DateTime<Utc>, schedule: &RefreshSchedule) -> DateTime<Utc> {
    let local_today = now.with_timezone(&schedule.timezone).date_naive();
    for offset in 0..=2 {
        let candidate = (local_today + Duration::days(offset)).and_time(schedule.time);
        if let Some(local) = schedule.timezone.from_local_datetime(&candidate).earliest() {
            let at = local.with_timezone(&Utc);
            if at > now {
                return at;
            }
        }
    }
    now + Duration::days(1)
}

/// Wipes the cache and recomputes every ticker in order while holding the
/// maintenance lock. Returns `None` when another run already holds it.
///
/// Request-path writes permitted before the lock was taken finish before the
/// cache is cleared. A failing ticker is logged and skipped. The lock guard is
/// dropped on every exit path, unwinding included.
#[instrument(skip_all, fields(tickers = tickers.len()))]
pub async fn run_maintenance(
    service: &ForecastService,
    tickers: &TickerSet,
    batch: &BatchParams,
) -> Option<MaintenanceReport> {
    let Some(guard) = service.lock().try_acquire() else {
        warn!("Maintenance already running, skipping");
        return None;
    };
    service.lock().drain_writers().await;

    if let Err(e) = service.cache().clear_all().await {
        error!(error = %e, "Failed to clear prediction cache");
    }

    let mut report = MaintenanceReport::default();
    for ticker in tickers.iter() {
        let request = ForecastRequest {
            ticker: ticker.clone(),
            period: batch.period.clone(),
            interval: batch.interval.clone(),
            number_of_days: batch.number_of_days,
        };

        let outcome = match request.validated() {
            Ok(request) => match service.compute(&request).await {
                Ok(series) => service.cache().put(&request.ticker, series).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(_) => {
                info!(ticker, "Refreshed prediction");
                report.refreshed.push(ticker.clone());
            }
            Err(e) => {
                error!(ticker, error = %e, "Failed to refresh prediction");
                report.failed.push((ticker.clone(), e));
            }
        }
    }

    guard.release();
    info!(refreshed = report.refreshed.len(), failed = report.failed.len(), "Maintenance finished");
    Some(report)
}
