//! Per-request forecast workflow.
//!
//! A request passes the maintenance guard, then either returns a fresh cached
//! record or walks the miss path: fetch bars (trying suffix variants), build
//! the dataset, run the engine on a blocking thread, persist, return.

use crate::cache::{is_fresh, PredictionCache};
use crate::data_structures::{dated_series, normalize_ticker, SeriesMap, ENSEMBLE_SERIES, FRESHNESS_WINDOW};
use crate::engine::{EngineFactory, ForecastEngine};
use crate::error::{AppError, Result};
use crate::features::build_dataset;
use crate::lock::MaintenanceLock;
use crate::yahoo::{validate_interval, validate_period, MarketDataSource, OhlcvData};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const MAX_TICKER_LEN: usize = 16;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForecastRequest {
    pub ticker: String,
    pub period: String,
    pub interval: String,
    pub number_of_days: usize,
}

impl Default for ForecastRequest {
    fn default() -> Self {
        Self {
            ticker: "AAPL".to_string(),
            period: "1y".to_string(),
            interval: "1h".to_string(),
            number_of_days: 10,
        }
    }
}

impl ForecastRequest {
    /// Uppercases the ticker and rejects parameters the chart API cannot serve.
    pub fn validated(mut self) -> Result<Self> {
        self.ticker = normalize_ticker(&self.ticker);
        let ticker_ok = !self.ticker.is_empty()
            && self.ticker.len() <= MAX_TICKER_LEN
            && self
                .ticker
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
        if !ticker_ok {
            return Err(AppError::InvalidParameter(format!("invalid ticker '{}'", self.ticker)));
        }
        if self.number_of_days == 0 {
            return Err(AppError::InvalidParameter("number_of_days must be at least 1".to_string()));
        }
        validate_period(&self.period)?;
        validate_interval(&self.interval)?;
        Ok(self)
    }
}

pub struct ForecastService {
    cache: PredictionCache,
    source: Arc<dyn MarketDataSource>,
    engine_factory: EngineFactory,
    lock: MaintenanceLock,
    suffixes: Vec<String>,
}

impl ForecastService {
    pub fn new(
        cache: PredictionCache,
        source: Arc<dyn MarketDataSource>,
        engine_factory: EngineFactory,
        lock: MaintenanceLock,
        suffixes: Vec<String>,
    ) -> Self {
        Self { cache, source, engine_factory, lock, suffixes }
    }

    pub fn cache(&self) -> &PredictionCache {
        &self.cache
    }

    pub fn lock(&self) -> &MaintenanceLock {
        &self.lock
    }

    /// Rejects work while the daily refresh holds the lock.
    pub fn ensure_available(&self) -> Result<()> {
        if self.lock.is_locked() {
            return Err(AppError::MaintenanceInProgress);
        }
        Ok(())
    }

    /// Serves a forecast, from the cache when a fresh record exists.
    #[instrument(skip(self), fields(ticker = %request.ticker))]
    pub async fn predict(&self, request: ForecastRequest) -> Result<SeriesMap> {
        self.ensure_available()?;
        let generation = self.lock.generation();
        let request = request.validated()?;

        if let Some(record) = self.cache.get(&request.ticker).await {
            if is_fresh(&record, FRESHNESS_WINDOW, Utc::now()) {
                info!(ticker = %request.ticker, "Serving cached prediction");
                return Ok(record.into_series());
            }
            debug!(ticker = %request.ticker, "Cached prediction is stale");
        }

        let series = self.compute(&request).await?;

        // A refresh that started after entry owns the cache; the caller still gets the forecast
        let Some(_permit) = self.lock.persist_permit(generation).await else {
            warn!(ticker = %request.ticker, "Maintenance started during request, not persisting prediction");
            return Ok(series);
        };
        // The forecast is already computed, a failed write only costs the next caller
        if let Err(e) = self.cache.put(&request.ticker, series.clone()).await {
            warn!(ticker = %request.ticker, error = %e, "Failed to persist prediction");
        }
        Ok(series)
    }

    /// Cached records for every ticker, internal fields stripped.
    pub async fn recommendations(&self) -> Result<HashMap<String, SeriesMap>> {
        self.ensure_available()?;
        let records = self.cache.list_all().await?;
        if records.is_empty() {
            return Err(AppError::NotFound("No predictions found in cache".to_string()));
        }
        Ok(records
            .into_iter()
            .map(|(ticker, record)| (ticker, record.into_series()))
            .collect())
    }

    /// Miss path without cache lookup or persistence: fetch, build, run.
    #[instrument(skip(self), fields(ticker = %request.ticker))]
    pub async fn compute(&self, request: &ForecastRequest) -> Result<SeriesMap> {
        let bars = self.fetch_with_suffixes(&request.ticker, &request.period, &request.interval).await?;
        let closes: Vec<f64> = bars.iter().map(|bar| bar.close).collect();

        // Checked before any computation is attempted
        if request.number_of_days >= closes.len() {
            return Err(AppError::InsufficientData);
        }
        let dataset = build_dataset(&closes, request.number_of_days)?;
        debug!(
            observations = closes.len(),
            training_rows = dataset.features.len(),
            horizon = dataset.horizon(),
            "Built dataset"
        );

        let engine = (self.engine_factory)();
        let predictions = run_engine(engine, dataset).await?;

        let mut series = SeriesMap::new();
        series.insert(ENSEMBLE_SERIES.to_string(), dated_series(Utc::now().date_naive(), &predictions));
        info!(ticker = %request.ticker, days = predictions.len(), "Computed prediction");
        Ok(series)
    }

    /// Tries the ticker as given, then each suffix variant in order. A
    /// transport error on one variant is logged and counts as empty.
    pub async fn fetch_with_suffixes(&self, ticker: &str, period: &str, interval: &str) -> Result<Vec<OhlcvData>> {
        let variants = std::iter::once(String::new()).chain(self.suffixes.iter().cloned());
        for suffix in variants {
            let symbol = format!("{}{}", ticker, suffix);
            match self.source.get_history(&symbol, period, interval).await {
                Ok(bars) if !bars.is_empty() => {
                    debug!(symbol, bars = bars.len(), "Found price history");
                    return Ok(bars);
                }
                Ok(_) => debug!(symbol, "No price history for variant"),
                Err(e) => warn!(symbol, error = %e, "Failed to fetch price history for variant"),
            }
        }
        Err(AppError::NoData)
    }
}

/// Runs the engine off the async runtime and releases it afterwards, whatever
/// the outcome.
async fn run_engine(mut engine: Box<dyn ForecastEngine>, dataset: crate::features::Dataset) -> Result<Vec<f64>> {
    let outcome = tokio::task::spawn_blocking(move || {
        let result = engine.forecast(&dataset);
        engine.release();
        result
    })
    .await
    .map_err(|e| AppError::Engine(format!("forecast task failed: {}", e)))?;
    Ok(outcome?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::engine::{EngineError, LinearRegression};
    use crate::store::MemoryStore;
    use crate::yahoo::MarketDataError;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Serves a fixed series per symbol; unknown symbols are empty.
    pub struct ScriptedSource {
        pub series: HashMap<String, Vec<f64>>,
        pub failing: Vec<String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        pub fn new(entries: &[(&str, usize)]) -> Self {
            let series = entries
                .iter()
                .map(|(symbol, len)| (symbol.to_string(), (0..*len).map(|i| 100.0 + i as f64).collect()))
                .collect();
            Self { series, failing: Vec::new(), calls: Mutex::new(Vec::new()) }
        }

        pub fn failing(mut self, symbol: &str) -> Self {
            self.failing.push(symbol.to_string());
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn get_history(&self, symbol: &str, _period: &str, _interval: &str) -> std::result::Result<Vec<OhlcvData>, MarketDataError> {
            self.calls.lock().unwrap().push(symbol.to_string());
            if self.failing.iter().any(|s| s == symbol) {
                return Err(MarketDataError::InvalidResponse("scripted failure".to_string()));
            }
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            Ok(self
                .series
                .get(symbol)
                .map(|closes| {
                    closes
                        .iter()
                        .enumerate()
                        .map(|(i, &close)| OhlcvData {
                            time: start + Duration::hours(i as i64),
                            open: None,
                            high: None,
                            low: None,
                            close,
                            volume: None,
                            symbol: Some(symbol.to_string()),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    /// Holds requests for one symbol until `release` is notified. Every other
    /// symbol goes straight to the scripted series.
    pub struct GatedSource {
        pub inner: ScriptedSource,
        pub gated: String,
        pub entered: Notify,
        pub release: Notify,
    }

    impl GatedSource {
        pub fn new(inner: ScriptedSource, gated: &str) -> Self {
            Self { inner, gated: gated.to_string(), entered: Notify::new(), release: Notify::new() }
        }
    }

    #[async_trait]
    impl MarketDataSource for GatedSource {
        async fn get_history(&self, symbol: &str, period: &str, interval: &str) -> std::result::Result<Vec<OhlcvData>, MarketDataError> {
            if symbol == self.gated {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.get_history(symbol, period, interval).await
        }
    }

    /// Linear regression that counts how often it is built and released.
    pub struct CountingEngine {
        inner: LinearRegression,
        released: Arc<AtomicUsize>,
    }

    impl ForecastEngine for CountingEngine {
        fn fit(&mut self, features: &[f64], labels: &[f64]) -> std::result::Result<(), EngineError> {
            self.inner.fit(features, labels)
        }
        fn predict(&self, inputs: &[f64]) -> std::result::Result<Vec<f64>, EngineError> {
            self.inner.predict(inputs)
        }
        fn release(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
            self.inner.release();
        }
    }

    pub struct Counters {
        pub built: Arc<AtomicUsize>,
        pub released: Arc<AtomicUsize>,
    }

    impl Counters {
        pub fn built(&self) -> usize {
            self.built.load(Ordering::SeqCst)
        }
        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    pub fn counting_factory() -> (EngineFactory, Counters) {
        let built = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let counters = Counters { built: built.clone(), released: released.clone() };
        let factory: EngineFactory = Arc::new(move || {
            built.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingEngine { inner: LinearRegression::new(), released: released.clone() }) as Box<dyn ForecastEngine>
        });
        (factory, counters)
    }

    pub fn service_with(source: Arc<dyn MarketDataSource>, suffixes: &[&str]) -> (ForecastService, Counters) {
        let (factory, counters) = counting_factory();
        let service = ForecastService::new(
            PredictionCache::new(Box::new(MemoryStore::new())),
            source,
            factory,
            MaintenanceLock::new(),
            suffixes.iter().map(|s| s.to_string()).collect(),
        );
        (service, counters)
    }

    pub fn request(ticker: &str, days: usize) -> ForecastRequest {
        ForecastRequest { ticker: ticker.to_string(), number_of_days: days, ..ForecastRequest::default() }
    }
}
