use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Forecast Data Structures ---

/// Name of the single series produced by the default forecast engine.
pub const ENSEMBLE_SERIES: &str = "ensemble";

/// Maximum age of a cached record before it is recomputed.
pub const FRESHNESS_WINDOW: Duration = Duration::days(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Prediction")]
    pub prediction: f64,
}

// Named prediction series as returned to clients
pub type SeriesMap = BTreeMap<String, Vec<ForecastPoint>>;

/// Stored form of a per-ticker forecast. On the wire the `timestamp` field is
/// dropped and only the series remain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    #[serde(flatten)]
    pub series: SeriesMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl ForecastRecord {
    pub fn new(series: SeriesMap, generated_at: DateTime<Utc>) -> Self {
        Self {
            series,
            timestamp: Some(generated_at.to_rfc3339()),
        }
    }

    /// Parsed generation time. `None` when the timestamp is absent or cannot
    /// be read as RFC 3339 or a naive ISO-8601 datetime (taken as UTC).
    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Client-facing form: every series, no internal fields.
    pub fn into_series(self) -> SeriesMap {
        self.series
    }
}

/// Builds the `(date, prediction)` series for the days after `today`.
pub fn dated_series(today: NaiveDate, predictions: &[f64]) -> Vec<ForecastPoint> {
    predictions
        .iter()
        .enumerate()
        .map(|(i, &prediction)| ForecastPoint {
            date: today + Duration::days(i as i64 + 1),
            prediction,
        })
        .collect()
}

// --- Ticker Set ---

// Fixed ordered tickers refreshed by the maintenance job
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TickerSet(pub Vec<String>);

impl TickerSet {
    /// Uppercases, trims and de-duplicates while keeping first-seen order.
    pub fn new<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = Vec::new();
        for ticker in tickers {
            let normalized = normalize_ticker(ticker.as_ref());
            if !normalized.is_empty() && !seen.contains(&normalized) {
                seen.push(normalized);
            }
        }
        Self(seen)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}
