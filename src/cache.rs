use crate::data_structures::{ForecastRecord, SeriesMap};
use crate::store::{KvStore, StoreError};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Per-ticker forecast cache on top of the key-value store.
///
/// Reads fail open: a missing document, a transport error or an unreadable
/// document all come back as `None` so the caller recomputes.
pub struct PredictionCache {
    store: Box<dyn KvStore>,
}

impl PredictionCache {
    pub fn new(store: Box<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, ticker: &str) -> Option<ForecastRecord> {
        let document = match self.store.get(ticker).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!(ticker, "Cache miss: no record");
                return None;
            }
            Err(e) => {
                warn!(ticker, error = %e, "Failed to read cached prediction, treating as miss");
                return None;
            }
        };

        match serde_json::from_value::<ForecastRecord>(document) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(ticker, error = %e, "Cached prediction is malformed, treating as miss");
                None
            }
        }
    }

    /// Stamps the record with `now` and replaces whatever was stored.
    pub async fn put(&self, ticker: &str, series: SeriesMap) -> Result<ForecastRecord, StoreError> {
        self.put_at(ticker, series, Utc::now()).await
    }

    pub(crate) async fn put_at(
        &self,
        ticker: &str,
        series: SeriesMap,
        now: DateTime<Utc>,
    ) -> Result<ForecastRecord, StoreError> {
        let record = ForecastRecord::new(series, now);
        let document = serde_json::to_value(&record)?;
        self.store.put(ticker, &document).await?;
        debug!(ticker, "Stored prediction record");
        Ok(record)
    }

    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.store.delete_all().await
    }

    /// Every readable record keyed by ticker. Unreadable documents are skipped;
    /// store errors propagate.
    pub async fn list_all(&self) -> Result<HashMap<String, ForecastRecord>, StoreError> {
        let documents = self.store.list().await?;
        let mut records = HashMap::with_capacity(documents.len());
        for (ticker, document) in documents {
            match serde_json::from_value::<ForecastRecord>(document) {
                Ok(record) => {
                    records.insert(ticker, record);
                }
                Err(e) => warn!(ticker, error = %e, "Skipping malformed cached prediction"),
            }
        }
        Ok(records)
    }
}

/// True iff the record carries a readable timestamp younger than `max_age`.
pub fn is_fresh(record: &ForecastRecord, max_age: Duration, now: DateTime<Utc>) -> bool {
    match record.generated_at() {
        Some(generated_at) => {
            let age = now - generated_at;
            let fresh = age < max_age;
            debug!(age_secs = age.num_seconds(), fresh, "Checked record age");
            fresh
        }
        None => {
            debug!(timestamp = ?record.timestamp, "Record has no readable timestamp, treating as stale");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{dated_series, ENSEMBLE_SERIES, FRESHNESS_WINDOW};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{json, Value};

    struct FailingStore;

    #[async_trait]
    impl KvStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Err(StoreError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR))
        }
        async fn put(&self, _key: &str, _value: &Value) -> Result<(), StoreError> {
            Err(StoreError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR))
        }
        async fn list(&self) -> Result<HashMap<String, Value>, StoreError> {
            Err(StoreError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR))
        }
        async fn delete_all(&self) -> Result<(), StoreError> {
            Err(StoreError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR))
        }
    }

    fn sample_series() -> SeriesMap {
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mut series = SeriesMap::new();
        series.insert(ENSEMBLE_SERIES.to_string(), dated_series(today, &[1.0, 2.0, 3.0]));
        series
    }

    fn record_with(timestamp: Option<&str>) -> ForecastRecord {
        ForecastRecord { series: sample_series(), timestamp: timestamp.map(String::from) }
    }

    #[test]
    fn test_freshness_window() {
        let now = DateTime::parse_from_rfc3339("2024-05-02T12:00:00Z").unwrap().with_timezone(&Utc);
        assert!(is_fresh(&record_with(Some("2024-05-02T00:00:00Z")), FRESHNESS_WINDOW, now));
        assert!(is_fresh(&record_with(Some("2024-05-01T12:00:01Z")), FRESHNESS_WINDOW, now));
        // Exactly one day old is stale
        assert!(!is_fresh(&record_with(Some("2024-05-01T12:00:00Z")), FRESHNESS_WINDOW, now));
        assert!(!is_fresh(&record_with(Some("2024-04-20T12:00:00Z")), FRESHNESS_WINDOW, now));
    }

    #[test]
    fn test_missing_or_malformed_timestamp_is_stale() {
        let now = Utc::now();
        assert!(!is_fresh(&record_with(None), FRESHNESS_WINDOW, now));
        assert!(!is_fresh(&record_with(Some("not a date")), FRESHNESS_WINDOW, now));
    }

    #[tokio::test]
    async fn test_put_stamps_and_overwrites() {
        let cache = PredictionCache::new(Box::new(MemoryStore::new()));
        let first = cache.put("AAPL", sample_series()).await.unwrap();
        assert!(first.generated_at().is_some());

        let mut replacement = SeriesMap::new();
        replacement.insert("other".to_string(), Vec::new());
        cache.put("AAPL", replacement.clone()).await.unwrap();

        let stored = cache.get("AAPL").await.unwrap();
        assert_eq!(stored.series, replacement);
        assert!(is_fresh(&stored, FRESHNESS_WINDOW, Utc::now()));
    }

    #[tokio::test]
    async fn test_get_fails_open() {
        let cache = PredictionCache::new(Box::new(FailingStore));
        assert!(cache.get("AAPL").await.is_none());
        assert!(cache.list_all().await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_document_is_miss() {
        let store = MemoryStore::new();
        store.put("AAPL", &json!({"ensemble": "oops"})).await.unwrap();
        let cache = PredictionCache::new(Box::new(store));
        assert!(cache.get("AAPL").await.is_none());
        assert!(cache.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let cache = PredictionCache::new(Box::new(MemoryStore::new()));
        cache.put("AAPL", sample_series()).await.unwrap();
        cache.put("MSFT", sample_series()).await.unwrap();
        cache.clear_all().await.unwrap();
        assert!(cache.list_all().await.unwrap().is_empty());
    }
}
