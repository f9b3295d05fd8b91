use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration as StdDuration, SystemTime};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart/";

const VALID_PERIODS: [&str; 11] = ["1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max"];
const VALID_INTERVALS: [&str; 13] = [
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported interval: {0}")]
    InvalidInterval(String),

    #[error("Unsupported period: {0}")]
    InvalidPeriod(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcvData {
    pub time: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<u64>,
    pub symbol: Option<String>,
}

/// Source of historical bars. An unknown symbol yields an empty series rather
/// than an error so callers can move on to the next suffix variant.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_history(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Vec<OhlcvData>, MarketDataError>;
}

pub fn validate_period(period: &str) -> Result<(), MarketDataError> {
    if VALID_PERIODS.contains(&period) {
        Ok(())
    } else {
        Err(MarketDataError::InvalidPeriod(period.to_string()))
    }
}

pub fn validate_interval(interval: &str) -> Result<(), MarketDataError> {
    if VALID_INTERVALS.contains(&interval) {
        Ok(())
    } else {
        Err(MarketDataError::InvalidInterval(interval.to_string()))
    }
}

pub struct YahooClient {
    client: Client,
    base_url: String,
    rate_limit_per_minute: u32,
    request_timestamps: Mutex<Vec<SystemTime>>,
    user_agents: Vec<String>,
    random_agent: bool,
}

impl YahooClient {
    pub fn new(base_url: &str, random_agent: bool, rate_limit_per_minute: u32) -> Result<Self, MarketDataError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()?;

        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.3 Safari/605.1.15".to_string(),
        ];

        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(YahooClient {
            client,
            base_url,
            rate_limit_per_minute: rate_limit_per_minute.max(1),
            request_timestamps: Mutex::new(Vec::new()),
            user_agents,
            random_agent,
        })
    }

    fn get_user_agent(&self) -> String {
        if self.random_agent {
            self.user_agents
                .choose(&mut rand::rng())
                .unwrap_or(&self.user_agents[0])
                .clone()
        } else {
            self.user_agents[0].clone()
        }
    }

    async fn enforce_rate_limit(&self) {
        let mut timestamps = self.request_timestamps.lock().await;
        let current_time = SystemTime::now();

        // Remove timestamps older than 1 minute
        timestamps.retain(|&timestamp| {
            current_time.duration_since(timestamp).unwrap_or(StdDuration::from_secs(0)) < StdDuration::from_secs(60)
        });

        if timestamps.len() >= self.rate_limit_per_minute as usize {
            if let Some(&oldest_request) = timestamps.first() {
                let elapsed = current_time.duration_since(oldest_request).unwrap_or(StdDuration::from_secs(0));
                let wait_time = StdDuration::from_secs(60).saturating_sub(elapsed);
                if !wait_time.is_zero() {
                    debug!(wait_ms = wait_time.as_millis(), "Rate limit reached, waiting");
                    sleep(wait_time + StdDuration::from_millis(100)).await;
                }
            }
        }

        timestamps.push(SystemTime::now());
    }
}

#[async_trait]
impl MarketDataSource for YahooClient {
    #[instrument(skip(self))]
    async fn get_history(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Vec<OhlcvData>, MarketDataError> {
        validate_period(period)?;
        validate_interval(interval)?;
        self.enforce_rate_limit().await;

        let url = format!("{}{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .query(&[("range", period), ("interval", interval)])
            .header("Accept", "application/json, text/plain, */*")
            .header("User-Agent", self.get_user_agent())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(symbol, "Chart API does not know this symbol");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(MarketDataError::InvalidResponse(format!("status {}", status)));
        }

        let body = response.json::<Value>().await?;
        let bars = parse_chart(&body, symbol)?;
        debug!(symbol, bars = bars.len(), "Fetched price history");
        Ok(bars)
    }
}

/// Reads a chart API payload into bars ordered by time. Rows without a close
/// are skipped; a null or empty result is an empty series.
pub fn parse_chart(body: &Value, symbol: &str) -> Result<Vec<OhlcvData>, MarketDataError> {
    let chart = body
        .get("chart")
        .ok_or_else(|| MarketDataError::InvalidResponse("Missing key: chart".to_string()))?;

    let result = match chart.get("result").and_then(|r| r.as_array()).and_then(|r| r.first()) {
        Some(result) => result,
        None => return Ok(Vec::new()),
    };

    let times = match result.get("timestamp").and_then(|t| t.as_array()) {
        Some(times) => times,
        None => return Ok(Vec::new()),
    };

    let quote = result
        .pointer("/indicators/quote/0")
        .ok_or_else(|| MarketDataError::InvalidResponse("Missing key: indicators.quote".to_string()))?;

    let column = |name: &str| -> Result<&Vec<Value>, MarketDataError> {
        quote
            .get(name)
            .and_then(|v| v.as_array())
            .ok_or_else(|| MarketDataError::InvalidResponse(format!("Missing key: {}", name)))
    };
    let closes = column("close")?;
    let opens = column("open").ok();
    let highs = column("high").ok();
    let lows = column("low").ok();
    let volumes = column("volume").ok();

    if closes.len() != times.len() {
        return Err(MarketDataError::InvalidResponse("Inconsistent array lengths".to_string()));
    }

    let at = |values: Option<&Vec<Value>>, i: usize| values.and_then(|v| v.get(i)).and_then(|v| v.as_f64());

    let mut bars = Vec::with_capacity(times.len());
    for (i, raw_time) in times.iter().enumerate() {
        let Some(close) = closes[i].as_f64() else {
            continue;
        };
        let timestamp = raw_time
            .as_i64()
            .ok_or_else(|| MarketDataError::InvalidResponse(format!("Invalid timestamp at index {}", i)))?;
        let time = DateTime::<Utc>::from_timestamp(timestamp, 0)
            .ok_or_else(|| MarketDataError::InvalidResponse(format!("Timestamp {} out of range", timestamp)))?;

        bars.push(OhlcvData {
            time,
            open: at(opens, i),
            high: at(highs, i),
            low: at(lows, i),
            close,
            volume: volumes.and_then(|v| v.get(i)).and_then(|v| v.as_u64()),
            symbol: Some(symbol.to_string()),
        });
    }

    bars.sort_by(|a, b| a.time.cmp(&b.time));
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_yahoo_client_creation() {
        let client = YahooClient::new(DEFAULT_BASE_URL, true, 60);
        assert!(client.is_ok());
    }

    #[test]
    fn test_period_and_interval_validation() {
        assert!(validate_period("1y").is_ok());
        assert!(validate_period("3y").is_err());
        assert!(validate_interval("1h").is_ok());
        assert!(matches!(validate_interval("7h"), Err(MarketDataError::InvalidInterval(_))));
    }

    #[test]
    fn test_parse_chart_skips_null_closes() {
        let body = json!({
            "chart": {
                "result": [{
                    "timestamp": [1700003600, 1700000000, 1700007200],
                    "indicators": {"quote": [{
                        "open": [1.0, 2.0, 3.0],
                        "high": [1.5, 2.5, 3.5],
                        "low": [0.5, 1.5, 2.5],
                        "close": [10.0, 11.0, null],
                        "volume": [100, 200, 300]
                    }]}
                }],
                "error": null
            }
        });
        let bars = parse_chart(&body, "AAPL").unwrap();
        assert_eq!(bars.len(), 2);
        // Sorted by time
        assert_eq!(bars[0].close, 11.0);
        assert_eq!(bars[1].close, 10.0);
        assert_eq!(bars[1].volume, Some(100));
    }

    #[test]
    fn test_parse_chart_unknown_symbol() {
        let body = json!({"chart": {"result": null, "error": {"code": "Not Found"}}});
        assert!(parse_chart(&body, "NOPE").unwrap().is_empty());
    }

    #[test]
    fn test_parse_chart_rejects_garbage() {
        assert!(parse_chart(&json!({"foo": 1}), "AAPL").is_err());
    }
}
