use crate::data_structures::TickerSet;
use crate::error::AppError;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::str::FromStr;

const DEFAULT_TICKERS: [&str; 10] = [
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "RELIANCE", "TCS", "INFY",
];

// Tried in order after the bare ticker
const DEFAULT_SUFFIXES: [&str; 2] = [".NS", ".BO"];

// Wall-clock time and timezone of the daily refresh
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RefreshSchedule {
    pub time: NaiveTime,
    pub timezone: Tz,
}

impl RefreshSchedule {
    pub fn parse(time: &str, timezone: &str) -> Result<Self, AppError> {
        let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
            .map_err(|e| AppError::Config(format!("invalid refresh time '{}': {}", time, e)))?;
        let timezone: Tz = timezone
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("invalid refresh timezone '{}': {}", timezone, e)))?;
        Ok(Self { time, timezone })
    }
}

// Parameters used for every ticker of the scheduled refresh
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BatchParams {
    pub period: String,
    pub interval: String,
    pub number_of_days: usize,
}

impl Default for BatchParams {
    fn default() -> Self {
        Self {
            period: "1y".to_string(),
            interval: "1h".to_string(),
            number_of_days: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    // Seconds to replenish one request of the burst quota
    pub replenish_secs: u64,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { replenish_secs: 1, burst_size: 10 }
    }
}

// YAML-serializable configuration structure
#[derive(Serialize, Deserialize, Debug)]
pub struct ConfigYaml {
    pub node_name: Option<String>,
    pub environment: Option<String>,
    pub port: Option<u16>,
    pub database_url: Option<String>,
    pub database_auth: Option<String>,
    pub tickers: Option<Vec<String>>,
    pub ticker_suffixes: Option<Vec<String>>,
    pub refresh_time: Option<String>,
    pub refresh_timezone: Option<String>,
    pub refresh_on_startup: Option<bool>,
    pub batch: Option<BatchParams>,
    pub market_data_url: Option<String>,
    pub market_data_rate_limit: Option<u32>,
    pub news_api_url: Option<String>,
    pub news_api_key: Option<String>,
    pub rate_limit: Option<RateLimitConfig>,
}

// Holds application-wide settings
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub node_name: String,
    pub environment: String,
    pub port: u16,
    pub database_url: String,
    pub database_auth: Option<String>,
    pub tickers: TickerSet,
    pub ticker_suffixes: Vec<String>,
    pub schedule: RefreshSchedule,
    pub refresh_on_startup: bool,
    pub batch: BatchParams,
    pub market_data_url: String,
    pub market_data_rate_limit: u32,
    pub news_api_url: String,
    pub news_api_key: Option<String>,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    // Load configuration from YAML file or environment variables
    pub fn load() -> Result<Self, AppError> {
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            Self::from_yaml(&config_file)
        } else {
            Self::from_env()
        }
    }

    pub fn from_yaml(file_path: &str) -> Result<Self, AppError> {
        let yaml_content = fs::read_to_string(file_path)
            .map_err(|e| AppError::Config(format!("failed to read config file {}: {}", file_path, e)))?;
        Self::from_yaml_str(&yaml_content)
    }

    pub fn from_yaml_str(yaml_content: &str) -> Result<Self, AppError> {
        let yaml_config: ConfigYaml = serde_yaml::from_str(yaml_content)
            .map_err(|e| AppError::Config(format!("failed to parse YAML config: {}", e)))?;

        let database_url = yaml_config
            .database_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AppError::Config("database_url must be set".to_string()))?;

        let schedule = RefreshSchedule::parse(
            yaml_config.refresh_time.as_deref().unwrap_or("00:00"),
            yaml_config.refresh_timezone.as_deref().unwrap_or("UTC"),
        )?;

        Ok(Self {
            node_name: yaml_config.node_name.unwrap_or_else(default_node_name),
            environment: yaml_config.environment.unwrap_or_else(|| "development".to_string()),
            port: yaml_config.port.unwrap_or(8000),
            database_url,
            database_auth: yaml_config.database_auth,
            tickers: yaml_config
                .tickers
                .map(TickerSet::new)
                .unwrap_or_else(|| TickerSet::new(DEFAULT_TICKERS)),
            ticker_suffixes: yaml_config
                .ticker_suffixes
                .unwrap_or_else(|| DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect()),
            schedule,
            refresh_on_startup: yaml_config.refresh_on_startup.unwrap_or(false),
            batch: yaml_config.batch.unwrap_or_default(),
            market_data_url: yaml_config
                .market_data_url
                .unwrap_or_else(|| crate::yahoo::DEFAULT_BASE_URL.to_string()),
            market_data_rate_limit: yaml_config.market_data_rate_limit.unwrap_or(60),
            news_api_url: yaml_config
                .news_api_url
                .unwrap_or_else(|| crate::news::DEFAULT_NEWS_URL.to_string()),
            news_api_key: yaml_config.news_api_key,
            rate_limit: yaml_config.rate_limit.unwrap_or_default(),
        })
    }

    // Load all configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AppError::Config("DATABASE_URL must be set".to_string()))?;

        let schedule = RefreshSchedule::parse(
            &lookup("REFRESH_TIME").unwrap_or_else(|| "00:00".to_string()),
            &lookup("REFRESH_TIMEZONE").unwrap_or_else(|| "UTC".to_string()),
        )?;

        let tickers = lookup("TICKERS")
            .map(|s| TickerSet::new(split_list(&s)))
            .unwrap_or_else(|| TickerSet::new(DEFAULT_TICKERS));

        // An empty TICKER_SUFFIXES disables suffix retries
        let ticker_suffixes = lookup("TICKER_SUFFIXES")
            .map(|s| split_list(&s))
            .unwrap_or_else(|| DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect());

        let defaults = BatchParams::default();
        let batch = BatchParams {
            period: lookup("BATCH_PERIOD").unwrap_or(defaults.period),
            interval: lookup("BATCH_INTERVAL").unwrap_or(defaults.interval),
            number_of_days: parse_or(&lookup, "BATCH_DAYS", defaults.number_of_days),
        };

        let rate_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            replenish_secs: parse_or(&lookup, "RATE_LIMIT_REPLENISH_SECS", rate_defaults.replenish_secs),
            burst_size: parse_or(&lookup, "RATE_LIMIT_BURST", rate_defaults.burst_size),
        };

        Ok(Self {
            node_name: lookup("NODE_NAME").unwrap_or_else(default_node_name),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            port: parse_or(&lookup, "PORT", 8000),
            database_url,
            database_auth: lookup("DATABASE_AUTH"),
            tickers,
            ticker_suffixes,
            schedule,
            refresh_on_startup: parse_or(&lookup, "REFRESH_ON_STARTUP", false),
            batch,
            market_data_url: lookup("MARKET_DATA_URL")
                .unwrap_or_else(|| crate::yahoo::DEFAULT_BASE_URL.to_string()),
            market_data_rate_limit: parse_or(&lookup, "MARKET_DATA_RATE_LIMIT", 60),
            news_api_url: lookup("NEWS_API_URL").unwrap_or_else(|| crate::news::DEFAULT_NEWS_URL.to_string()),
            news_api_key: lookup("NEWS_API_KEY"),
            rate_limit,
        })
    }
}

fn default_node_name() -> String {
    "stock-forecast-proxy".to_string()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_database_url_is_fatal() {
        let result = AppConfig::from_lookup(lookup_from(&[("PORT", "9000")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_env_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "memory://")])).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.ticker_suffixes, vec![".NS".to_string(), ".BO".to_string()]);
        assert_eq!(config.batch, BatchParams::default());
        assert_eq!(config.tickers.len(), DEFAULT_TICKERS.len());
        assert_eq!(config.schedule.timezone, chrono_tz::UTC);
        assert!(!config.refresh_on_startup);
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "https://example.firebaseio.com"),
            ("TICKERS", "aapl, msft"),
            ("TICKER_SUFFIXES", ".BO,.NS"),
            ("REFRESH_TIME", "06:30"),
            ("REFRESH_TIMEZONE", "Asia/Kolkata"),
            ("BATCH_DAYS", "5"),
            ("PORT", "not-a-port"),
        ]))
        .unwrap();
        assert_eq!(config.tickers.0, vec!["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(config.ticker_suffixes, vec![".BO".to_string(), ".NS".to_string()]);
        assert_eq!(config.schedule.time, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
        assert_eq!(config.schedule.timezone, chrono_tz::Asia::Kolkata);
        assert_eq!(config.batch.number_of_days, 5);
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn test_invalid_schedule() {
        assert!(RefreshSchedule::parse("25:00", "UTC").is_err());
        assert!(RefreshSchedule::parse("01:00", "Mars/Olympus").is_err());
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
node_name: forecast-1
database_url: memory://
tickers: [tsla, nvda]
refresh_time: "23:15"
batch:
  period: 6mo
  interval: 1d
  number_of_days: 7
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.node_name, "forecast-1");
        assert_eq!(config.tickers.0, vec!["TSLA".to_string(), "NVDA".to_string()]);
        assert_eq!(config.batch.number_of_days, 7);
        assert_eq!(config.schedule.time, NaiveTime::from_hms_opt(23, 15, 0).unwrap());
    }

    #[test]
    fn test_yaml_requires_database_url() {
        assert!(matches!(AppConfig::from_yaml_str("port: 9000\n"), Err(AppError::Config(_))));
    }
}
