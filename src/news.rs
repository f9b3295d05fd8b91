use crate::error::AppError;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const DEFAULT_NEWS_URL: &str = "https://newsapi.org/v2/everything";

/// Thin pass-through to the news provider. Responses are returned as the
/// provider sent them; nothing is cached.
pub struct NewsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl NewsClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    #[instrument(skip(self))]
    pub async fn search(&self, topic: &str) -> Result<Value, AppError> {
        let api_key = self.api_key.as_deref().ok_or(AppError::NewsUnavailable)?;

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", topic), ("sortBy", "publishedAt"), ("apiKey", api_key)])
            .send()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "News provider responded with error");
            return Err(AppError::Upstream(format!("news provider status {}", response.status())));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;
        debug!("Fetched news");
        Ok(body)
    }
}
