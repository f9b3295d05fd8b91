use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Namespace holding one JSON document per ticker.
pub const PREDICTIONS_PATH: &str = "predictions";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store responded with status {0}")]
    Status(StatusCode),

    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),
}

/// Remote key-value document store scoped to the predictions namespace.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replaces the document stored under `key`.
    async fn put(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    async fn list(&self) -> Result<HashMap<String, Value>, StoreError>;

    async fn delete_all(&self) -> Result<(), StoreError>;
}

/// Picks a backend from the configured URL: `memory://` for an in-process
/// map, `http(s)://` for a Firebase Realtime Database.
pub fn open_store(database_url: &str, auth: Option<String>) -> Result<Box<dyn KvStore>, StoreError> {
    if database_url.starts_with("memory://") {
        return Ok(Box::new(MemoryStore::new()));
    }
    if database_url.starts_with("https://") || database_url.starts_with("http://") {
        return Ok(Box::new(FirebaseStore::new(database_url, auth)?));
    }
    Err(StoreError::UnsupportedUrl(database_url.to_string()))
}

// --- In-memory backend ---

#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.documents.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.documents.lock().await.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn list(&self) -> Result<HashMap<String, Value>, StoreError> {
        Ok(self.documents.lock().await.clone())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.documents.lock().await.clear();
        Ok(())
    }
}

// --- Firebase Realtime Database backend ---

pub struct FirebaseStore {
    client: Client,
    base_url: String,
    auth: Option<String>,
}

impl FirebaseStore {
    pub fn new(database_url: &str, auth: Option<String>) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: database_url.trim_end_matches('/').to_string(),
            auth: auth.filter(|a| !a.is_empty()),
        })
    }

    fn document_url(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => format!("{}/{}/{}.json", self.base_url, PREDICTIONS_PATH, encode_key(key)),
            None => format!("{}/{}.json", self.base_url, PREDICTIONS_PATH),
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth {
            Some(auth) => builder.query(&[("auth", auth.as_str())]),
            None => builder,
        }
    }

    async fn read(&self, url: &str) -> Result<Value, StoreError> {
        let response = self.request(reqwest::Method::GET, url).send().await?;
        check_status(response.status())?;
        Ok(response.json::<Value>().await?)
    }

    async fn write(&self, method: reqwest::Method, url: &str, body: Option<&Value>) -> Result<(), StoreError> {
        let mut builder = self.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        check_status(response.status())
    }
}

fn check_status(status: StatusCode) -> Result<(), StoreError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StoreError::Status(status))
    }
}

// The database answers `null` for a path that holds nothing
fn document_from(value: Value) -> Option<Value> {
    if value.is_null() { None } else { Some(value) }
}

fn listing_from(value: Value) -> Result<HashMap<String, Value>, StoreError> {
    let Some(value) = document_from(value) else {
        return Ok(HashMap::new());
    };
    let documents: HashMap<String, Value> = serde_json::from_value(value)?;
    Ok(documents
        .into_iter()
        .map(|(key, doc)| (decode_key(&key), doc))
        .collect())
}

#[async_trait]
impl KvStore for FirebaseStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let document = document_from(self.read(&self.document_url(Some(key))).await?);
        debug!(found = document.is_some(), "Fetched prediction document");
        Ok(document)
    }

    #[instrument(skip(self, value))]
    async fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.write(reqwest::Method::PUT, &self.document_url(Some(key)), Some(value))
            .await
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<HashMap<String, Value>, StoreError> {
        listing_from(self.read(&self.document_url(None)).await?)
    }

    #[instrument(skip(self))]
    async fn delete_all(&self) -> Result<(), StoreError> {
        self.write(reqwest::Method::DELETE, &self.document_url(None), None).await
    }
}

// Realtime Database keys may not contain '.', so tickers like BRK.B are stored as BRK,B
fn encode_key(key: &str) -> String {
    key.replace('.', ",")
}

fn decode_key(key: &str) -> String {
    key.replace(',', ".")
}
