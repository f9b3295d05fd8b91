use crate::engine::EngineError;
use crate::features::DatasetError;
use crate::store::StoreError;
use crate::yahoo::MarketDataError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AppError {
    #[error("No stock data available for the given ticker and period")]
    NoData,

    #[error("Insufficient data for the given number_of_days")]
    InsufficientData,

    #[error("Dataset is empty after preprocessing")]
    EmptyDataset,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Service temporarily unavailable: daily prediction refresh in progress")]
    MaintenanceInProgress,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Upstream provider error: {0}")]
    Upstream(String),

    #[error("News provider is not configured")]
    NewsUnavailable,

    #[error("Forecast engine error: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoData | Self::InsufficientData | Self::EmptyDataset | Self::InvalidParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MaintenanceInProgress | Self::NewsUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::Engine(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Engine(err.to_string())
    }
}

impl From<DatasetError> for AppError {
    fn from(err: DatasetError) -> Self {
        match err {
            DatasetError::InsufficientData { .. } => AppError::InsufficientData,
            DatasetError::Empty => AppError::EmptyDataset,
            DatasetError::ZeroHorizon => {
                AppError::InvalidParameter("number_of_days must be at least 1".to_string())
            }
        }
    }
}

impl From<MarketDataError> for AppError {
    fn from(err: MarketDataError) -> Self {
        match err {
            MarketDataError::InvalidInterval(_) | MarketDataError::InvalidPeriod(_) => {
                AppError::InvalidParameter(err.to_string())
            }
            other => AppError::Upstream(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
