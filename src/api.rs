use crate::config::RateLimitConfig;
use crate::data_structures::SeriesMap;
use crate::error::AppError;
use crate::news::NewsClient;
use crate::workflow::{ForecastRequest, ForecastService};
use axum::{
    extract::{rejection::QueryRejection, FromRef, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, instrument, warn};

pub type SharedService = Arc<ForecastService>;
pub type SharedNews = Arc<NewsClient>;

#[derive(Clone)]
pub struct AppState {
    pub service: SharedService,
    pub news: SharedNews,
}

impl FromRef<AppState> for SharedService {
    fn from_ref(app_state: &AppState) -> SharedService {
        app_state.service.clone()
    }
}

impl FromRef<AppState> for SharedNews {
    fn from_ref(app_state: &AppState) -> SharedNews {
        app_state.news.clone()
    }
}

/// Routes with permissive CORS. `/predict` is rate-limited per client IP when
/// limits are given, which requires serving with connect info.
pub fn router(state: AppState, rate_limit: Option<RateLimitConfig>) -> Router {
    let mut predict_route = get(predict_handler);
    if let Some(limits) = rate_limit {
        match GovernorConfigBuilder::default()
            .per_second(limits.replenish_secs)
            .burst_size(limits.burst_size)
            .finish()
        {
            Some(governor_conf) => {
                predict_route = predict_route.layer(GovernorLayer::new(Arc::new(governor_conf)));
            }
            None => warn!(?limits, "Invalid rate limit settings, /predict is not rate-limited"),
        }
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/predict", predict_route)
        .route("/recommendations", get(recommendations_handler))
        .route("/news", get(news_handler))
        .layer(cors)
        .with_state(state)
}

#[instrument(skip(service, params))]
pub async fn predict_handler(
    State(service): State<SharedService>,
    params: Result<Query<ForecastRequest>, QueryRejection>,
) -> Result<Json<SeriesMap>, AppError> {
    let Query(request) = params.map_err(|e| AppError::InvalidParameter(e.body_text()))?;
    debug!(ticker = %request.ticker, days = request.number_of_days, "Received prediction request");

    let series = service.predict(request).await?;
    Ok(Json(series))
}

#[instrument(skip(service))]
pub async fn recommendations_handler(
    State(service): State<SharedService>,
) -> Result<Json<HashMap<String, SeriesMap>>, AppError> {
    let recommendations = service.recommendations().await?;
    info!(ticker_count = recommendations.len(), "Returning cached recommendations");
    Ok(Json(recommendations))
}

#[derive(Debug, Deserialize)]
pub struct NewsParams {
    pub topic: Option<String>,
}

#[instrument(skip(news))]
pub async fn news_handler(
    State(news): State<SharedNews>,
    Query(params): Query<NewsParams>,
) -> Result<impl IntoResponse, AppError> {
    let topic = params
        .topic
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "stock market".to_string());
    let body: Value = news.search(&topic).await?;
    Ok((StatusCode::OK, Json(body)))
}
