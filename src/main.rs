use stock_forecast_proxy::api::{self, AppState};
use stock_forecast_proxy::cache::PredictionCache;
use stock_forecast_proxy::config::AppConfig;
use stock_forecast_proxy::engine::default_engine_factory;
use stock_forecast_proxy::lock::MaintenanceLock;
use stock_forecast_proxy::news::NewsClient;
use stock_forecast_proxy::scheduler;
use stock_forecast_proxy::store::open_store;
use stock_forecast_proxy::workflow::ForecastService;
use stock_forecast_proxy::yahoo::YahooClient;
use std::{net::SocketAddr, sync::Arc};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = AppConfig::load()?;

    // Initialize tracing with node_name in all logs
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    // Set a global span with node_name for all subsequent logs
    let _span = tracing::info_span!("node", name = %app_config.node_name).entered();

    tracing::info!("Starting stock-forecast-proxy");
    tracing::info!(
        ?app_config.environment,
        port = app_config.port,
        tickers = app_config.tickers.len(),
        "Loaded configuration"
    );

    let store = open_store(&app_config.database_url, app_config.database_auth.clone())?;
    let source = YahooClient::new(&app_config.market_data_url, true, app_config.market_data_rate_limit)?;
    let service = Arc::new(ForecastService::new(
        PredictionCache::new(store),
        Arc::new(source),
        default_engine_factory(),
        MaintenanceLock::new(),
        app_config.ticker_suffixes.clone(),
    ));
    let news = Arc::new(NewsClient::new(&app_config.news_api_url, app_config.news_api_key.clone())?);
    if !news.is_configured() {
        tracing::warn!("NEWS_API_KEY not set, /news will return 503");
    }

    tracing::info!("Spawning maintenance scheduler");
    tokio::spawn(scheduler::run(service.clone(), app_config.clone()));

    let app = api::router(AppState { service, news }, Some(app_config.rate_limit));

    let addr = SocketAddr::from(([0, 0, 0, 0], app_config.port));
    tracing::info!(%addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
