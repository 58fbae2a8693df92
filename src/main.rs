use std::sync::Arc;

use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsdesk::aggregator::{Aggregator, AggregatorConfig};
use newsdesk::config::Config;
use newsdesk::relay::Relay;
use newsdesk::routes::{self, AppState};
use newsdesk::source_client::SourceClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsdesk=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("NEWSDESK_CONFIG").unwrap_or_else(|_| "newsdesk.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded {} relay sources from {}",
        config.sources.len(),
        config_path
    );

    let endpoint = std::env::var("RSS_API_ENDPOINT")
        .ok()
        .or_else(|| config.news.endpoint.clone());
    if endpoint.is_none() {
        warn!("No RSS API endpoint configured; the news page will show an error");
    }

    let display_offset = config
        .display_offset()
        .ok_or_else(|| anyhow::anyhow!("invalid display offset"))?;

    let client = SourceClient::new(endpoint, config.request_timeout())?;
    let aggregator = Arc::new(Aggregator::new(
        client,
        AggregatorConfig {
            sources: config.news.sources.clone(),
            max_entries: config.news.max_entries,
        },
    ));
    let relay = Arc::new(Relay::new(config.sources.clone(), config.request_timeout())?);

    // Create app state
    let state = Arc::new(AppState {
        aggregator,
        relay,
        display_offset,
    });

    // Build router
    let app = routes::router(state, &config.relay_route())
        .nest_service("/static", ServeDir::new("static"))
        .layer(cors_layer(&config)?)
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Server starting on http://{}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    if !config.require_auth {
        return Ok(CorsLayer::permissive());
    }

    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any))
}
