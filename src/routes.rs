use std::sync::Arc;

use askama::Template;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::FixedOffset;
use serde_json::json;
use tracing::error;

use crate::aggregator::{Aggregator, NewsSnapshot, RefreshOutcome};
use crate::presentation::{format_published, present, DisplayEntry};
use crate::relay::{Relay, RelayRequest};

pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub relay: Arc<Relay>,
    pub display_offset: FixedOffset,
}

pub fn router(state: Arc<AppState>, relay_route: &str) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/news", get(news_page))
        .route("/news/refresh", post(refresh))
        .route("/news/status", get(refresh_status))
        .route("/news/list", get(news_list))
        .route("/health", get(health))
        .route(relay_route, post(rss_feeds))
        .with_state(state)
}

/// Everything the news templates need from one snapshot.
pub struct NewsView {
    pub entries: Vec<DisplayEntry>,
    pub error: Option<String>,
    pub updated_at: Option<String>,
}

impl NewsView {
    pub fn new(snapshot: &NewsSnapshot, offset: &FixedOffset) -> Self {
        Self {
            entries: present(&snapshot.entries, offset),
            error: snapshot.error.clone(),
            updated_at: snapshot
                .completed_at
                .map(|completed| format_published(completed, offset)),
        }
    }
}

// Template structs
#[derive(Template)]
#[template(path = "news.html")]
pub struct NewsTemplate {
    pub news: NewsView,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "news_list.html")]
pub struct NewsListTemplate {
    pub news: NewsView,
}

#[derive(Template)]
#[template(path = "refresh_button.html")]
pub struct RefreshButtonTemplate {
    pub refreshing: bool,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

// Custom error type
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: {}", self.0),
        )
            .into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

/// Run a refresh cycle to completion on its own task so that a client hanging
/// up mid-request cannot leave the aggregator stuck in the loading state.
async fn run_refresh(aggregator: &Arc<Aggregator>) -> Result<NewsSnapshot, AppError> {
    let task = aggregator.clone();
    let outcome = tokio::spawn(async move { task.refresh().await }).await?;

    Ok(match outcome {
        RefreshOutcome::Updated(snapshot) | RefreshOutcome::Failed(snapshot) => snapshot,
        RefreshOutcome::Superseded { .. } => aggregator.snapshot().await,
    })
}

// Route handlers
pub async fn index() -> Redirect {
    Redirect::to("/news")
}

pub async fn news_page(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let snapshot = run_refresh(&state.aggregator).await?;

    Ok(HtmlTemplate(NewsTemplate {
        news: NewsView::new(&snapshot, &state.display_offset),
        refreshing: snapshot.is_loading(),
    }))
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let snapshot = run_refresh(&state.aggregator).await?;

    Ok(HtmlTemplate(NewsListTemplate {
        news: NewsView::new(&snapshot, &state.display_offset),
    }))
}

/// Client-side event fired once a polled refresh has settled, telling the
/// news list to reload itself from `/news/list`.
pub const NEWS_REFRESHED_EVENT: &str = "news-refreshed";

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> Response {
    let refreshing = state.aggregator.snapshot().await.is_loading();
    let button = HtmlTemplate(RefreshButtonTemplate { refreshing });

    if refreshing {
        button.into_response()
    } else {
        ([("HX-Trigger", NEWS_REFRESHED_EVENT)], button).into_response()
    }
}

/// Render the latest snapshot without starting a new refresh.
pub async fn news_list(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.aggregator.snapshot().await;

    HtmlTemplate(NewsListTemplate {
        news: NewsView::new(&snapshot, &state.display_offset),
    })
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}

pub async fn rss_feeds(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RelayRequest>,
) -> Response {
    match state.relay.fetch_feeds(&request.sources).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            error!("Relay request for {:?} failed: {}", request.sources, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "message": format!("Internal Server Error: {}", e),
                    "data": null
                })),
            )
                .into_response()
        }
    }
}
