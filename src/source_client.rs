use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors talking to the aggregation endpoint.
///
/// The aggregator treats every variant the same way (the whole refresh
/// fails); the split exists for logs and tests.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("RSS API endpoint not configured")]
    EndpointNotConfigured,
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    Status(u16),
    #[error("Invalid response structure: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SourceRequest {
    pub sources: Vec<String>,
}

/// Envelope returned by the aggregation endpoint. Fields are left loose so
/// that shape problems surface as [`FetchError::InvalidResponse`] instead of
/// a generic decode error.
#[derive(Debug, Deserialize)]
struct SourceResponse {
    status: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

pub struct SourceClient {
    client: Client,
    endpoint: Option<String>,
}

impl SourceClient {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Newsdesk/1.0 (RSS Aggregator)")
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.filter(|e| !e.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Ask the aggregation endpoint for one raw XML document per source.
    pub async fn fetch(&self, sources: &[String]) -> Result<Vec<String>, FetchError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(FetchError::EndpointNotConfigured)?;

        debug!("Requesting {} sources from {}", sources.len(), endpoint);

        let response = self
            .client
            .post(endpoint)
            .json(&SourceRequest {
                sources: sources.to_vec(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: SourceResponse = response
            .json()
            .await
            .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

        extract_feeds(body)
    }
}

fn extract_feeds(body: SourceResponse) -> Result<Vec<String>, FetchError> {
    match body.status.as_deref() {
        Some("ok") => {}
        Some(other) => {
            return Err(FetchError::InvalidResponse(format!(
                "status was {:?}",
                other
            )))
        }
        None => return Err(FetchError::InvalidResponse("missing status".to_string())),
    }

    let feeds = body
        .data
        .as_ref()
        .and_then(|data| data.get("feeds"))
        .and_then(|feeds| feeds.as_array())
        .ok_or_else(|| FetchError::InvalidResponse("data.feeds is not a list".to_string()))?;

    feeds
        .iter()
        .map(|feed| {
            feed.as_str()
                .map(str::to_string)
                .ok_or_else(|| FetchError::InvalidResponse("feed is not a string".to_string()))
        })
        .collect()
}
