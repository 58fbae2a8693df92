use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::SourceConfig;

pub const UNKNOWN_SOURCE_MESSAGE: &str = "Unknown RSS source passed.";
pub const SUCCESS_MESSAGE: &str = "Successfully retrieved all RSS feeds.";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("fetching '{source_name}' failed: {error}")]
    Request {
        source_name: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("fetching '{source_name}' returned status {status}")]
    Status { source_name: String, status: u16 },
}

#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub sources: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RelayData {
    pub feeds: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RelayResponse {
    pub status: String,
    pub message: String,
    pub data: Option<RelayData>,
    /// Seconds spent serving the request
    pub exec_time: f64,
}

/// Downloads raw feed documents for named sources on behalf of the news page.
pub struct Relay {
    client: Client,
    sources: Vec<SourceConfig>,
}

impl Relay {
    pub fn new(sources: Vec<SourceConfig>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Newsdesk/1.0 (RSS Aggregator)")
            .build()?;

        Ok(Self { client, sources })
    }

    pub fn lookup(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|source| source.name == name)
    }

    /// Fetch every named source in order. An unknown name short-circuits with
    /// an `err` envelope; a failed download is an error for the whole request.
    pub async fn fetch_feeds(&self, names: &[String]) -> Result<RelayResponse, RelayError> {
        let started = Instant::now();
        let mut feeds = Vec::with_capacity(names.len());

        for name in names {
            let Some(source) = self.lookup(name) else {
                info!("Rejecting unknown source '{}'", name);
                return Ok(RelayResponse {
                    status: "err".to_string(),
                    message: UNKNOWN_SOURCE_MESSAGE.to_string(),
                    data: None,
                    exec_time: started.elapsed().as_secs_f64(),
                });
            };

            feeds.push(self.download(source).await?);
        }

        info!(
            "Relayed {} feeds in {:.3}s",
            feeds.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(RelayResponse {
            status: "ok".to_string(),
            message: SUCCESS_MESSAGE.to_string(),
            data: Some(RelayData { feeds }),
            exec_time: started.elapsed().as_secs_f64(),
        })
    }

    async fn download(&self, source: &SourceConfig) -> Result<String, RelayError> {
        info!("Fetching feed: {} ({})", source.name, source.url);

        let request_failed = |error: reqwest::Error| RelayError::Request {
            source_name: source.name.clone(),
            error,
        };

        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .map_err(request_failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status {
                source_name: source.name.clone(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(request_failed)
    }
}
