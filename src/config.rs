use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Prefix for the JSON API routes, e.g. `/api`
    #[serde(default = "default_api_path")]
    pub api_path: String,
    /// Timeout for every outbound HTTP request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Restrict CORS to `allowed_origins` instead of allowing any origin
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub news: NewsConfig,
    /// Registry of feeds the relay is allowed to download
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_api_path() -> String {
    "/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsConfig {
    /// Aggregation endpoint the news page pulls raw feeds from
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_news_sources")]
    pub sources: Vec<String>,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Offset applied when rendering timestamps
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            sources: default_news_sources(),
            max_entries: default_max_entries(),
            utc_offset_minutes: 0,
        }
    }
}

fn default_news_sources() -> Vec<String> {
    vec!["fox".to_string()]
}

fn default_max_entries() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.news.max_entries == 0 {
            anyhow::bail!("news.max_entries must be greater than zero");
        }
        if !self.api_path.starts_with('/') {
            anyhow::bail!("api_path must start with '/': {}", self.api_path);
        }
        if self.display_offset().is_none() {
            anyhow::bail!(
                "news.utc_offset_minutes out of range: {}",
                self.news.utc_offset_minutes
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Timezone used by the news page when formatting publish dates.
    pub fn display_offset(&self) -> Option<FixedOffset> {
        self.news
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }

    /// Route the relay is mounted on, e.g. `/api/rss-feeds/`.
    pub fn relay_route(&self) -> String {
        format!("{}/rss-feeds/", self.api_path.trim_end_matches('/'))
    }
}
