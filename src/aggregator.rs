use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::parser::{parse_feed, FeedEntry};
use crate::source_client::{FetchError, SourceClient};

pub const FETCH_FAILED_MESSAGE: &str = "Failed to fetch news. Please try again.";
pub const NOT_CONFIGURED_MESSAGE: &str = "RSS API endpoint not configured";

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub sources: Vec<String>,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    Idle,
    Loading,
}

/// What the news page shows: the result of the latest completed refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsSnapshot {
    /// Generation of the refresh that produced this snapshot, 0 before any
    pub generation: u64,
    pub status: RefreshStatus,
    pub entries: Vec<FeedEntry>,
    pub error: Option<String>,
    pub dropped: usize,
    pub failed_sources: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for NewsSnapshot {
    fn default() -> Self {
        Self {
            generation: 0,
            status: RefreshStatus::Idle,
            entries: Vec::new(),
            error: None,
            dropped: 0,
            failed_sources: 0,
            completed_at: None,
        }
    }
}

impl NewsSnapshot {
    pub fn is_loading(&self) -> bool {
        self.status == RefreshStatus::Loading
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated(NewsSnapshot),
    Failed(NewsSnapshot),
    /// A newer refresh was triggered while this one ran; its result was discarded
    Superseded { generation: u64 },
}

/// Entries merged from every payload of one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Merged {
    pub entries: Vec<FeedEntry>,
    pub dropped: usize,
    pub failed_sources: usize,
}

/// Parse each payload in order, skip the ones that fail, and keep the first
/// `max_entries` entries overall.
pub fn merge_payloads<S: AsRef<str>>(payloads: &[S], max_entries: usize) -> Merged {
    let mut merged = Merged::default();

    for (index, payload) in payloads.iter().enumerate() {
        match parse_feed(payload.as_ref()) {
            Ok(parsed) => {
                if parsed.dropped > 0 {
                    warn!(
                        "Dropped {} items without title or link from feed #{}",
                        parsed.dropped, index
                    );
                }
                merged.dropped += parsed.dropped;
                merged.entries.extend(parsed.entries);
            }
            Err(e) => {
                warn!("Failed to parse feed #{}: {}", index, e);
                merged.failed_sources += 1;
            }
        }
    }

    merged.entries.truncate(max_entries);
    merged
}

pub struct Aggregator {
    client: SourceClient,
    config: AggregatorConfig,
    generation: AtomicU64,
    state: RwLock<NewsSnapshot>,
}

impl Aggregator {
    pub fn new(client: SourceClient, config: AggregatorConfig) -> Self {
        Self {
            client,
            config,
            generation: AtomicU64::new(0),
            state: RwLock::new(NewsSnapshot::default()),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> NewsSnapshot {
        self.state.read().await.clone()
    }

    /// Run one refresh cycle and publish its result, unless a newer cycle was
    /// started in the meantime.
    pub async fn refresh(&self) -> RefreshOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.write().await.status = RefreshStatus::Loading;

        info!(
            "Refresh #{} started for sources {:?}",
            generation, self.config.sources
        );

        let fetched = self.client.fetch(&self.config.sources).await;

        // Parse before taking the lock so readers are not blocked by feed-rs
        let next = match fetched {
            Ok(payloads) => {
                let merged = merge_payloads(&payloads, self.config.max_entries);
                info!(
                    "Refresh #{} complete: {} entries from {} feeds ({} failed)",
                    generation,
                    merged.entries.len(),
                    payloads.len(),
                    merged.failed_sources
                );
                NewsSnapshot {
                    generation,
                    status: RefreshStatus::Idle,
                    entries: merged.entries,
                    error: None,
                    dropped: merged.dropped,
                    failed_sources: merged.failed_sources,
                    completed_at: Some(Utc::now()),
                }
            }
            Err(e) => {
                error!("Refresh #{} failed: {}", generation, e);
                NewsSnapshot {
                    generation,
                    status: RefreshStatus::Idle,
                    entries: Vec::new(),
                    error: Some(user_message(&e).to_string()),
                    dropped: 0,
                    failed_sources: 0,
                    completed_at: Some(Utc::now()),
                }
            }
        };

        let mut state = self.state.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Refresh #{} superseded, discarding result", generation);
            return RefreshOutcome::Superseded { generation };
        }

        *state = next.clone();
        if next.error.is_some() {
            RefreshOutcome::Failed(next)
        } else {
            RefreshOutcome::Updated(next)
        }
    }
}

fn user_message(err: &FetchError) -> &'static str {
    match err {
        FetchError::EndpointNotConfigured => NOT_CONFIGURED_MESSAGE,
        _ => FETCH_FAILED_MESSAGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::fixtures::{numbered, rss};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn aggregator_for(server: &MockServer, max_entries: usize) -> Aggregator {
        let client = SourceClient::new(
            Some(format!("{}/api/rss-feeds/", server.uri())),
            Duration::from_secs(5),
        )
        .unwrap();
        Aggregator::new(
            client,
            AggregatorConfig {
                sources: vec!["fox".to_string()],
                max_entries,
            },
        )
    }

    async fn serve_feeds(server: &MockServer, feeds: Vec<String>) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "ok",
                "data": { "feeds": feeds }
            })))
            .mount(server)
            .await;
    }

    fn titles(entries: &[FeedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.title()).collect()
    }

    mod merge_payloads_tests {
        use super::*;

        #[test]
        fn test_truncates_across_sources_in_order() {
            let payloads = vec![numbered("First", 8), numbered("Second", 5)];

            let merged = merge_payloads(&payloads, 10);

            assert_eq!(merged.entries.len(), 10);
            assert_eq!(merged.entries[0].title(), "First 1");
            assert_eq!(merged.entries[7].title(), "First 8");
            assert_eq!(merged.entries[8].title(), "Second 1");
            assert_eq!(merged.entries[9].title(), "Second 2");
        }

        #[test]
        fn test_length_is_min_of_limit_and_valid_total() {
            for (counts, expected) in [(vec![2, 3], 5), (vec![6, 6], 10), (vec![0], 0)] {
                let payloads: Vec<String> = counts
                    .iter()
                    .enumerate()
                    .map(|(i, n)| numbered(&format!("S{}", i), *n))
                    .collect();

                let merged = merge_payloads(&payloads, 10);
                assert_eq!(merged.entries.len(), expected, "counts {:?}", counts);
            }
        }

        #[test]
        fn test_malformed_source_is_isolated() {
            let payloads = vec!["<not valid xml".to_string(), numbered("Good", 2)];

            let merged = merge_payloads(&payloads, 10);

            assert_eq!(titles(&merged.entries), vec!["Good 1", "Good 2"]);
            assert_eq!(merged.failed_sources, 1);
        }

        #[test]
        fn test_malformed_source_after_valid_keeps_entries() {
            let payloads = vec![numbered("Good", 2), "<not valid xml".to_string()];

            let merged = merge_payloads(&payloads, 10);

            assert_eq!(merged.entries.len(), 2);
            assert_eq!(merged.failed_sources, 1);
        }

        #[test]
        fn test_dropped_items_counted() {
            let payloads = vec![rss(&[
                (Some("A"), Some("https://a.example.com")),
                (Some("B"), None),
                (None, Some("https://c.example.com")),
            ])];

            let merged = merge_payloads(&payloads, 10);

            assert_eq!(merged.entries.len(), 1);
            assert_eq!(merged.dropped, 2);
        }

        #[test]
        fn test_no_payloads() {
            let payloads: Vec<String> = Vec::new();
            assert_eq!(merge_payloads(&payloads, 10), Merged::default());
        }
    }

    mod refresh_tests {
        use super::*;

        #[tokio::test]
        async fn test_initial_snapshot_is_idle_and_empty() {
            let server = MockServer::start().await;
            let aggregator = aggregator_for(&server, 10);

            let snapshot = aggregator.snapshot().await;
            assert_eq!(snapshot, NewsSnapshot::default());
            assert!(!snapshot.is_loading());
        }

        #[tokio::test]
        async fn test_single_source_with_one_invalid_item() {
            let server = MockServer::start().await;
            let feed = rss(&[
                (Some("One"), Some("https://fox.example.com/1")),
                (Some("Two"), Some("https://fox.example.com/2")),
                (Some("Missing link"), None),
                (Some("Three"), Some("https://fox.example.com/3")),
            ]);
            serve_feeds(&server, vec![feed]).await;
            let aggregator = aggregator_for(&server, 10);

            let outcome = aggregator.refresh().await;

            let snapshot = match outcome {
                RefreshOutcome::Updated(snapshot) => snapshot,
                other => panic!("Expected Updated, got {:?}", other),
            };
            assert_eq!(titles(&snapshot.entries), vec!["One", "Two", "Three"]);
            assert_eq!(snapshot.dropped, 1);
            assert_eq!(snapshot.generation, 1);
            assert!(snapshot.error.is_none());
            assert_eq!(aggregator.snapshot().await, snapshot);
        }

        #[tokio::test]
        async fn test_two_sources_truncated_to_ten() {
            let server = MockServer::start().await;
            serve_feeds(&server, vec![numbered("First", 8), numbered("Second", 5)]).await;
            let aggregator = aggregator_for(&server, 10);

            aggregator.refresh().await;
            let snapshot = aggregator.snapshot().await;

            assert_eq!(snapshot.entries.len(), 10);
            assert_eq!(snapshot.entries[8].title(), "Second 1");
            assert_eq!(snapshot.entries[9].title(), "Second 2");
            assert!(snapshot
                .entries
                .iter()
                .all(|e| !e.title().is_empty() && !e.link().is_empty()));
        }

        #[tokio::test]
        async fn test_error_status_clears_entries() {
            let server = MockServer::start().await;
            serve_feeds(&server, vec![numbered("Story", 3)]).await;
            let aggregator = aggregator_for(&server, 10);
            aggregator.refresh().await;
            assert_eq!(aggregator.snapshot().await.entries.len(), 3);

            server.reset().await;
            Mock::given(method("POST"))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(json!({ "status": "error" })),
                )
                .mount(&server)
                .await;

            let outcome = aggregator.refresh().await;

            assert!(matches!(outcome, RefreshOutcome::Failed(_)));
            let snapshot = aggregator.snapshot().await;
            assert!(snapshot.entries.is_empty());
            assert_eq!(snapshot.error.as_deref(), Some(FETCH_FAILED_MESSAGE));
            assert_eq!(snapshot.status, RefreshStatus::Idle);
        }

        #[tokio::test]
        async fn test_missing_endpoint_reports_configuration_error() {
            let client = SourceClient::new(None, Duration::from_secs(5)).unwrap();
            let aggregator = Aggregator::new(
                client,
                AggregatorConfig {
                    sources: vec!["fox".to_string()],
                    max_entries: 10,
                },
            );

            let outcome = aggregator.refresh().await;

            match outcome {
                RefreshOutcome::Failed(snapshot) => {
                    assert_eq!(snapshot.error.as_deref(), Some(NOT_CONFIGURED_MESSAGE));
                    assert!(snapshot.entries.is_empty());
                }
                other => panic!("Expected Failed, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_repeated_refresh_is_content_deterministic() {
            let server = MockServer::start().await;
            serve_feeds(&server, vec![numbered("A", 4), numbered("B", 4)]).await;
            let aggregator = aggregator_for(&server, 10);

            aggregator.refresh().await;
            let first = aggregator.snapshot().await;
            aggregator.refresh().await;
            let second = aggregator.snapshot().await;

            assert_eq!(first.entries, second.entries);
            assert_eq!(second.generation, first.generation + 1);
        }

        #[tokio::test]
        async fn test_partial_failure_keeps_valid_source() {
            let server = MockServer::start().await;
            serve_feeds(
                &server,
                vec!["<not valid xml".to_string(), numbered("Valid", 3)],
            )
            .await;
            let aggregator = aggregator_for(&server, 10);

            aggregator.refresh().await;
            let snapshot = aggregator.snapshot().await;

            assert_eq!(titles(&snapshot.entries), vec!["Valid 1", "Valid 2", "Valid 3"]);
            assert_eq!(snapshot.failed_sources, 1);
            assert!(snapshot.error.is_none());
        }

        #[tokio::test]
        async fn test_snapshot_readable_while_refresh_in_flight() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({
                            "status": "ok",
                            "data": { "feeds": [numbered("Late", 2)] }
                        }))
                        .set_delay(Duration::from_millis(300)),
                )
                .mount(&server)
                .await;
            let aggregator = Arc::new(aggregator_for(&server, 10));

            let pending = {
                let aggregator = aggregator.clone();
                tokio::spawn(async move { aggregator.refresh().await })
            };
            tokio::time::sleep(Duration::from_millis(100)).await;

            let snapshot = tokio::time::timeout(Duration::from_millis(50), aggregator.snapshot())
                .await
                .expect("snapshot blocked by refresh");
            assert!(snapshot.is_loading());

            assert!(matches!(pending.await.unwrap(), RefreshOutcome::Updated(_)));
            assert!(!aggregator.snapshot().await.is_loading());
        }

        #[tokio::test]
        async fn test_older_refresh_is_superseded() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({
                            "status": "ok",
                            "data": { "feeds": [numbered("Slow", 2)] }
                        }))
                        .set_delay(Duration::from_millis(300)),
                )
                .up_to_n_times(1)
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "status": "ok",
                    "data": { "feeds": [numbered("Fast", 1)] }
                })))
                .mount(&server)
                .await;

            let aggregator = Arc::new(aggregator_for(&server, 10));

            let slow = {
                let aggregator = aggregator.clone();
                tokio::spawn(async move { aggregator.refresh().await })
            };
            // Let the slow refresh claim its generation and the first mock
            tokio::time::sleep(Duration::from_millis(100)).await;
            let fast = aggregator.refresh().await;
            let slow = slow.await.unwrap();

            assert!(matches!(fast, RefreshOutcome::Updated(_)));
            assert_eq!(slow, RefreshOutcome::Superseded { generation: 1 });

            let snapshot = aggregator.snapshot().await;
            assert_eq!(snapshot.generation, 2);
            assert_eq!(titles(&snapshot.entries), vec!["Fast 1"]);
            assert!(!snapshot.is_loading());
        }
    }
}
