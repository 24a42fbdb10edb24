//! Event-type registry of trackables (spec §4.9).
//!
//! Grounded in `ad/tracking.rs`'s `fire_impressions`/`fire_beacon` pair,
//! generalized from "impressions only" to any event type and from
//! fire-and-forget spawning to an awaited result the caller can inspect.
//!
//! The registry lives behind `DashMap` (the teacher's process-wide-cache
//! crate, also used in `http.rs`/`macros.rs`) and each trackable behind its
//! own `tokio::sync::Mutex`, so `register`/`track` take `&self` — a
//! `Client` can hand its tracker to many concurrent `request()` calls
//! without a `&mut` borrow serializing them (spec §4.12).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use reqwest::Client;
use tokio::sync::Mutex;

use crate::macros::MacroMap;
use crate::metrics;
use crate::tracking::trackable::{SendOutcome, Trackable};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub parallel: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            parallel: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackableResult {
    pub key: String,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TrackResult {
    pub successful_count: usize,
    pub total_count: usize,
    pub per_trackable: Vec<TrackableResult>,
}

/// Registry of event-type -> ordered trackable list. Each trackable is
/// wrapped in its own mutex so firing (which holds the lock across an
/// await) never blocks registration of a different event type, and so the
/// registry as a whole only needs `&self`.
pub struct Tracker {
    registry: DashMap<String, Vec<Arc<Mutex<Trackable>>>>,
    client: Client,
    config: TrackerConfig,
}

impl Tracker {
    pub fn new(client: Client, config: TrackerConfig) -> Self {
        Self {
            registry: DashMap::new(),
            client,
            config,
        }
    }

    /// Registers a trackable under `event_type`, preserving insertion order
    /// within that event type.
    pub fn register(&self, event_type: impl Into<String>, trackable: Trackable) {
        self.registry
            .entry(event_type.into())
            .or_default()
            .push(Arc::new(Mutex::new(trackable)));
    }

    pub fn register_many(
        &self,
        event_type: impl Into<String>,
        urls: impl IntoIterator<Item = String>,
    ) {
        let event_type = event_type.into();
        for url in urls {
            self.register(event_type.clone(), Trackable::new(event_type.clone(), url));
        }
    }

    /// Fires every trackable registered for `event_type`. Unknown event
    /// types fire nothing and return an empty result.
    pub async fn track(&self, event_type: &str, macros: &MacroMap) -> TrackResult {
        let Some(trackables) = self.registry.get(event_type).map(|entry| entry.clone()) else {
            return TrackResult {
                successful_count: 0,
                total_count: 0,
                per_trackable: Vec::new(),
            };
        };

        let total_count = trackables.len();
        let cfg = &self.config;
        let client = &self.client;

        let results: Vec<TrackableResult> = if cfg.parallel {
            let futures = trackables.iter().map(|t| {
                let t = Arc::clone(t);
                async move {
                    let started = std::time::Instant::now();
                    let mut guard = t.lock().await;
                    let key = guard.key.clone();
                    let outcome = guard
                        .send_with(
                            client,
                            macros,
                            cfg.timeout,
                            cfg.max_retries,
                            cfg.retry_delay,
                            cfg.backoff_multiplier,
                        )
                        .await;
                    outcome_to_result(key, outcome, started.elapsed())
                }
            });
            join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(total_count);
            for t in &trackables {
                let started = std::time::Instant::now();
                let mut guard = t.lock().await;
                let key = guard.key.clone();
                let outcome = guard
                    .send_with(
                        client,
                        macros,
                        cfg.timeout,
                        cfg.max_retries,
                        cfg.retry_delay,
                        cfg.backoff_multiplier,
                    )
                    .await;
                results.push(outcome_to_result(key, outcome, started.elapsed()));
            }
            results
        };

        let successful_count = results
            .iter()
            .filter(|r| matches!(r.status_code, Some(status) if (200..400).contains(&status)))
            .count();

        for r in &results {
            let outcome = if r.error.is_some() { "failure" } else { "success" };
            metrics::record_tracking_fire(event_type, outcome);
        }

        TrackResult {
            successful_count,
            total_count,
            per_trackable: results,
        }
    }
}

fn outcome_to_result(key: String, outcome: SendOutcome, elapsed: Duration) -> TrackableResult {
    match outcome {
        SendOutcome::Success { status } => TrackableResult {
            key,
            status_code: Some(status),
            error: None,
            duration: Some(elapsed),
        },
        SendOutcome::AlreadyTracked => TrackableResult {
            key,
            status_code: Some(200),
            error: None,
            duration: None,
        },
        SendOutcome::EmptyUrl => TrackableResult {
            key,
            status_code: None,
            error: Some("empty-url".to_string()),
            duration: None,
        },
        SendOutcome::Failed => TrackableResult {
            key,
            status_code: None,
            error: Some("failed".to_string()),
            duration: Some(elapsed),
        },
    }
}
