//! Multi-source fetch strategies with retry, timeout, and cancellation
//! (spec §4.7).
//!
//! `VastAdProvider::fetch_vast` in `ad/vast_provider.rs` fetches one URL
//! with a manual retry loop inside `tokio::task::block_in_place`. This
//! generalizes that retry loop into a per-source attempt function, then
//! fans it out across a source list under parallel/sequential/race
//! semantics, threading a `CancellationToken` through every suspension
//! point per the cooperative-cancellation redesign.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ErrorKind;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Parallel,
    Sequential,
    Race,
}

#[derive(Debug, Clone)]
pub struct FetchStrategy {
    pub mode: FetchMode,
    pub per_source_timeout: Duration,
    pub overall_timeout: Option<Duration>,
    pub retries: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
}

impl Default for FetchStrategy {
    fn default() -> Self {
        Self {
            mode: FetchMode::Sequential,
            per_source_timeout: Duration::from_secs(5),
            overall_timeout: None,
            retries: 2,
            backoff_base: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Fetch,
    Parse,
    Select,
}

#[derive(Debug, Clone)]
pub struct FetchAttemptError {
    pub source: String,
    pub phase: FetchPhase,
    pub error_kind: ErrorKind,
    pub error_message: String,
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub raw_xml: Option<String>,
    pub source_url: Option<String>,
    pub errors: Vec<FetchAttemptError>,
}

/// Fetches `sources` under `strategy`, applying `params`/`headers` to every
/// request. Returns as soon as a strategy-appropriate success is found, or
/// with every accumulated error if none succeed.
pub async fn fetch(
    client: &Client,
    sources: &[String],
    strategy: &FetchStrategy,
    params: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    cancel: CancellationToken,
) -> FetchOutcome {
    let started = Instant::now();
    let body = async {
        match strategy.mode {
            FetchMode::Sequential => fetch_sequential(client, sources, strategy, params, headers, cancel).await,
            FetchMode::Parallel | FetchMode::Race => {
                fetch_concurrent(client, sources, strategy, params, headers, cancel).await
            }
        }
    };

    let outcome = match strategy.overall_timeout {
        Some(deadline) => match tokio::time::timeout(deadline, body).await {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome {
                raw_xml: None,
                source_url: None,
                errors: vec![FetchAttemptError {
                    source: sources.join(","),
                    phase: FetchPhase::Fetch,
                    error_kind: ErrorKind::TimeoutOverall,
                    error_message: "overall fetch deadline exceeded".to_string(),
                    status_code: None,
                }],
            },
        },
        None => body.await,
    };

    metrics::record_fetch_duration(started.into_std());
    metrics::record_fetch_attempt(
        mode_label(strategy.mode),
        if outcome.raw_xml.is_some() { "success" } else { "failure" },
    );
    outcome
}

fn mode_label(mode: FetchMode) -> &'static str {
    match mode {
        FetchMode::Parallel => "parallel",
        FetchMode::Sequential => "sequential",
        FetchMode::Race => "race",
    }
}

async fn fetch_sequential(
    client: &Client,
    sources: &[String],
    strategy: &FetchStrategy,
    params: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    cancel: CancellationToken,
) -> FetchOutcome {
    let mut errors = Vec::new();

    for source in sources {
        if cancel.is_cancelled() {
            errors.push(cancelled_error(source));
            break;
        }
        match fetch_one(client, source, strategy, params, headers, cancel.clone()).await {
            Ok(Some(body)) => {
                return FetchOutcome {
                    raw_xml: Some(body),
                    source_url: Some(source.clone()),
                    errors,
                };
            }
            Ok(None) => errors.push(no_content_error(source)),
            Err(e) => errors.push(e),
        }
    }

    FetchOutcome {
        raw_xml: None,
        source_url: None,
        errors,
    }
}

async fn fetch_concurrent(
    client: &Client,
    sources: &[String],
    strategy: &FetchStrategy,
    params: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    cancel: CancellationToken,
) -> FetchOutcome {
    let mut pending = FuturesUnordered::new();
    for source in sources {
        let source = source.clone();
        let child_cancel = cancel.child_token();
        let client = client.clone();
        let strategy = strategy.clone();
        let params = params.clone();
        let headers = headers.clone();
        pending.push(async move {
            let result = fetch_one(&client, &source, &strategy, &params, &headers, child_cancel).await;
            (source, result)
        });
    }

    let mut errors = Vec::new();
    while let Some((source, result)) = pending.next().await {
        match result {
            Ok(Some(body)) => {
                // remaining futures are dropped here, cancelling them cooperatively
                return FetchOutcome {
                    raw_xml: Some(body),
                    source_url: Some(source),
                    errors,
                };
            }
            Ok(None) => errors.push(no_content_error(&source)),
            Err(e) => errors.push(e),
        }
    }

    FetchOutcome {
        raw_xml: None,
        source_url: None,
        errors,
    }
}

/// One source's fetch-with-retry. `Ok(Some(body))` is success, `Ok(None)`
/// is a 204 ("no ad available"), `Err` is a terminal failure after
/// exhausting retries.
async fn fetch_one(
    client: &Client,
    source: &str,
    strategy: &FetchStrategy,
    params: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    cancel: CancellationToken,
) -> Result<Option<String>, FetchAttemptError> {
    if url::Url::parse(source).is_err() {
        return Err(FetchAttemptError {
            source: source.to_string(),
            phase: FetchPhase::Fetch,
            error_kind: ErrorKind::Transport,
            error_message: "source is not a well-formed URL".to_string(),
            status_code: None,
        });
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(cancelled_error(source));
        }

        let request_fut = build_request(client, source, params, headers).send();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportOutcome::Cancelled),
            res = tokio::time::timeout(strategy.per_source_timeout, request_fut) => {
                match res {
                    Ok(Ok(resp)) => Ok(resp),
                    Ok(Err(e)) => Err(TransportOutcome::Transport(e.to_string())),
                    Err(_) => Err(TransportOutcome::Timeout),
                }
            }
        };

        match outcome {
            Ok(resp) => {
                let status = resp.status();
                if status.as_u16() == 204 {
                    return Ok(None);
                }
                if status.is_success() {
                    match resp.text().await {
                        Ok(body) if !body.is_empty() => return Ok(Some(body)),
                        Ok(_) => {
                            if attempt > strategy.retries {
                                return Err(FetchAttemptError {
                                    source: source.to_string(),
                                    phase: FetchPhase::Fetch,
                                    error_kind: ErrorKind::HttpStatus,
                                    error_message: "empty response body".to_string(),
                                    status_code: Some(status.as_u16()),
                                });
                            }
                        }
                        Err(e) => {
                            if attempt > strategy.retries {
                                return Err(FetchAttemptError {
                                    source: source.to_string(),
                                    phase: FetchPhase::Fetch,
                                    error_kind: ErrorKind::Transport,
                                    error_message: e.to_string(),
                                    status_code: None,
                                });
                            }
                        }
                    }
                } else if attempt > strategy.retries {
                    return Err(FetchAttemptError {
                        source: source.to_string(),
                        phase: FetchPhase::Fetch,
                        error_kind: ErrorKind::HttpStatus,
                        error_message: format!("HTTP {}", status.as_u16()),
                        status_code: Some(status.as_u16()),
                    });
                }
            }
            Err(TransportOutcome::Timeout) => {
                if attempt > strategy.retries {
                    return Err(FetchAttemptError {
                        source: source.to_string(),
                        phase: FetchPhase::Fetch,
                        error_kind: ErrorKind::TimeoutPerSource,
                        error_message: "per-source timeout exceeded".to_string(),
                        status_code: None,
                    });
                }
            }
            Err(TransportOutcome::Transport(message)) => {
                if attempt > strategy.retries {
                    return Err(FetchAttemptError {
                        source: source.to_string(),
                        phase: FetchPhase::Fetch,
                        error_kind: ErrorKind::Transport,
                        error_message: message,
                        status_code: None,
                    });
                }
            }
            Err(TransportOutcome::Cancelled) => return Err(cancelled_error(source)),
        }

        warn!(source, attempt, "fetch attempt failed, retrying");
        let delay = strategy
            .backoff_base
            .mul_f64(strategy.backoff_multiplier.powi((attempt - 1) as i32));
        tokio::time::sleep(delay).await;
    }
}

enum TransportOutcome {
    Timeout,
    Transport(String),
    Cancelled,
}

fn build_request(
    client: &Client,
    source: &str,
    params: &HashMap<String, String>,
    headers: &HashMap<String, String>,
) -> reqwest::RequestBuilder {
    let mut builder = client.get(source).query(params);
    for (k, v) in headers {
        builder = builder.header(k, v);
    }
    builder
}

fn cancelled_error(source: &str) -> FetchAttemptError {
    info!(source, "fetch cancelled");
    FetchAttemptError {
        source: source.to_string(),
        phase: FetchPhase::Fetch,
        error_kind: ErrorKind::Cancelled,
        error_message: "operation was cancelled".to_string(),
        status_code: None,
    }
}

fn no_content_error(source: &str) -> FetchAttemptError {
    FetchAttemptError {
        source: source.to_string(),
        phase: FetchPhase::Fetch,
        error_kind: ErrorKind::NoContent,
        error_message: "204 No Content".to_string(),
        status_code: Some(204),
    }
}
