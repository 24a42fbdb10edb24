//! A single tracking URL plus its send state (spec §3, §4.9).
//!
//! `fire_beacon` in `ad/tracking.rs` fires a fire-and-forget GET with a
//! fixed 2s timeout inside a spawned task. This keeps that request shape
//! but makes firing synchronous-from-the-caller's-perspective (the caller
//! awaits the result) and attaches explicit, inspectable state instead of
//! just logging outcomes.

use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, warn};

use crate::macros::{substitute, MacroMap};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackableState {
    pub tracked: bool,
    pub failure_reason: Option<String>,
    pub attempt_count: u32,
    pub last_response_time: Option<Duration>,
}

/// One tracking URL with its macro-substitution template and send state.
#[derive(Debug, Clone)]
pub struct Trackable {
    pub key: String,
    pub url_template: String,
    pub extras: MacroMap,
    pub state: TrackableState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SendOutcome {
    AlreadyTracked,
    EmptyUrl,
    Success { status: u16 },
    Failed,
}

impl Trackable {
    pub fn new(key: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url_template: url_template.into(),
            extras: MacroMap::new(),
            state: TrackableState::default(),
        }
    }

    /// Resolves macros, fires a GET with retry/backoff, and updates state.
    /// Once `state.tracked` is true, every subsequent call is a no-op
    /// (spec §3 invariant).
    pub async fn send_with(
        &mut self,
        client: &Client,
        macros: &MacroMap,
        timeout: Duration,
        max_retries: u32,
        retry_delay: Duration,
        backoff_multiplier: f64,
    ) -> SendOutcome {
        if self.state.tracked {
            return SendOutcome::AlreadyTracked;
        }
        if self.url_template.is_empty() {
            self.state.failure_reason = Some("empty-url".to_string());
            return SendOutcome::EmptyUrl;
        }

        // explicit provided macros take precedence over this trackable's own extras
        let resolved = self.extras.clone().merged_over(macros);
        let url = substitute(&self.url_template, &resolved);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.state.attempt_count = attempt;
            let started = Instant::now();
            let outcome = client.get(&url).timeout(timeout).send().await;

            match outcome {
                Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                    let elapsed = started.elapsed();
                    self.state.tracked = true;
                    self.state.last_response_time = Some(elapsed);
                    debug!(key = %self.key, status = %resp.status(), "trackable fired");
                    return SendOutcome::Success {
                        status: resp.status().as_u16(),
                    };
                }
                Ok(resp) => {
                    warn!(key = %self.key, status = %resp.status(), attempt, "trackable returned non-2xx");
                    if attempt > max_retries {
                        self.state.failure_reason =
                            Some(format!("http-status {}", resp.status().as_u16()));
                        return SendOutcome::Failed;
                    }
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, attempt, "trackable transport error");
                    if attempt > max_retries {
                        self.state.failure_reason = Some(e.to_string());
                        return SendOutcome::Failed;
                    }
                }
            }

            let delay = retry_delay.mul_f64(backoff_multiplier.powi((attempt - 1) as i32));
            tokio::time::sleep(delay).await;
        }
    }
}
