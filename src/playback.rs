//! Playback session state machine: quartile detection, event firing, and
//! deterministic stochastic interruption for virtual-time testing
//! (spec §3, §4.10).
//!
//! `SessionManager` in `session/manager.rs` is the closest grounding for
//! the serializable-session-with-explicit-backend shape; this borrows its
//! "plain struct + serde, mutated through an owning manager" texture but
//! models a state machine instead of a TTL cache, and owns its session
//! directly per spec §3 ("Playback engine owns its session").

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::macros::AutomaticMacros;
use crate::metrics;
use crate::time::TimeSource;
use crate::tracking::Tracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Pending,
    Running,
    Paused,
    Completed,
    Closed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub event_type: String,
    pub offset: f64,
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interruption {
    pub reason: String,
    pub offset: f64,
}

/// Self-describing, round-trippable playback session (spec §6 "Persisted
/// state"). `extra` captures any keys this version doesn't know about so a
/// read-modify-write cycle never drops forward-compatible data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub session_id: String,
    pub creative_id: String,
    pub duration: f64,
    pub state: PlaybackState,
    pub current_offset: f64,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub events: Vec<PlaybackEvent>,
    pub quartiles_reached: BTreeSet<u8>,
    pub interruption: Option<Interruption>,
    pub metadata: HashMap<String, Value>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, Value>,
}

impl PlaybackSession {
    pub fn new(session_id: impl Into<String>, creative_id: impl Into<String>, duration: f64) -> Self {
        Self {
            session_id: session_id.into(),
            creative_id: creative_id.into(),
            duration,
            state: PlaybackState::Pending,
            current_offset: 0.0,
            start_time: 0.0,
            end_time: None,
            events: Vec::new(),
            quartiles_reached: BTreeSet::new(),
            interruption: None,
            metadata: HashMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Convenience constructor for callers who don't already have a session
    /// id of their own, e.g. when starting playback for a freshly resolved
    /// ad with no prior session context.
    pub fn new_with_random_id(creative_id: impl Into<String>, duration: f64) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), creative_id, duration)
    }
}

#[derive(Debug, Clone)]
pub struct InterruptionRule {
    pub probability: f64,
    pub jitter_min: f64,
    pub jitter_max: f64,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub tick_interval: f64,
    pub max_session_duration: Option<f64>,
    pub quartile_tolerance: f64,
    pub interruption_rules: HashMap<String, InterruptionRule>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval: 1.0,
            max_session_duration: None,
            quartile_tolerance: 0.0,
            interruption_rules: HashMap::new(),
        }
    }
}

const QUARTILE_NAMES: [&str; 4] = ["firstQuartile", "midpoint", "thirdQuartile", "complete"];

/// Drives one playback session's state machine, firing tracker events as
/// the time source advances.
pub struct PlaybackEngine<'a> {
    session: PlaybackSession,
    time_source: Arc<dyn TimeSource>,
    tracker: &'a mut Tracker,
    config: PlaybackConfig,
    rng: StdRng,
    start_ref: f64,
    frozen_offset: f64,
}

impl<'a> PlaybackEngine<'a> {
    pub fn new(
        session: PlaybackSession,
        time_source: Arc<dyn TimeSource>,
        tracker: &'a mut Tracker,
        config: PlaybackConfig,
    ) -> Self {
        let seed = seed_from_session_id(&session.session_id);
        Self {
            session,
            time_source,
            tracker,
            config,
            rng: StdRng::seed_from_u64(seed),
            start_ref: 0.0,
            frozen_offset: 0.0,
        }
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    /// Transitions `pending -> running`, firing the entry events, unless
    /// the declared duration is zero (spec §4.10 boundary: zero-duration
    /// ads error out without ever firing quartile events).
    pub async fn start(&mut self) {
        if self.session.duration <= 0.0 {
            self.transition_to_error("zero-duration").await;
            return;
        }

        self.start_ref = self.time_source.now();
        self.session.start_time = self.start_ref;
        self.session.state = PlaybackState::Running;
        metrics::record_playback_transition("running");

        for event in ["impression", "start", "creativeView"] {
            self.fire(event, 0.0).await;
        }
    }

    pub async fn pause(&mut self) {
        if self.session.state != PlaybackState::Running {
            warn!(session_id = %self.session.session_id, "pause() called outside running state");
            return;
        }
        self.frozen_offset = self.session.current_offset;
        self.session.state = PlaybackState::Paused;
        metrics::record_playback_transition("paused");
        self.fire("pause", self.frozen_offset).await;
    }

    pub async fn resume(&mut self) {
        if self.session.state != PlaybackState::Paused {
            warn!(session_id = %self.session.session_id, "resume() called outside paused state");
            return;
        }
        self.start_ref = self.time_source.now() - self.frozen_offset;
        self.session.state = PlaybackState::Running;
        metrics::record_playback_transition("running");
        self.fire("resume", self.frozen_offset).await;
    }

    pub async fn stop(&mut self) {
        if matches!(
            self.session.state,
            PlaybackState::Closed | PlaybackState::Completed | PlaybackState::Error
        ) {
            return;
        }
        self.fire("close", self.session.current_offset).await;
        self.session.state = PlaybackState::Closed;
        self.session.end_time = Some(self.time_source.now());
        metrics::record_playback_transition("closed");
    }

    /// Runs the tick loop until the session reaches a terminal state.
    /// Each tick sleeps `tick_interval` virtual/real seconds, recomputes
    /// the offset, and fires any events that became due.
    pub async fn run_to_completion(&mut self) {
        while self.session.state == PlaybackState::Running {
            self.time_source.sleep(self.config.tick_interval).await;
            if self.session.state != PlaybackState::Running {
                break;
            }
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let offset = self.time_source.now() - self.start_ref;
        self.session.current_offset = offset.max(self.session.current_offset);

        if self.session.current_offset >= self.session.duration {
            if self.maybe_interrupt("complete", self.session.duration).await {
                return;
            }
            self.fire("complete", self.session.duration).await;
            self.session.state = PlaybackState::Completed;
            self.session.end_time = Some(self.time_source.now());
            metrics::record_playback_transition("completed");
            return;
        }

        for (n, name) in QUARTILE_NAMES.iter().take(3).enumerate() {
            let quartile = (n + 1) as u8;
            if self.session.quartiles_reached.contains(&quartile) {
                continue;
            }
            let threshold = self.session.duration * (quartile as f64) / 4.0;
            if self.session.current_offset + self.config.quartile_tolerance >= threshold {
                if self.maybe_interrupt(name, threshold).await {
                    return;
                }
                self.fire(name, threshold).await;
                self.session.quartiles_reached.insert(quartile);
            }
        }
    }

    /// Consults this event's interruption rule (virtual-time testing
    /// only); if the draw fires, logs an `interrupt` event and transitions
    /// to the terminal error state. Returns true if playback was
    /// interrupted.
    async fn maybe_interrupt(&mut self, due_event: &str, due_offset: f64) -> bool {
        let Some(rule) = self.config.interruption_rules.get(due_event).cloned() else {
            return false;
        };
        if self.rng.r#gen::<f64>() >= rule.probability {
            return false;
        }
        let jitter = if rule.jitter_max > rule.jitter_min {
            self.rng.gen_range(rule.jitter_min..rule.jitter_max)
        } else {
            rule.jitter_min
        };
        let offset = due_offset + jitter;
        info!(session_id = %self.session.session_id, due_event, offset, "injecting stochastic interruption");
        self.session.interruption = Some(Interruption {
            reason: format!("interrupted before {due_event}"),
            offset,
        });
        self.fire("interrupt", offset).await;
        self.session.state = PlaybackState::Error;
        self.session.end_time = Some(self.time_source.now());
        metrics::record_playback_transition("error");
        true
    }

    async fn transition_to_error(&mut self, reason: &str) {
        self.session.state = PlaybackState::Error;
        self.session.interruption = Some(Interruption {
            reason: reason.to_string(),
            offset: self.session.current_offset,
        });
        self.session
            .events
            .push(PlaybackEvent {
                event_type: "error".to_string(),
                offset: self.session.current_offset,
                timestamp: self.time_source.now(),
                metadata: Value::Null,
            });
        metrics::record_playback_transition("error");
    }

    async fn fire(&mut self, event_type: &str, offset: f64) {
        let macros = AutomaticMacros::build(offset, Some(&self.session.creative_id), None);
        let _ = self.tracker.track(event_type, &macros).await;
        self.session.events.push(PlaybackEvent {
            event_type: event_type.to_string(),
            offset,
            timestamp: self.time_source.now(),
            metadata: Value::Null,
        });
    }
}

fn seed_from_session_id(session_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    hasher.finish()
}
