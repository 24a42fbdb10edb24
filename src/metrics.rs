use metrics::{counter, gauge, histogram};
use std::time::Instant;

// ── Metric names ────────────────────────────────────────────────────────
//
// The crate never installs a recorder itself; these macros are no-ops
// until a caller installs one (e.g. metrics-exporter-prometheus), which
// keeps the pluggable-collector/no-op-default contract without a
// dependency on any specific backend.

/// Fetch attempts by source phase and outcome (success, error, no-content, timeout)
pub const FETCH_ATTEMPTS: &str = "vast_client_fetch_attempts_total";
/// End-to-end orchestrator call duration in seconds
pub const FETCH_DURATION: &str = "vast_client_fetch_duration_seconds";
/// Ads that survived the parse filter vs were rejected
pub const FILTER_RESULTS: &str = "vast_client_filter_results_total";
/// Wrapper resolution depth reached per call
pub const WRAPPER_DEPTH: &str = "vast_client_wrapper_depth";
/// Tracking beacon fires by event type and outcome
pub const TRACKING_FIRES: &str = "vast_client_tracking_fires_total";
/// Tracking beacon round-trip duration in seconds
pub const TRACKING_DURATION: &str = "vast_client_tracking_duration_seconds";
/// Active playback sessions
pub const ACTIVE_PLAYBACKS: &str = "vast_client_active_playbacks";
/// Playback state transitions by target state
pub const PLAYBACK_TRANSITIONS: &str = "vast_client_playback_transitions_total";

// ── Recording helpers ───────────────────────────────────────────────────

/// Record one fetch attempt against a single source.
pub fn record_fetch_attempt(strategy: &str, outcome: &str) {
    counter!(FETCH_ATTEMPTS, "strategy" => strategy.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record the wall-clock duration of one orchestrator call.
pub fn record_fetch_duration(start: Instant) {
    histogram!(FETCH_DURATION).record(start.elapsed().as_secs_f64());
}

/// Record a parse-filter accept/reject decision.
pub fn record_filter_result(accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    counter!(FILTER_RESULTS, "result" => result).increment(1);
}

/// Record the wrapper chain depth reached by one resolution.
pub fn record_wrapper_depth(depth: u32) {
    histogram!(WRAPPER_DEPTH).record(depth as f64);
}

/// Record a tracking beacon fire.
pub fn record_tracking_fire(event_type: &str, outcome: &str) {
    counter!(TRACKING_FIRES, "event" => event_type.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a tracking beacon's round-trip duration.
pub fn record_tracking_duration(event_type: &str, start: Instant) {
    histogram!(TRACKING_DURATION, "event" => event_type.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Update the active-playback gauge.
pub fn set_active_playbacks(count: usize) {
    gauge!(ACTIVE_PLAYBACKS).set(count as f64);
}

/// Record a playback state transition.
pub fn record_playback_transition(to_state: &str) {
    counter!(PLAYBACK_TRANSITIONS, "state" => to_state.to_string()).increment(1);
}
