//! Trackable events and the registry that fires them (spec §3, §4.9).

pub mod trackable;
pub mod tracker;

pub use trackable::{SendOutcome, Trackable, TrackableState};
pub use tracker::{TrackResult, TrackableResult, Tracker, TrackerConfig};
