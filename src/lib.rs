//! Multi-source VAST ad fetch, parse, filter, and playback-tracking client.
//!
//! Data flow: a [`client::Client`] hands a [`orchestrator::FetchConfig`] to
//! the [`orchestrator::Orchestrator`], which drives [`fetch`] across the
//! configured source/fallback groups, hands successful bodies to
//! [`vast::parser`], resolves wrappers, applies a [`filter::ParseFilter`],
//! and fires the impression event through a [`tracking::Tracker`]. A
//! caller may then drive a [`playback::PlaybackEngine`] against either a
//! real or virtual [`time::TimeSource`].

pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod http;
pub mod macros;
pub mod metrics;
pub mod orchestrator;
pub mod playback;
pub mod time;
pub mod tracking;
pub mod vast;

pub use client::{Client, ClientBuilder, RequestOptions};
pub use error::{ErrorKind, Result, VastClientError};
pub use orchestrator::{FetchConfig, FetchResult, Orchestrator};
