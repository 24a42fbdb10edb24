//! Client facade: construction paths and top-level request operations
//! (spec §4.12).
//!
//! Grounded in `VastAdProvider::new`/`resolve_endpoint` for the
//! "construct with a base URL and compose params per call" shape in
//! `ad/vast_provider.rs`, generalized to the three construction paths the
//! spec names and backed by the owned `TransportPool`/`Tracker` handles
//! per the process-wide-cache redesign flag.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client as HttpClient;

use crate::error::Result;
use crate::filter::ParseFilter;
use crate::fetch::FetchStrategy;
use crate::http::{PoolSettings, TlsVerify, TransportPool};
use crate::orchestrator::{FetchConfig, FetchResult, Orchestrator};
use crate::tracking::{Tracker, TrackerConfig};
use crate::vast::parser::ParserConfig;

/// Per-call parameters layered on top of a client's defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub filter: Option<ParseFilter>,
    pub auto_track: Option<bool>,
}

pub struct ClientBuilder {
    sources: Vec<String>,
    fallbacks: Vec<String>,
    strategy: FetchStrategy,
    parser: ParserConfig,
    tracker_config: TrackerConfig,
    tls_verify: TlsVerify,
    wrapper_depth_limit: u32,
    auto_track: bool,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            fallbacks: Vec::new(),
            strategy: FetchStrategy::default(),
            parser: ParserConfig::default(),
            tracker_config: TrackerConfig::default(),
            tls_verify: TlsVerify::Strict,
            wrapper_depth_limit: 5,
            auto_track: true,
        }
    }

    pub fn source(mut self, url: impl Into<String>) -> Self {
        self.sources.push(url.into());
        self
    }

    pub fn fallback(mut self, url: impl Into<String>) -> Self {
        self.fallbacks.push(url.into());
        self
    }

    pub fn strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn parser(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self
    }

    pub fn tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker_config = config;
        self
    }

    pub fn tls_verify(mut self, verify: TlsVerify) -> Self {
        self.tls_verify = verify;
        self
    }

    pub fn wrapper_depth_limit(mut self, limit: u32) -> Self {
        self.wrapper_depth_limit = limit;
        self
    }

    pub fn auto_track(mut self, auto_track: bool) -> Self {
        self.auto_track = auto_track;
        self
    }

    pub fn build(self) -> Client {
        let pool = Arc::new(TransportPool::new(PoolSettings::ad_request_defaults()));
        let ad_client = pool.client(&self.tls_verify);
        let tracking_pool = Arc::new(TransportPool::new(PoolSettings::tracking_defaults()));
        let tracking_client = tracking_pool.client(&self.tls_verify);

        Client {
            ad_client,
            tracker: Tracker::new(tracking_client, self.tracker_config),
            sources: self.sources,
            fallbacks: self.fallbacks,
            strategy: self.strategy,
            parser: self.parser,
            wrapper_depth_limit: self.wrapper_depth_limit,
            auto_track: self.auto_track,
            pool,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for fetching, parsing, filtering, and auto-tracking VAST
/// ads. Safe to call `request()`/`request_with_fallback()` concurrently
/// from multiple tasks (spec §4.12 invariant); playback engines built
/// from its tracker are not.
pub struct Client {
    ad_client: HttpClient,
    tracker: Tracker,
    sources: Vec<String>,
    fallbacks: Vec<String>,
    strategy: FetchStrategy,
    parser: ParserConfig,
    wrapper_depth_limit: u32,
    auto_track: bool,
    pool: Arc<TransportPool>,
}

impl Client {
    /// Minimal construction path: a single source URL with defaults for
    /// everything else.
    pub fn from_url(url: impl Into<String>) -> Self {
        ClientBuilder::new().source(url).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub async fn request(&self, options: RequestOptions) -> Result<FetchResult> {
        let config = FetchConfig {
            sources: self.sources.clone(),
            fallbacks: self.fallbacks.clone(),
            strategy: self.strategy.clone(),
            params: options.params,
            headers: options.headers,
            filter: options.filter,
            parser: self.parser.clone(),
            auto_track: options.auto_track.unwrap_or(self.auto_track),
            wrapper_depth_limit: self.wrapper_depth_limit,
        };
        let orchestrator = Orchestrator::new(&self.ad_client, &self.tracker);
        Ok(orchestrator.execute(&config).await)
    }

    pub async fn request_with_fallback(
        &self,
        primary: Vec<String>,
        fallbacks: Vec<String>,
        options: RequestOptions,
    ) -> Result<FetchResult> {
        let config = FetchConfig {
            sources: primary,
            fallbacks,
            strategy: self.strategy.clone(),
            params: options.params,
            headers: options.headers,
            filter: options.filter,
            parser: self.parser.clone(),
            auto_track: options.auto_track.unwrap_or(self.auto_track),
            wrapper_depth_limit: self.wrapper_depth_limit,
        };
        let orchestrator = Orchestrator::new(&self.ad_client, &self.tracker);
        Ok(orchestrator.execute(&config).await)
    }

    pub fn tracker_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }

    /// Releases the transport pool entry this client created. Safe to
    /// call even if other clients still reference the same process-wide
    /// pool via `TransportPool::global()`.
    pub fn close(&self) {
        self.pool.close();
    }
}
