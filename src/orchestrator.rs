//! FETCH → PARSE → SELECT → TRACK pipeline with fallback cascade and
//! wrapper resolution (spec §4.5, §4.8).
//!
//! Grounded in `VastAdProvider::fetch_vast`'s wrapper-recursion loop in
//! `ad/vast_provider.rs`, generalized from "one provider, one source" to
//! the full multi-source/fallback/strategy model.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fetch::{fetch, FetchAttemptError, FetchMode, FetchPhase, FetchStrategy};
use crate::filter::ParseFilter;
use crate::macros::MacroMap;
use crate::metrics;
use crate::tracking::Tracker;
use crate::vast::model::{ParsedAd, VastDocument};
use crate::vast::parser::{self, ParserConfig};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub sources: Vec<String>,
    pub fallbacks: Vec<String>,
    pub strategy: FetchStrategy,
    pub params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub filter: Option<ParseFilter>,
    pub parser: ParserConfig,
    pub auto_track: bool,
    pub wrapper_depth_limit: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            fallbacks: Vec::new(),
            strategy: FetchStrategy::default(),
            params: HashMap::new(),
            headers: HashMap::new(),
            filter: None,
            parser: ParserConfig::default(),
            auto_track: true,
            wrapper_depth_limit: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub ad: Option<ParsedAd>,
    pub source_url: Option<String>,
    pub errors: Vec<FetchAttemptError>,
    pub elapsed: Duration,
}

/// Runs the fetch/parse/filter/track pipeline for a [`FetchConfig`],
/// trying the primary source group first and then each fallback in turn.
pub struct Orchestrator<'a> {
    client: &'a Client,
    tracker: &'a Tracker,
}

impl<'a> Orchestrator<'a> {
    pub fn new(client: &'a Client, tracker: &'a Tracker) -> Self {
        Self { client, tracker }
    }

    pub async fn execute(&self, config: &FetchConfig) -> FetchResult {
        let started = Instant::now();
        let mut errors = Vec::new();

        // primary group, then each fallback entry as its own candidate group
        let mut candidate_groups: Vec<Vec<String>> = vec![config.sources.clone()];
        candidate_groups.extend(config.fallbacks.iter().map(|f| vec![f.clone()]));

        for sources in &candidate_groups {
            match self.try_group(sources, config).await {
                Ok((ad, source_url, group_errors)) => {
                    errors.extend(group_errors);
                    // Register every tracking URL the resolved ad carries so a
                    // caller can immediately drive a playback engine against
                    // this tracker, regardless of whether the impression fires
                    // automatically.
                    self.tracker.register_many("impression", ad.impression_urls.clone());
                    for (event, urls) in &ad.tracking_events {
                        self.tracker.register_many(event.clone(), urls.clone());
                    }
                    if config.auto_track {
                        let macros = MacroMap::new();
                        let _ = self.tracker.track("impression", &macros).await;
                    }
                    metrics::record_filter_result(true);
                    return FetchResult {
                        ad: Some(ad),
                        source_url: Some(source_url),
                        errors,
                        elapsed: started.elapsed(),
                    };
                }
                Err(group_errors) => errors.extend(group_errors),
            }
        }

        metrics::record_filter_result(false);
        FetchResult {
            ad: None,
            source_url: None,
            errors,
            elapsed: started.elapsed(),
        }
    }

    /// Runs FETCH→PARSE→SELECT for one candidate source group, recursing
    /// through wrapper chains. Returns the resolved ad, the source URL whose
    /// fetch ultimately succeeded, and any non-fatal errors gathered along
    /// the way (e.g. a wrapper chain that hit its depth limit), or the
    /// accumulated errors if the group produced no ad at all.
    async fn try_group(
        &self,
        sources: &[String],
        config: &FetchConfig,
    ) -> Result<(ParsedAd, String, Vec<FetchAttemptError>), Vec<FetchAttemptError>> {
        let outcome = fetch(
            self.client,
            sources,
            &config.strategy,
            &config.params,
            &config.headers,
            CancellationToken::new(),
        )
        .await;

        let Some(raw_xml) = outcome.raw_xml else {
            return Err(outcome.errors);
        };
        let winner = outcome.source_url.unwrap_or_default();
        let mut errors = outcome.errors;

        match self
            .resolve_wrapper_chain(raw_xml, winner.clone(), config, 0)
            .await
        {
            Ok((ad, non_fatal)) => {
                errors.extend(non_fatal);
                if let Some(filter) = &config.filter {
                    if !filter.accept(&ad) {
                        errors.push(FetchAttemptError {
                            source: winner.clone(),
                            phase: FetchPhase::Select,
                            error_kind: crate::error::ErrorKind::FilterRejected,
                            error_message: "no media file satisfied every constraint".to_string(),
                            status_code: None,
                        });
                        return Err(errors);
                    }
                }
                Ok((ad, winner, errors))
            }
            Err(e) => {
                errors.push(e);
                Err(errors)
            }
        }
    }

    /// Parses `raw_xml`; if it's a wrapper, fetches the wrapper URI as the
    /// sole source (sequential strategy, spec §4.5) and recurses, folding
    /// impression/tracking URLs in wrapper-then-inline order. Stops at
    /// `wrapper_depth_limit`, flagging `wrapper_resolution_failed` and
    /// returning the depth-exceeded error alongside the partial ad so the
    /// caller learns why the flag is set (spec §7: "surface; return partial
    /// ad"). An empty `<VAST>` body is not a selectable ad — it's reported
    /// as an error so the fallback cascade keeps walking.
    ///
    /// Boxed explicitly since an `async fn` cannot call itself directly
    /// (its future would have unbounded size). Takes owned strings so each
    /// recursive call's locals don't need to outlive the outer borrow.
    fn resolve_wrapper_chain<'b>(
        &'b self,
        raw_xml: String,
        current_source: String,
        config: &'b FetchConfig,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(ParsedAd, Vec<FetchAttemptError>), FetchAttemptError>> + Send + 'b>>
    {
        Box::pin(async move {
            let doc = parser::parse(&raw_xml, &config.parser).map_err(|e| FetchAttemptError {
                source: current_source.clone(),
                phase: FetchPhase::Parse,
                error_kind: e.error_kind(),
                error_message: e.to_string(),
                status_code: None,
            })?;

            match doc {
                VastDocument::Inline(ad) => {
                    metrics::record_wrapper_depth(depth);
                    Ok((ad, Vec::new()))
                }
                VastDocument::Empty { .. } => Err(FetchAttemptError {
                    source: current_source.clone(),
                    phase: FetchPhase::Parse,
                    error_kind: crate::error::ErrorKind::NoContent,
                    error_message: "VAST document had no Ad elements".to_string(),
                    status_code: None,
                }),
                VastDocument::Wrapper {
                    ad_tag_uri,
                    impression_urls,
                    tracking_events,
                    ..
                } => {
                    if depth >= config.wrapper_depth_limit || ad_tag_uri.is_empty() {
                        warn!(depth, "wrapper resolution depth exceeded or empty ad tag uri");
                        let mut ad = ParsedAd::empty_inline("");
                        ad.wrapper_resolution_failed = true;
                        ad.impression_urls = impression_urls;
                        ad.tracking_events = tracking_events;
                        let error = FetchAttemptError {
                            source: current_source.clone(),
                            phase: FetchPhase::Parse,
                            error_kind: crate::error::ErrorKind::WrapperDepthExceeded,
                            error_message: format!(
                                "wrapper chain stopped at depth {depth} (limit {})",
                                config.wrapper_depth_limit
                            ),
                            status_code: None,
                        };
                        return Ok((ad, vec![error]));
                    }

                    let mut sequential_strategy = config.strategy.clone();
                    sequential_strategy.mode = FetchMode::Sequential;
                    let nested = fetch(
                        self.client,
                        std::slice::from_ref(&ad_tag_uri),
                        &sequential_strategy,
                        &config.params,
                        &config.headers,
                        CancellationToken::new(),
                    )
                    .await;

                    let Some(nested_xml) = nested.raw_xml else {
                        let mut ad = ParsedAd::empty_inline("");
                        ad.wrapper_resolution_failed = true;
                        ad.impression_urls = impression_urls;
                        ad.tracking_events = tracking_events;
                        return Ok((ad, nested.errors));
                    };

                    info!(wrapper = %ad_tag_uri, depth, "resolved wrapper hop");
                    let (mut inner, inner_errors) = self
                        .resolve_wrapper_chain(nested_xml, ad_tag_uri.clone(), config, depth + 1)
                        .await?;
                    inner.prepend_wrapper_urls(&impression_urls, &tracking_events);
                    Ok((inner, inner_errors))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{PoolSettings, TransportPool, TlsVerify};
    use crate::tracking::TrackerConfig;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INLINE_VAST: &str = r#"<VAST version="4.0"><Ad><InLine>
        <AdSystem>Test</AdSystem>
        <Impression>http://t.example/impression</Impression>
        <Creatives><Creative><Linear>
            <Duration>00:00:30</Duration>
            <MediaFiles><MediaFile delivery="progressive" type="video/mp4" width="1280" height="720" bitrate="2000">https://example.com/a.mp4</MediaFile></MediaFiles>
        </Linear></Creative></Creatives>
    </InLine></Ad></VAST>"#;

    fn strategy() -> FetchStrategy {
        FetchStrategy {
            mode: FetchMode::Sequential,
            per_source_timeout: Duration::from_millis(500),
            overall_timeout: None,
            retries: 0,
            backoff_base: Duration::from_millis(1),
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn single_source_success_fires_exactly_one_impression() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
            .mount(&server)
            .await;

        let pool = TransportPool::new(PoolSettings::default());
        let client = pool.client(&TlsVerify::Strict);
        let tracker = Tracker::new(client.clone(), TrackerConfig::default());
        let orchestrator = Orchestrator::new(&client, &tracker);

        let config = FetchConfig {
            sources: vec![server.uri()],
            strategy: strategy(),
            auto_track: true,
            ..Default::default()
        };

        let result = orchestrator.execute(&config).await;
        let ad = result.ad.expect("ad should be present");
        assert_eq!(ad.duration_secs, 30);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn fallback_cascade_tries_each_fallback_until_success() {
        let primary = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&primary)
            .await;

        let fallback_ok = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
            .mount(&fallback_ok)
            .await;

        let pool = TransportPool::new(PoolSettings::default());
        let client = pool.client(&TlsVerify::Strict);
        let tracker = Tracker::new(client.clone(), TrackerConfig::default());
        let orchestrator = Orchestrator::new(&client, &tracker);

        let config = FetchConfig {
            sources: vec![primary.uri()],
            fallbacks: vec![fallback_ok.uri()],
            strategy: strategy(),
            auto_track: false,
            ..Default::default()
        };

        let result = orchestrator.execute(&config).await;
        assert!(result.ad.is_some());
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn parse_filter_rejection_yields_no_ad_when_no_fallbacks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
            .mount(&server)
            .await;

        let pool = TransportPool::new(PoolSettings::default());
        let client = pool.client(&TlsVerify::Strict);
        let tracker = Tracker::new(client.clone(), TrackerConfig::default());
        let orchestrator = Orchestrator::new(&client, &tracker);

        let config = FetchConfig {
            sources: vec![server.uri()],
            strategy: strategy(),
            filter: Some(ParseFilter {
                min_bitrate: Some(5000),
                ..Default::default()
            }),
            auto_track: true,
            ..Default::default()
        };

        let result = orchestrator.execute(&config).await;
        assert!(result.ad.is_none());
        assert_eq!(
            result.errors[0].error_kind,
            crate::error::ErrorKind::FilterRejected
        );
    }

    #[tokio::test]
    async fn wrapper_chain_merges_impression_urls_in_wrapper_then_inline_order() {
        let inline_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
            .mount(&inline_server)
            .await;

        let wrapper_xml = format!(
            r#"<VAST version="3.0"><Ad><Wrapper>
                <VASTAdTagURI>{}</VASTAdTagURI>
                <Impression>http://t.example/wrapper-impression</Impression>
            </Wrapper></Ad></VAST>"#,
            inline_server.uri()
        );

        let wrapper_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(wrapper_xml))
            .mount(&wrapper_server)
            .await;

        let pool = TransportPool::new(PoolSettings::default());
        let client = pool.client(&TlsVerify::Strict);
        let tracker = Tracker::new(client.clone(), TrackerConfig::default());
        let orchestrator = Orchestrator::new(&client, &tracker);

        let config = FetchConfig {
            sources: vec![wrapper_server.uri()],
            strategy: strategy(),
            auto_track: false,
            ..Default::default()
        };

        let result = orchestrator.execute(&config).await;
        let ad = result.ad.expect("ad should resolve through the wrapper");
        assert_eq!(
            ad.impression_urls,
            vec![
                "http://t.example/wrapper-impression".to_string(),
                "http://t.example/impression".to_string(),
            ]
        );
        assert!(!ad.wrapper_resolution_failed);
    }

    #[tokio::test]
    async fn wrapper_depth_exceeded_surfaces_an_error_alongside_the_partial_ad() {
        let wrapper_server = MockServer::start().await;
        let wrapper_xml = format!(
            r#"<VAST version="3.0"><Ad><Wrapper>
                <VASTAdTagURI>{}</VASTAdTagURI>
                <Impression>http://t.example/wrapper-impression</Impression>
            </Wrapper></Ad></VAST>"#,
            wrapper_server.uri()
        );
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(wrapper_xml))
            .mount(&wrapper_server)
            .await;

        let pool = TransportPool::new(PoolSettings::default());
        let client = pool.client(&TlsVerify::Strict);
        let tracker = Tracker::new(client.clone(), TrackerConfig::default());
        let orchestrator = Orchestrator::new(&client, &tracker);

        let config = FetchConfig {
            sources: vec![wrapper_server.uri()],
            strategy: strategy(),
            auto_track: false,
            wrapper_depth_limit: 2,
            ..Default::default()
        };

        let result = orchestrator.execute(&config).await;
        let ad = result.ad.expect("partial ad should still be returned");
        assert!(ad.wrapper_resolution_failed);
        assert!(result
            .errors
            .iter()
            .any(|e| e.error_kind == crate::error::ErrorKind::WrapperDepthExceeded));
    }

    #[tokio::test]
    async fn empty_vast_body_does_not_halt_the_fallback_cascade() {
        let empty_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<VAST version="4.0"></VAST>"#))
            .mount(&empty_server)
            .await;

        let fallback_ok = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
            .mount(&fallback_ok)
            .await;

        let pool = TransportPool::new(PoolSettings::default());
        let client = pool.client(&TlsVerify::Strict);
        let tracker = Tracker::new(client.clone(), TrackerConfig::default());
        let orchestrator = Orchestrator::new(&client, &tracker);

        let config = FetchConfig {
            sources: vec![empty_server.uri()],
            fallbacks: vec![fallback_ok.uri()],
            strategy: strategy(),
            auto_track: false,
            ..Default::default()
        };

        let result = orchestrator.execute(&config).await;
        let ad = result.ad.expect("fallback should still resolve an ad");
        assert_eq!(ad.duration_secs, 30);
        assert!(result
            .errors
            .iter()
            .any(|e| e.error_kind == crate::error::ErrorKind::NoContent));
    }
}
