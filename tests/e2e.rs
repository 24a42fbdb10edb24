//! End-to-end scenarios against mocked ad servers: a single client walks
//! fetch -> parse -> filter -> track -> playback exactly as an integrator
//! would use this crate.

use std::sync::Arc;
use std::time::Duration;

use vast_client::client::{Client, RequestOptions};
use vast_client::fetch::{FetchMode, FetchStrategy};
use vast_client::filter::ParseFilter;
use vast_client::playback::{PlaybackConfig, PlaybackEngine, PlaybackSession, PlaybackState};
use vast_client::time::VirtualTime;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

const INLINE_VAST: &str = r#"<VAST version="4.0"><Ad><InLine>
    <AdSystem>Test</AdSystem>
    <Impression>http://t.example/impression</Impression>
    <Creatives><Creative><Linear>
        <Duration>00:00:20</Duration>
        <TrackingEvents>
            <Tracking event="start">http://t.example/start</Tracking>
            <Tracking event="firstQuartile">http://t.example/q1</Tracking>
            <Tracking event="midpoint">http://t.example/mid</Tracking>
            <Tracking event="thirdQuartile">http://t.example/q3</Tracking>
            <Tracking event="complete">http://t.example/complete</Tracking>
        </TrackingEvents>
        <MediaFiles>
            <MediaFile delivery="progressive" type="video/mp4" width="1280" height="720" bitrate="2500">https://example.com/a.mp4</MediaFile>
            <MediaFile delivery="progressive" type="video/mp4" width="640" height="360" bitrate="800">https://example.com/b.mp4</MediaFile>
        </MediaFiles>
    </Linear></Creative></Creatives>
</InLine></Ad></VAST>"#;

fn fast_strategy(mode: FetchMode) -> FetchStrategy {
    FetchStrategy {
        mode,
        per_source_timeout: Duration::from_millis(500),
        overall_timeout: Some(Duration::from_secs(2)),
        retries: 0,
        backoff_base: Duration::from_millis(1),
        backoff_multiplier: 1.0,
    }
}

/// Scenario A: single source, success on first try.
#[tokio::test]
async fn single_source_fetch_resolves_and_tracks_impression() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
        .mount(&server)
        .await;

    let client = Client::builder()
        .source(server.uri())
        .strategy(fast_strategy(FetchMode::Sequential))
        .build();

    let result = client.request(RequestOptions::default()).await.unwrap();
    let ad = result.ad.expect("ad should resolve");
    assert_eq!(ad.duration_secs, 20);
    assert_eq!(ad.media_files.len(), 2);
}

/// Scenario B: parallel/race mode returns as soon as any source answers.
#[tokio::test]
async fn race_mode_returns_first_answering_source() {
    init_tracing();
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST).set_delay(Duration::from_millis(300)))
        .mount(&slow)
        .await;

    let fast = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
        .mount(&fast)
        .await;

    let client = Client::builder()
        .source(slow.uri())
        .source(fast.uri())
        .strategy(fast_strategy(FetchMode::Race))
        .build();

    let result = client.request(RequestOptions::default()).await.unwrap();
    assert!(result.ad.is_some());
}

/// Scenario C: the primary source fails outright; a fallback source
/// resolves the ad and the failure is recorded, not swallowed.
#[tokio::test]
async fn fallback_cascade_recovers_from_primary_failure() {
    init_tracing();
    let primary = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&primary)
        .await;

    let fallback = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
        .mount(&fallback)
        .await;

    let client = Client::builder()
        .source(primary.uri())
        .fallback(fallback.uri())
        .strategy(fast_strategy(FetchMode::Sequential))
        .build();

    let result = client.request(RequestOptions::default()).await.unwrap();
    assert!(result.ad.is_some());
    assert_eq!(result.errors.len(), 1);
}

/// Scenario D: a wrapper ad is followed to its inline target and both
/// levels' impression URLs survive, wrapper first.
#[tokio::test]
async fn wrapper_resolves_to_inline_ad_with_merged_urls() {
    init_tracing();
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

    let client = Client::builder()
        .source(wrapper_server.uri())
        .strategy(fast_strategy(FetchMode::Sequential))
        .build();

    let result = client.request(RequestOptions::default()).await.unwrap();
    let ad = result.ad.expect("wrapper should resolve to an inline ad");
    assert_eq!(
        ad.impression_urls,
        vec![
            "http://t.example/wrapper-impression".to_string(),
            "http://t.example/impression".to_string(),
        ]
    );
    assert!(!ad.wrapper_resolution_failed);
}

/// Scenario E: a parse filter rejects every media file on offer and no
/// fallback is configured, so the request resolves with no ad.
#[tokio::test]
async fn parse_filter_rejection_surfaces_as_no_ad() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
        .mount(&server)
        .await;

    let client = Client::builder()
        .source(server.uri())
        .strategy(fast_strategy(FetchMode::Sequential))
        .build();

    let options = RequestOptions {
        filter: Some(ParseFilter {
            min_width: Some(4000),
            ..Default::default()
        }),
        ..Default::default()
    };

    let result = client.request(options).await.unwrap();
    assert!(result.ad.is_none());
    assert_eq!(
        result.errors[0].error_kind,
        vast_client::error::ErrorKind::FilterRejected
    );
}

/// Scenario F: a resolved ad is handed to a playback engine driven by
/// virtual time; quartile events fire in order through to completion.
#[tokio::test]
async fn resolved_ad_drives_virtual_time_playback_to_completion() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INLINE_VAST))
        .mount(&server)
        .await;

    let mut client = Client::builder()
        .source(server.uri())
        .strategy(fast_strategy(FetchMode::Sequential))
        .auto_track(false)
        .build();

    let result = client.request(RequestOptions::default()).await.unwrap();
    let ad = result.ad.expect("ad should resolve");

    let session = PlaybackSession::new("e2e-session", "creative-e2e", ad.duration_secs as f64);
    let time_source = Arc::new(VirtualTime::new(4.0).unwrap());
    let config = PlaybackConfig {
        tick_interval: 1.0,
        ..Default::default()
    };
    let mut engine = PlaybackEngine::new(session, time_source, client.tracker_mut(), config);

    engine.start().await;
    engine.run_to_completion().await;

    assert_eq!(engine.session().state, PlaybackState::Completed);
    assert_eq!(engine.session().quartiles_reached.len(), 3);
}
