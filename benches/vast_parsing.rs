//! Benchmarks for VAST XML parsing.
//!
//! Parsing happens on every ad request, so its speed directly impacts
//! time-to-first-frame.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use vast_client::vast::parser::{self, ParserConfig};

/// Generates a VAST InLine XML response with a configurable number of ads
/// and media files per ad.
fn generate_vast_inline(ad_count: usize, media_files_per_ad: usize) -> String {
    let mut xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<VAST version="4.0">"#
        .to_string();

    for ad_idx in 0..ad_count {
        xml.push_str(&format!(
            r#"
  <Ad id="ad-{0:03}">
    <InLine>
      <AdSystem>Benchmark Adserver</AdSystem>
      <AdTitle>Benchmark Ad {0}</AdTitle>
      <Impression><![CDATA[https://tracking.example.com/impression?ad={0}]]></Impression>
      <Creatives>
        <Creative id="creative-{0:03}">
          <Linear>
            <Duration>00:00:15</Duration>
            <TrackingEvents>
              <Tracking event="start"><![CDATA[https://tracking.example.com/start?ad={0}]]></Tracking>
              <Tracking event="firstQuartile"><![CDATA[https://tracking.example.com/q1?ad={0}]]></Tracking>
              <Tracking event="midpoint"><![CDATA[https://tracking.example.com/mid?ad={0}]]></Tracking>
              <Tracking event="thirdQuartile"><![CDATA[https://tracking.example.com/q3?ad={0}]]></Tracking>
              <Tracking event="complete"><![CDATA[https://tracking.example.com/complete?ad={0}]]></Tracking>
            </TrackingEvents>
            <MediaFiles>"#,
            ad_idx
        ));

        let renditions = [
            (640, 360, 800, "video/mp4", "progressive"),
            (854, 480, 1400, "video/mp4", "progressive"),
            (1280, 720, 2800, "video/mp4", "progressive"),
            (1920, 1080, 5000, "video/mp4", "progressive"),
            (1280, 720, 0, "application/x-mpegURL", "streaming"),
        ];

        for mf_idx in 0..media_files_per_ad {
            let (w, h, br, mime, delivery) = renditions[mf_idx % renditions.len()];
            let bitrate_attr = if br > 0 {
                format!(" bitrate=\"{br}\"")
            } else {
                String::new()
            };
            let ext = if mime.contains("mpegURL") { "m3u8" } else { "mp4" };
            xml.push_str(&format!(
                r#"
              <MediaFile delivery="{delivery}" type="{mime}" width="{w}" height="{h}"{bitrate_attr} codec="H.264">
                <![CDATA[https://ads-cdn.example.com/creatives/ad_{ad_idx:03}_{w}x{h}.{ext}]]>
              </MediaFile>"#
            ));
        }

        xml.push_str(
            r#"
            </MediaFiles>
          </Linear>
        </Creative>
      </Creatives>
    </InLine>
  </Ad>"#,
        );
    }

    xml.push_str("\n</VAST>");
    xml
}

fn generate_vast_wrapper() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<VAST version="3.0">
  <Ad id="wrapper-001">
    <Wrapper>
      <AdSystem>Wrapper Exchange</AdSystem>
      <VASTAdTagURI><![CDATA[https://exchange.example.com/vast?auction=12345&cb=67890]]></VASTAdTagURI>
      <Impression><![CDATA[https://tracking.example.com/wrapper-impression?id=001]]></Impression>
      <Creatives>
        <Creative>
          <Linear>
            <TrackingEvents>
              <Tracking event="start"><![CDATA[https://tracking.example.com/wrapper-start]]></Tracking>
              <Tracking event="complete"><![CDATA[https://tracking.example.com/wrapper-complete]]></Tracking>
            </TrackingEvents>
          </Linear>
        </Creative>
      </Creatives>
    </Wrapper>
  </Ad>
</VAST>"#
        .to_string()
}

fn generate_vast_empty() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<VAST version="3.0">
</VAST>"#
        .to_string()
}

fn bench_parse_vast_inline(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_vast_inline");
    let config = ParserConfig::default();

    for ad_count in [1, 3, 5, 10] {
        let xml = generate_vast_inline(ad_count, 3);
        group.bench_with_input(BenchmarkId::new("ads", ad_count), &xml, |b, input| {
            b.iter(|| {
                parser::parse(black_box(input), &config).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_parse_vast_media_files(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_vast_media_files");
    let config = ParserConfig::default();

    for mf_count in [1, 3, 5] {
        let xml = generate_vast_inline(1, mf_count);
        group.bench_with_input(
            BenchmarkId::new("media_files", mf_count),
            &xml,
            |b, input| {
                b.iter(|| {
                    parser::parse(black_box(input), &config).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_parse_vast_wrapper(c: &mut Criterion) {
    let xml = generate_vast_wrapper();
    let config = ParserConfig::default();

    c.bench_with_input(
        BenchmarkId::new("parse_vast_wrapper", "single"),
        &xml,
        |b, input| {
            b.iter(|| {
                parser::parse(black_box(input), &config).unwrap();
            });
        },
    );
}

fn bench_parse_vast_empty(c: &mut Criterion) {
    let xml = generate_vast_empty();
    let config = ParserConfig::default();

    c.bench_with_input(
        BenchmarkId::new("parse_vast_empty", "no_fill"),
        &xml,
        |b, input| {
            b.iter(|| {
                parser::parse(black_box(input), &config).unwrap();
            });
        },
    );
}

/// Benchmark: realistic ad pod (3 ads, 3 media files each).
fn bench_parse_vast_realistic_pod(c: &mut Criterion) {
    let xml = generate_vast_inline(3, 3);
    let xml_size = xml.len();
    let config = ParserConfig::default();

    c.bench_with_input(
        BenchmarkId::new("parse_vast_realistic", format!("3ads_3mf_{xml_size}bytes")),
        &xml,
        |b, input| {
            b.iter(|| {
                parser::parse(black_box(input), &config).unwrap();
            });
        },
    );
}

criterion_group!(
    benches,
    bench_parse_vast_inline,
    bench_parse_vast_media_files,
    bench_parse_vast_wrapper,
    bench_parse_vast_empty,
    bench_parse_vast_realistic_pod,
);
criterion_main!(benches);
