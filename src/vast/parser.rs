//! Tolerant/strict VAST XML parsing (spec §4.4).
//!
//! Keeps `ad/vast.rs`'s `quick_xml::Reader` event-loop-per-element shape
//! (one `parse_*` function per element, a `read_text`/`get_attr` pair of
//! helpers) and extends it with strict-mode validation, round-half-to-even
//! duration parsing, lowercased tracking-event keys, `progress-N` offset
//! keys, and `VASTAdTagURI`/wrapper detection that the orchestrator uses
//! to decide whether to recurse.

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::{info, warn};

use crate::error::{Result, VastClientError};
use crate::vast::model::{MediaFile, ParsedAd, VastDocument};

const SUPPORTED_VERSIONS: &[&str] = &["2.0", "3.0", "4.0", "4.1", "4.2"];

/// Caller-supplied tag-name overrides for the handful of elements whose
/// names vary across non-conformant feeds. Reserved for spec §4.4's
/// "optional caller-supplied paths"; quick-xml is tag-driven rather than a
/// true XPath engine, so this stores tag overrides consulted at the same
/// decision points the fixed-tag parser below hardcodes, not real XPath.
#[derive(Debug, Clone, Default)]
pub struct CustomXPaths {
    pub media_file_tag: Option<String>,
    pub tracking_tag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Fail fast on XML syntax errors or missing required fields instead
    /// of recovering.
    pub strict: bool,
    /// Attempt to skip bad nodes and accept missing optional fields.
    pub recover_on_error: bool,
    pub xpaths: CustomXPaths,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            strict: false,
            recover_on_error: true,
            xpaths: CustomXPaths::default(),
        }
    }
}

/// Parse a raw VAST XML document into a [`VastDocument`] (inline, wrapper,
/// or empty). Does not recurse into wrappers — that's the orchestrator's
/// job (spec §4.5).
pub fn parse(xml: &str, config: &ParserConfig) -> Result<VastDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut version = String::new();
    let mut first_ad: Option<VastDocument> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"VAST" => {
                version = get_attr(e, "version").unwrap_or_default();
                info!("parsing VAST version {}", version);
                if config.strict && !SUPPORTED_VERSIONS.contains(&version.as_str()) {
                    return Err(VastClientError::UnsupportedVersion(version));
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Ad" => {
                let doc = parse_ad(&mut reader, &version, config)?;
                if let Some(doc) = doc {
                    if first_ad.is_none() {
                        first_ad = Some(doc);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                let msg = format!("VAST XML parse error: {e}");
                if config.strict {
                    return Err(VastClientError::InvalidXml(msg));
                }
                warn!("{}", msg);
                break;
            }
            _ => {}
        }
    }

    match first_ad {
        Some(doc) => Ok(doc),
        None => {
            if config.strict {
                return Err(VastClientError::MissingRequiredField(
                    "no Ad element found in VAST response".to_string(),
                ));
            }
            Ok(VastDocument::Empty { vast_version: version })
        }
    }
}

fn parse_ad(
    reader: &mut Reader<&[u8]>,
    version: &str,
    config: &ParserConfig,
) -> Result<Option<VastDocument>> {
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"InLine" => {
                let ad = parse_inline(reader, version, config)?;
                return Ok(Some(VastDocument::Inline(ad)));
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Wrapper" => {
                let (ad_tag_uri, impression_urls, tracking_events) =
                    parse_wrapper(reader, config)?;
                if config.strict && ad_tag_uri.is_empty() {
                    return Err(VastClientError::MissingRequiredField(
                        "Wrapper missing VASTAdTagURI".to_string(),
                    ));
                }
                return Ok(Some(VastDocument::Wrapper {
                    ad_tag_uri,
                    impression_urls,
                    tracking_events,
                    vast_version: version.to_string(),
                }));
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Ad" => return Ok(None),
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(xml_err("Ad", e, config)?),
            _ => {}
        }
    }
}

fn parse_inline(
    reader: &mut Reader<&[u8]>,
    version: &str,
    config: &ParserConfig,
) -> Result<ParsedAd> {
    let mut ad = ParsedAd::empty_inline(version);
    let mut creative_seen = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"AdSystem" => {
                ad.ad_system = read_text(reader, "AdSystem", config)?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"AdTitle" => {
                ad.ad_title = read_text(reader, "AdTitle", config)?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Impression" => {
                let url = read_text(reader, "Impression", config)?;
                if !url.is_empty() {
                    ad.impression_urls.push(url);
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Error" => {
                let url = read_text(reader, "Error", config)?;
                if !url.is_empty() {
                    ad.error_urls.push(url);
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Creatives" => {
                let (creative_id, duration, media_files, tracking) =
                    parse_creatives(reader, config)?;
                if duration.is_some() || !media_files.is_empty() {
                    creative_seen = true;
                }
                ad.creative_id = creative_id;
                ad.duration_secs = duration.unwrap_or(0);
                ad.media_files = media_files;
                for (event, url) in tracking {
                    ad.tracking_events.entry(event).or_default().push(url);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"InLine" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("InLine", e, config)?),
            _ => {}
        }
    }

    if config.strict {
        if ad.impression_urls.is_empty() {
            return Err(VastClientError::MissingRequiredField(
                "InLine ad has no Impression".to_string(),
            ));
        }
        if !creative_seen {
            return Err(VastClientError::MissingRequiredField(
                "InLine ad has no parseable Creative/Linear/Duration".to_string(),
            ));
        }
    }

    Ok(ad)
}

#[allow(clippy::type_complexity)]
fn parse_wrapper(
    reader: &mut Reader<&[u8]>,
    config: &ParserConfig,
) -> Result<(String, Vec<String>, HashMap<String, Vec<String>>)> {
    let mut ad_tag_uri = String::new();
    let mut impression_urls = Vec::new();
    let mut tracking_events: HashMap<String, Vec<String>> = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"VASTAdTagURI" => {
                ad_tag_uri = read_text(reader, "VASTAdTagURI", config)?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Impression" => {
                let url = read_text(reader, "Impression", config)?;
                if !url.is_empty() {
                    impression_urls.push(url);
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"TrackingEvents" => {
                for (event, url) in parse_tracking_events(reader, config)? {
                    tracking_events.entry(event).or_default().push(url);
                }
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Creatives" => {
                // wrappers may carry their own TrackingEvents nested under Creatives/Linear
                let (_, _, _, tracking) = parse_creatives(reader, config)?;
                for (event, url) in tracking {
                    tracking_events.entry(event).or_default().push(url);
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Wrapper" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("Wrapper", e, config)?),
            _ => {}
        }
    }

    Ok((ad_tag_uri, impression_urls, tracking_events))
}

#[allow(clippy::type_complexity)]
fn parse_creatives(
    reader: &mut Reader<&[u8]>,
    config: &ParserConfig,
) -> Result<(String, Option<u32>, Vec<MediaFile>, Vec<(String, String)>)> {
    let mut creative_id = String::new();
    let mut duration = None;
    let mut media_files = Vec::new();
    let mut tracking_events = Vec::new();
    let mut seen_first_linear = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Creative" => {
                let id = get_attr(e, "id").unwrap_or_default();
                let (linear_duration, linear_media, linear_tracking) =
                    parse_creative(reader, config)?;
                // Invariant: at most one inline creative per resolved ad —
                // keep the first Linear creative encountered.
                if !seen_first_linear && (linear_duration.is_some() || !linear_media.is_empty()) {
                    creative_id = id;
                    duration = linear_duration;
                    media_files = linear_media;
                    seen_first_linear = true;
                }
                tracking_events.extend(linear_tracking);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creatives" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("Creatives", e, config)?),
            _ => {}
        }
    }

    Ok((creative_id, duration, media_files, tracking_events))
}

#[allow(clippy::type_complexity)]
fn parse_creative(
    reader: &mut Reader<&[u8]>,
    config: &ParserConfig,
) -> Result<(Option<u32>, Vec<MediaFile>, Vec<(String, String)>)> {
    let mut duration = None;
    let mut media_files = Vec::new();
    let mut tracking_events = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Linear" => {
                let (d, m, t) = parse_linear(reader, config)?;
                duration = d;
                media_files = m;
                tracking_events = t;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creative" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("Creative", e, config)?),
            _ => {}
        }
    }

    Ok((duration, media_files, tracking_events))
}

#[allow(clippy::type_complexity)]
fn parse_linear(
    reader: &mut Reader<&[u8]>,
    config: &ParserConfig,
) -> Result<(Option<u32>, Vec<MediaFile>, Vec<(String, String)>)> {
    let mut duration = None;
    let mut media_files = Vec::new();
    let mut tracking_events = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Duration" => {
                let text = read_text(reader, "Duration", config)?;
                duration = Some(parse_duration_secs(&text));
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"MediaFiles" => {
                media_files = parse_media_files(reader, config)?;
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"TrackingEvents" => {
                tracking_events = parse_tracking_events(reader, config)?;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Linear" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("Linear", e, config)?),
            _ => {}
        }
    }

    Ok((duration, media_files, tracking_events))
}

fn parse_media_files(reader: &mut Reader<&[u8]>, config: &ParserConfig) -> Result<Vec<MediaFile>> {
    let mut files = Vec::new();
    let tag = config
        .xpaths
        .media_file_tag
        .clone()
        .unwrap_or_else(|| "MediaFile".to_string());

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == tag.as_bytes() => {
                let delivery = get_attr(e, "delivery").unwrap_or_default();
                let mime_type = get_attr(e, "type").unwrap_or_default();
                let width = get_attr(e, "width").and_then(|s| s.parse().ok()).unwrap_or(0);
                let height = get_attr(e, "height").and_then(|s| s.parse().ok()).unwrap_or(0);
                let bitrate = get_attr(e, "bitrate").and_then(|s| s.parse().ok());
                let codec = get_attr(e, "codec");
                let url = read_text(reader, &tag, config)?.trim().to_string();

                files.push(MediaFile {
                    url,
                    delivery,
                    mime_type,
                    width,
                    height,
                    bitrate,
                    codec,
                });
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"MediaFiles" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("MediaFiles", e, config)?),
            _ => {}
        }
    }

    Ok(files)
}

fn parse_tracking_events(
    reader: &mut Reader<&[u8]>,
    config: &ParserConfig,
) -> Result<Vec<(String, String)>> {
    let mut events = Vec::new();
    let tag = config
        .xpaths
        .tracking_tag
        .clone()
        .unwrap_or_else(|| "Tracking".to_string());

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == tag.as_bytes() => {
                let event_attr = get_attr(e, "event").unwrap_or_default().to_lowercase();
                let key = if event_attr == "progress" {
                    let offset = get_attr(e, "offset").unwrap_or_default();
                    format!("progress-{}", parse_offset_secs(&offset))
                } else {
                    event_attr
                };
                let url = read_text(reader, &tag, config)?.trim().to_string();
                events.push((key, url));
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"TrackingEvents" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err("TrackingEvents", e, config)?),
            _ => {}
        }
    }

    Ok(events)
}

/// Parses `HH:MM:SS` or `HH:MM:SS.mmm` into whole seconds, rounding .5 to
/// the nearest even integer (spec §4.4).
fn parse_duration_secs(duration: &str) -> u32 {
    let parts: Vec<&str> = duration.trim().split(':').collect();
    if parts.len() != 3 {
        warn!("invalid VAST duration format: {}", duration);
        return 0;
    }
    let hours: f64 = parts[0].parse().unwrap_or(0.0);
    let minutes: f64 = parts[1].parse().unwrap_or(0.0);
    let seconds: f64 = parts[2].parse().unwrap_or(0.0);
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    round_half_to_even(total)
}

/// Parses a signed offset string in seconds (used for `progress` offsets,
/// which may themselves be `HH:MM:SS` per VAST or a plain integer).
fn parse_offset_secs(offset: &str) -> i64 {
    if offset.contains(':') {
        parse_duration_secs(offset) as i64
    } else {
        offset.trim().parse().unwrap_or(0)
    }
}

fn round_half_to_even(value: f64) -> u32 {
    let floor = value.floor();
    let frac = value - floor;
    let rounded = if (frac - 0.5).abs() < f64::EPSILON {
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        value.round()
    };
    rounded.max(0.0) as u32
}

fn read_text(reader: &mut Reader<&[u8]>, end_tag: &str, config: &ParserConfig) -> Result<String> {
    let mut text = String::new();
    let end_tag_bytes = end_tag.as_bytes();

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::CData(e)) => {
                text.push_str(std::str::from_utf8(&e).unwrap_or_default());
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == end_tag_bytes => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(end_tag, e, config)?),
            _ => {}
        }
    }

    Ok(text.trim().to_string())
}

fn get_attr(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name.as_bytes())
        .and_then(|a| String::from_utf8(a.value.to_vec()).ok())
}

fn xml_err(ctx: &str, e: quick_xml::Error, config: &ParserConfig) -> Result<VastClientError> {
    let msg = format!("VAST XML parse error in {ctx}: {e}");
    if config.strict {
        Ok(VastClientError::InvalidXml(msg))
    } else {
        warn!("{}", msg);
        Ok(VastClientError::InvalidXml(msg))
    }
}
