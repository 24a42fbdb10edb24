//! Structured ad data produced by the parser (spec §3).

use std::collections::HashMap;

/// One media rendition of a creative.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub url: String,
    pub delivery: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: Option<u32>,
    pub codec: Option<String>,
}

/// A fully resolved ad: either parsed directly from an `InLine` ad, or the
/// result of following a `Wrapper` chain down to its innermost `InLine`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAd {
    pub vast_version: String,
    pub ad_system: String,
    pub ad_title: String,
    pub creative_id: String,
    /// Whole seconds, rounded half-to-even from `HH:MM:SS[.mmm]`.
    pub duration_secs: u32,
    pub media_files: Vec<MediaFile>,
    pub impression_urls: Vec<String>,
    pub error_urls: Vec<String>,
    /// event-type (lowercased; `progress-N` for progress offsets) -> URLs, in document order.
    pub tracking_events: HashMap<String, Vec<String>>,
    pub extensions: HashMap<String, String>,
    pub wrapper_resolution_failed: bool,
}

impl ParsedAd {
    pub fn empty_inline(vast_version: impl Into<String>) -> Self {
        Self {
            vast_version: vast_version.into(),
            ad_system: String::new(),
            ad_title: String::new(),
            creative_id: String::new(),
            duration_secs: 0,
            media_files: Vec::new(),
            impression_urls: Vec::new(),
            error_urls: Vec::new(),
            tracking_events: HashMap::new(),
            extensions: HashMap::new(),
            wrapper_resolution_failed: false,
        }
    }

    /// Appends another ad's impression and tracking URLs ahead of this ad's
    /// own — used when folding a wrapper's URLs into the inline ad it
    /// ultimately resolves to (spec §4.5: wrapper URLs first, inline last).
    pub fn prepend_wrapper_urls(&mut self, wrapper_impressions: &[String], wrapper_tracking: &HashMap<String, Vec<String>>) {
        let mut merged_impressions = wrapper_impressions.to_vec();
        merged_impressions.append(&mut self.impression_urls);
        self.impression_urls = merged_impressions;

        for (event, urls) in wrapper_tracking {
            let entry = self.tracking_events.entry(event.clone()).or_default();
            let mut merged = urls.clone();
            merged.append(entry);
            *entry = merged;
        }
    }
}

/// Intermediate parse outcome: either a resolved inline ad, or a wrapper
/// pointing elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub enum VastDocument {
    Inline(ParsedAd),
    Wrapper {
        ad_tag_uri: String,
        impression_urls: Vec<String>,
        tracking_events: HashMap<String, Vec<String>>,
        vast_version: String,
    },
    /// `<VAST>` with no `<Ad>` children — a valid "no ad available" response.
    Empty { vast_version: String },
}
