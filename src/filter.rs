//! Media-quality parse filter (spec §4.6).
//!
//! `select_best_media_file` in `ad/vast.rs` picks one media file by a fixed
//! heuristic (highest bitrate under a resolution cap). This generalizes
//! that into a caller-supplied predicate plus an optional sort/limit pass,
//! since the spec wants every constraint configurable rather than baked in.

use crate::vast::model::{MediaFile, ParsedAd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Bitrate,
    Width,
    Height,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Per-field constraints a single media file must satisfy together
/// (conjunction across fields; a field that's `None` imposes no constraint).
#[derive(Debug, Clone, Default)]
pub struct ParseFilter {
    pub allowed_mime_types: Option<Vec<String>>,
    pub allowed_delivery: Option<Vec<String>>,
    pub min_duration_secs: Option<u32>,
    pub max_duration_secs: Option<u32>,
    pub min_bitrate: Option<u32>,
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
    pub required_codec_substring: Option<String>,
    pub sort_by: Option<SortBy>,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Descending
    }
}

impl ParseFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `ad` has at least one media file satisfying every constraint
    /// set on this filter, and the ad's duration (if bounded) is in range.
    pub fn accept(&self, ad: &ParsedAd) -> bool {
        if let Some(min) = self.min_duration_secs {
            if ad.duration_secs < min {
                return false;
            }
        }
        if let Some(max) = self.max_duration_secs {
            if ad.duration_secs > max {
                return false;
            }
        }
        ad.media_files.iter().any(|m| self.media_file_matches(m))
    }

    /// Returns the media files that satisfy this filter, sorted and
    /// truncated per `sort_by`/`sort_order`/`limit` if set. Tie-break is
    /// original document order (stable sort).
    pub fn select<'a>(&self, ad: &'a ParsedAd) -> Vec<&'a MediaFile> {
        let mut matching: Vec<&MediaFile> = ad
            .media_files
            .iter()
            .filter(|m| self.media_file_matches(m))
            .collect();

        if let Some(sort_by) = self.sort_by {
            matching.sort_by(|a, b| {
                let key = |m: &MediaFile| match sort_by {
                    SortBy::Bitrate => m.bitrate.unwrap_or(0),
                    SortBy::Width => m.width,
                    SortBy::Height => m.height,
                };
                match self.sort_order {
                    SortOrder::Ascending => key(a).cmp(&key(b)),
                    SortOrder::Descending => key(b).cmp(&key(a)),
                }
            });
        }

        if let Some(limit) = self.limit {
            matching.truncate(limit);
        }

        matching
    }

    fn media_file_matches(&self, m: &MediaFile) -> bool {
        if let Some(allowed) = &self.allowed_mime_types {
            if !allowed.iter().any(|t| t.eq_ignore_ascii_case(&m.mime_type)) {
                return false;
            }
        }
        if let Some(allowed) = &self.allowed_delivery {
            if !allowed.iter().any(|d| d.eq_ignore_ascii_case(&m.delivery)) {
                return false;
            }
        }
        if let Some(min_bitrate) = self.min_bitrate {
            if m.bitrate.unwrap_or(0) < min_bitrate {
                return false;
            }
        }
        if let Some(min_width) = self.min_width {
            if m.width < min_width {
                return false;
            }
        }
        if let Some(min_height) = self.min_height {
            if m.height < min_height {
                return false;
            }
        }
        if let Some(codec) = &self.required_codec_substring {
            match &m.codec {
                Some(c) if c.to_lowercase().contains(&codec.to_lowercase()) => {}
                _ => return false,
            }
        }
        true
    }
}
