use thiserror::Error;

/// Typed error kinds surfaced in fetch/tracker results (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    TimeoutPerSource,
    TimeoutOverall,
    HttpStatus,
    NoContent,
    InvalidXml,
    MissingRequiredField,
    UnsupportedVersion,
    WrapperDepthExceeded,
    FilterRejected,
    EmptyUrl,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::TimeoutPerSource => "timeout-per-source",
            ErrorKind::TimeoutOverall => "timeout-overall",
            ErrorKind::HttpStatus => "http-status",
            ErrorKind::NoContent => "no-content",
            ErrorKind::InvalidXml => "invalid-xml",
            ErrorKind::MissingRequiredField => "missing-required-field",
            ErrorKind::UnsupportedVersion => "unsupported-version",
            ErrorKind::WrapperDepthExceeded => "wrapper-depth-exceeded",
            ErrorKind::FilterRejected => "filter-rejected",
            ErrorKind::EmptyUrl => "empty-url",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Domain-specific error type for vast-client.
#[derive(Error, Debug)]
pub enum VastClientError {
    #[error("transport error fetching {source_url}: {message}")]
    Transport { source_url: String, message: String },

    #[error("source {source_url} exceeded its per-source timeout")]
    TimeoutPerSource { source_url: String },

    #[error("overall fetch deadline exceeded")]
    TimeoutOverall,

    #[error("source {source_url} returned HTTP {status}")]
    HttpStatus { source_url: String, status: u16 },

    #[error("source {source_url} returned 204 No Content")]
    NoContent { source_url: String },

    #[error("failed to parse VAST XML: {0}")]
    InvalidXml(String),

    #[error("VAST ad is missing a required field: {0}")]
    MissingRequiredField(String),

    #[error("unsupported VAST version: {0}")]
    UnsupportedVersion(String),

    #[error("wrapper resolution exceeded depth limit of {0}")]
    WrapperDepthExceeded(u32),

    #[error("parse filter rejected the ad: no media file satisfied every constraint")]
    FilterRejected,

    #[error("trackable URL is empty")]
    EmptyUrl,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("no sources were configured")]
    NoSources,
}

impl VastClientError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            VastClientError::Transport { .. } => ErrorKind::Transport,
            VastClientError::TimeoutPerSource { .. } => ErrorKind::TimeoutPerSource,
            VastClientError::TimeoutOverall => ErrorKind::TimeoutOverall,
            VastClientError::HttpStatus { .. } => ErrorKind::HttpStatus,
            VastClientError::NoContent { .. } => ErrorKind::NoContent,
            VastClientError::InvalidXml(_) => ErrorKind::InvalidXml,
            VastClientError::MissingRequiredField(_) => ErrorKind::MissingRequiredField,
            VastClientError::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            VastClientError::WrapperDepthExceeded(_) => ErrorKind::WrapperDepthExceeded,
            VastClientError::FilterRejected => ErrorKind::FilterRejected,
            VastClientError::EmptyUrl => ErrorKind::EmptyUrl,
            VastClientError::Cancelled => ErrorKind::Cancelled,
            VastClientError::ConfigError(_) => ErrorKind::Transport,
            VastClientError::NoSources => ErrorKind::Transport,
        }
    }
}

pub type Result<T> = std::result::Result<T, VastClientError>;
