use std::time::Duration;
use thiserror::Error;

/// Boxed error type accepted from hooks, codecs and custom transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Message used when a worker panics with a payload that is neither a string
/// nor an [`HttpError`].
pub const UNKNOWN_PANIC_MESSAGE: &str = "unknown panic";

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// Why a [`Context`](crate::Context) stopped a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The context (or one of its parents) was cancelled explicitly
    Canceled,
    /// The context deadline passed
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Canceled => f.write_str("context canceled"),
            CancelReason::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

/// Coarse error classes, one per failure stage of a call.
///
/// Every [`HttpError`] maps to exactly one kind via [`HttpError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Deferred failure from an option builder, reported before any I/O
    OptionConfig,
    /// Invalid method, URL, header or request body
    RequestBuild,
    /// Connection, TLS, I/O, timeout or retry exhaustion
    Transport,
    /// A user supplied pre or post hook failed
    Hook,
    /// The call context was cancelled or its deadline passed
    Cancelled,
    /// A panic was recovered inside the request worker
    Panic,
    /// Response body could not be decoded
    Decode,
}

/// HTTP request error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// An option builder failed (serialization, file access, invalid header)
    #[error("Invalid request option: {0}")]
    OptionConfig(#[source] BoxError),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Request body could not be produced
    #[error("Failed to build request body: {0}")]
    RequestBody(#[source] BoxError),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme {
        /// The URL scheme that was rejected
        scheme: String,
        /// Reason the scheme was rejected
        reason: String,
    },

    /// Single request attempt timed out
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// The retry policy still wanted another attempt when the attempt cap was hit
    #[error("Giving up after {attempts} attempts, last status {status}")]
    RetriesExhausted {
        attempts: usize,
        status: http::StatusCode,
    },

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// HTTP non-2xx status, produced by [`Response::error_for_status`](crate::Response::error_for_status)
    #[error("HTTP {status}")]
    HttpStatus {
        status: http::StatusCode,
        content_type: Option<String>,
    },

    /// A before or after hook returned an error
    #[error("Request hook failed: {0}")]
    Hook(#[source] BoxError),

    /// The call context was cancelled
    #[error("{0}")]
    Cancelled(CancelReason),

    /// The request worker panicked
    #[error("Request worker panicked: {0}")]
    Panic(String),

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// XML parsing error
    #[error("XML parsing failed: {0}")]
    Xml(#[from] quick_xml::DeError),

    /// Response body is not valid UTF-8
    #[error("Response body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl HttpError {
    /// Returns the failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::OptionConfig(_) => ErrorKind::OptionConfig,
            HttpError::RequestBuild(_)
            | HttpError::RequestBody(_)
            | HttpError::InvalidUri { .. }
            | HttpError::InvalidScheme { .. } => ErrorKind::RequestBuild,
            HttpError::Timeout(_)
            | HttpError::Transport(_)
            | HttpError::Tls(_)
            | HttpError::RetriesExhausted { .. }
            | HttpError::BodyTooLarge { .. }
            | HttpError::HttpStatus { .. } => ErrorKind::Transport,
            HttpError::Hook(_) => ErrorKind::Hook,
            HttpError::Cancelled(_) => ErrorKind::Cancelled,
            HttpError::Panic(_) => ErrorKind::Panic,
            HttpError::Json(_) | HttpError::Xml(_) | HttpError::Utf8(_) => ErrorKind::Decode,
        }
    }

    /// Returns `true` if the call was stopped by its context.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HttpError::Cancelled(_))
    }

    /// Builds the error for a recovered worker panic payload.
    ///
    /// String payloads keep their message and an [`HttpError`] payload is
    /// returned as is. Any other error payload (a [`BoxError`] or an
    /// `std::io::Error`) comes back as [`HttpError::Transport`]. Anything else
    /// becomes [`UNKNOWN_PANIC_MESSAGE`].
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let payload = match payload.downcast::<&'static str>() {
            Ok(msg) => return HttpError::Panic((*msg).to_owned()),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<String>() {
            Ok(msg) => return HttpError::Panic(*msg),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<HttpError>() {
            Ok(err) => return *err,
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<BoxError>() {
            Ok(err) => return HttpError::Transport(*err),
            Err(payload) => payload,
        };
        match payload.downcast::<std::io::Error>() {
            Ok(err) => HttpError::Transport(err),
            Err(_) => HttpError::Panic(UNKNOWN_PANIC_MESSAGE.to_owned()),
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}
