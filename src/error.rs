//! Error types for backend API calls.
//!
//! Every failed request surfaces as a single structured [`Error`]. It carries
//! the HTTP status (0 when no response was received), the raw response payload,
//! the correlation id of the failing attempt and a human-readable message that
//! can be shown to an operator as-is.

use serde_json::Value;
use std::time::{Duration, SystemTime};

/// Classification of a failed request.
///
/// The variants map onto the status buckets the backend uses. `Offline`,
/// `Network`, `TimedOut` and `Cancelled` all mean that no response was
/// received and are reported with status 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The connectivity probe reported the host as offline; nothing was sent.
    Offline,
    /// The transport failed before a response arrived (DNS, connect, reset).
    Network,
    /// The per-request deadline elapsed.
    TimedOut,
    /// The caller's cancellation signal fired.
    Cancelled,
    /// 401. Triggers the unauthorized handler.
    Unauthorized,
    /// 403.
    Forbidden,
    /// 404.
    NotFound,
    /// 422. The message is a field-by-field summary of the validation errors.
    Validation,
    /// 429. Retried automatically when the server supplies `Retry-After`.
    RateLimited,
    /// 5xx.
    Server,
    /// Any other non-2xx status.
    Http,
    /// A successful response whose body could not be decoded.
    Decode,
    /// The request body could not be serialized.
    Serialization,
    /// Invalid client or request configuration (base URL, header values).
    Configuration,
}

impl ErrorKind {
    /// Maps a non-success HTTP status onto its error kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            422 => ErrorKind::Validation,
            429 => ErrorKind::RateLimited,
            500.. => ErrorKind::Server,
            _ => ErrorKind::Http,
        }
    }

    /// Returns `true` for kinds that mean no response reached the client.
    pub fn is_network(self) -> bool {
        matches!(
            self,
            ErrorKind::Offline | ErrorKind::Network | ErrorKind::TimedOut | ErrorKind::Cancelled
        )
    }
}

/// The error returned by every failed request.
///
/// An `Error` is built once at the failure site and never changed afterwards.
/// It is `Clone` so that a single failure can be handed to every caller that
/// joined a deduplicated request.
///
/// # Examples
///
/// ```
/// use compliance_client::{Error, ErrorKind};
///
/// let err = Error::from_status(503, "Server error. Please try again later.", None, None);
/// assert_eq!(err.kind(), ErrorKind::Server);
/// assert!(err.is_server_error());
/// assert!(err.is_retryable());
///
/// let err = Error::from_status(404, "Applicant not found", None, None);
/// assert!(err.is_client_error());
/// assert!(!err.is_retryable());
/// ```
#[derive(thiserror::Error, Debug, Clone)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    status: u16,
    data: Option<Value>,
    request_id: Option<String>,
    retry_after: Option<Duration>,
    timestamp: SystemTime,
}

impl Error {
    /// Creates an error of the given kind.
    ///
    /// Network kinds are always recorded with status 0.
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        let status = if kind.is_network() { 0 } else { status };
        Self {
            kind,
            message: message.into(),
            status,
            data: None,
            request_id: None,
            retry_after: None,
            timestamp: SystemTime::now(),
        }
    }

    /// Creates an error for a non-2xx response.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        data: Option<Value>,
        request_id: Option<String>,
    ) -> Self {
        let mut err = Self::new(ErrorKind::from_status(status), status, message);
        err.data = data;
        err.request_id = request_id;
        err
    }

    /// The host is offline; no request was attempted.
    pub fn offline() -> Self {
        Self::new(
            ErrorKind::Offline,
            0,
            "No internet connection. Check your network and try again.",
        )
    }

    /// The transport failed before a response was received.
    pub fn network(message: impl Into<String>, request_id: Option<String>) -> Self {
        let mut err = Self::new(ErrorKind::Network, 0, message);
        err.request_id = request_id;
        err
    }

    /// The request was aborted by its deadline (`timed_out`) or by the caller.
    pub fn cancelled(timed_out: bool, request_id: Option<String>) -> Self {
        let kind = if timed_out {
            ErrorKind::TimedOut
        } else {
            ErrorKind::Cancelled
        };
        let mut err = Self::new(kind, 0, "request cancelled/timed out");
        err.request_id = request_id;
        err
    }

    /// A successful response that did not hold the expected payload.
    pub fn decode(
        status: u16,
        message: impl Into<String>,
        data: Option<Value>,
        request_id: Option<String>,
    ) -> Self {
        let mut err = Self::new(ErrorKind::Decode, status, message);
        err.data = data;
        err.request_id = request_id;
        err
    }

    /// The request body could not be encoded.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, 0, message)
    }

    /// Invalid configuration was provided.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, 0, message)
    }

    pub(crate) fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message, suitable for direct display.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The HTTP status code, or 0 if no response was received.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The raw response payload, if a response was received.
    ///
    /// JSON bodies are kept as parsed JSON; anything else is kept as a JSON string.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// The correlation id of the failing attempt.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// The server-supplied retry hint of a 429 response.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// When the error was constructed.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Returns `true` if no response was received (status 0 and a network kind).
    pub fn is_network_error(&self) -> bool {
        self.status == 0 && self.kind.is_network()
    }

    /// Returns `true` for 5xx responses.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Returns `true` for 4xx responses.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Returns `true` if this error is potentially retryable.
    ///
    /// Network errors and 5xx responses are retryable. Whether a retry
    /// actually happens is decided by [`RetryPolicy`](crate::RetryPolicy),
    /// which never retries cancellations or timeouts.
    pub fn is_retryable(&self) -> bool {
        self.is_network_error() || self.is_server_error()
    }

    /// Returns `true` if the request was aborted by a deadline or by the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::TimedOut)
    }
}

/// A specialized `Result` type for backend API calls.
pub type Result<T> = std::result::Result<T, Error>;
