//! Successful response types.
//!
//! [`Response`] wraps the decoded payload together with the HTTP details of
//! the attempt that produced it. [`Blob`] is the result of a binary download.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// Status line and headers of a received response.
///
/// Passed to response interceptors alongside the parsed payload.
#[derive(Debug, Clone)]
pub struct ResponseParts {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The correlation id: the server's `X-Request-ID` if echoed, else the one sent.
    pub request_id: Option<String>,
}

/// A successful response.
///
/// # Examples
///
/// ```no_run
/// use compliance_client::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Applicant {
///     id: String,
/// }
///
/// # async fn example() -> Result<(), compliance_client::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let response = client.get::<Applicant>("/applicants/123").await?;
/// println!("Applicant {} ({:?})", response.data.id, response.latency);
/// println!("Attempts: {}", response.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The decoded payload.
    pub data: T,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The correlation id of the successful attempt.
    pub request_id: Option<String>,

    /// The total latency, including every retry and backoff delay.
    pub latency: Duration,

    /// The number of attempts made. `1` when the first attempt succeeded.
    pub attempts: usize,
}

impl<T> Response<T> {
    /// Creates a new `Response`.
    pub fn new(data: T, parts: ResponseParts, latency: Duration, attempts: usize) -> Self {
        Self {
            data,
            status: parts.status,
            headers: parts.headers,
            request_id: parts.request_id,
            latency,
            attempts,
        }
    }

    /// Maps the payload while preserving the metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// # use compliance_client::{Response, ResponseParts};
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let parts = ResponseParts {
    ///     status: StatusCode::OK,
    ///     headers: HeaderMap::new(),
    ///     request_id: None,
    /// };
    /// let response = Response::new(42, parts, Duration::from_millis(100), 1);
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            status: self.status,
            headers: self.headers,
            request_id: self.request_id,
            latency: self.latency,
            attempts: self.attempts,
        }
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Consumes the response, returning the payload.
    pub fn into_data(self) -> T {
        self.data
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// A downloaded binary payload, such as a document or an export.
#[derive(Debug, Clone)]
pub struct Blob {
    /// The raw bytes.
    pub bytes: Bytes,
    /// The `Content-Type` of the response.
    pub content_type: Option<String>,
    /// The file name from `Content-Disposition`, if the server sent one.
    pub filename: Option<String>,
}

impl Blob {
    pub(crate) fn from_parts(bytes: Bytes, headers: &HeaderMap) -> Self {
        let header = |name: http::header::HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let filename = header(http::header::CONTENT_DISPOSITION)
            .as_deref()
            .and_then(parse_filename);
        Self {
            bytes,
            content_type: header(http::header::CONTENT_TYPE),
            filename,
        }
    }

    /// The payload size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Extracts the file name from a `Content-Disposition` value.
///
/// Prefers `filename*=UTF-8''...` when present.
fn parse_filename(disposition: &str) -> Option<String> {
    let mut plain = None;
    for param in disposition.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = value.trim().rsplit("''").next().unwrap_or_default();
                let query = format!("f={encoded}");
                let decoded: String = url::form_urlencoded::parse(query.as_bytes())
                    .map(|(_, v)| v.into_owned())
                    .next()
                    .unwrap_or_default();
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
            "filename" => {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    plain = Some(value.to_string());
                }
            }
            _ => {}
        }
    }
    plain
}
