//! Request descriptors and body types.

use crate::{CancelSignal, Error, Result};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// The payload of a request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// A JSON document, sent as `application/json`.
    Json(Value),
    /// URL-encoded form fields, sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    /// Raw bytes. No content type is set unless one is given here.
    Bytes {
        /// The payload.
        data: Bytes,
        /// The content type to send, if any.
        content_type: Option<String>,
    },
    /// A multipart form. The transport writes the content type with its boundary.
    Multipart(MultipartForm),
}

impl RequestBody {
    /// Serializes `value` into a JSON body.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(RequestBody::Json)
            .map_err(|e| Error::serialization(format!("Failed to serialize request: {e}")))
    }

    /// Returns `true` for bodies whose content type the transport must choose.
    pub fn is_binary(&self) -> bool {
        matches!(self, RequestBody::Bytes { .. } | RequestBody::Multipart(_))
    }
}

/// One field of a multipart form.
#[derive(Debug, Clone)]
pub struct MultipartPart {
    /// The form field name.
    pub name: String,
    /// The field content.
    pub data: Bytes,
    /// The file name, for file fields.
    pub filename: Option<String>,
    /// The MIME type, for file fields.
    pub mime: Option<String>,
}

/// A multipart form that can be replayed on every retry.
///
/// # Examples
///
/// ```
/// use compliance_client::MultipartForm;
///
/// let form = MultipartForm::new()
///     .text("document_type", "passport")
///     .file("file", "passport.pdf", b"%PDF-1.7".to_vec(), Some("application/pdf"));
/// assert_eq!(form.parts().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    parts: Vec<MultipartPart>,
}

impl MultipartForm {
    /// Creates an empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            data: Bytes::from(value.into()),
            filename: None,
            mime: None,
        });
        self
    }

    /// Adds a file field.
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Bytes>,
        mime: Option<&str>,
    ) -> Self {
        self.parts.push(MultipartPart {
            name: name.into(),
            data: data.into(),
            filename: Some(filename.into()),
            mime: mime.map(str::to_string),
        });
        self
    }

    /// The fields, in insertion order.
    pub fn parts(&self) -> &[MultipartPart] {
        &self.parts
    }
}

/// Everything needed to issue one logical request.
///
/// The client never modifies a descriptor it was given; request interceptors
/// work on a copy for every attempt.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// The HTTP method.
    pub method: Method,

    /// The request path, relative to the base URL. May include a query string.
    pub path: String,

    /// The request payload.
    pub body: Option<RequestBody>,

    /// Additional headers for this request.
    pub headers: HeaderMap,

    /// Overrides the client's default timeout for each attempt.
    pub timeout: Option<Duration>,

    /// Caller-controlled cancellation.
    pub signal: Option<CancelSignal>,

    /// Make a single attempt regardless of the retry policy.
    pub skip_retry: bool,

    /// Overrides the client's deduplication setting. Only GET requests are
    /// ever deduplicated.
    pub dedupe: Option<bool>,
}

impl RequestDescriptor {
    /// Creates a descriptor with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
            signal: None,
            skip_retry: false,
            dedupe: None,
        }
    }

    /// Shorthand for a GET descriptor.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::configuration(format!("Invalid header name: {e}")))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::configuration(format!("Invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Sets the body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a JSON body serialized from `value`.
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        Ok(self.with_body(RequestBody::json(value)?))
    }

    /// Overrides the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a caller-controlled cancellation signal.
    pub fn with_signal(mut self, signal: CancelSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Disables retries for this request.
    pub fn skip_retry(mut self) -> Self {
        self.skip_retry = true;
        self
    }

    /// Enables or disables deduplication for this request.
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = Some(dedupe);
        self
    }

    /// Appends a query string built by [`build_query`](crate::query::build_query).
    pub fn with_query<I, K>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.path = crate::query::with_query(&self.path, params);
        self
    }

    /// The canonical key used to collapse concurrent identical reads.
    ///
    /// `METHOD:path` for GET; `None` for every other method.
    pub fn dedup_key(&self) -> Option<String> {
        (self.method == Method::GET).then(|| format!("{}:{}", self.method, self.path))
    }
}

impl Default for RequestDescriptor {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}
