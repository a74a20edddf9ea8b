//! The network transport used by the client.
//!
//! The client only needs "send this request, give me the status, headers and
//! body". Cancellation is expressed by dropping the future returned from
//! [`Transport::send`], which aborts the in-flight exchange.

use crate::{Error, RequestBody, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// A fully prepared request, ready to go on the wire.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// The HTTP method.
    pub method: Method,
    /// The absolute URL.
    pub url: Url,
    /// All headers, including authorization and correlation id.
    pub headers: HeaderMap,
    /// The payload.
    pub body: Option<RequestBody>,
}

/// A received response with its body fully read.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The raw body.
    pub body: Bytes,
}

/// A failure before a complete response was received.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError(e.to_string())
    }
}

/// Sends HTTP requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and reads the whole response.
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

/// The default transport, backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with its own connection pool.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            Error::configuration(format!("Failed to build HTTP client: {e}"))
        })?;
        Ok(Self { client })
    }

    /// Wraps an existing `reqwest::Client`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn multipart_form(
    form: &crate::MultipartForm,
) -> std::result::Result<reqwest::multipart::Form, TransportError> {
    let mut out = reqwest::multipart::Form::new();
    for part in form.parts() {
        let mut field = reqwest::multipart::Part::bytes(part.data.to_vec());
        if let Some(filename) = &part.filename {
            field = field.file_name(filename.clone());
        }
        if let Some(mime) = &part.mime {
            field = field.mime_str(mime)?;
        }
        out = out.part(part.name.clone(), field);
    }
    Ok(out)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        builder = match request.body {
            None => builder,
            Some(RequestBody::Json(value)) => builder.body(
                serde_json::to_vec(&value).map_err(|e| TransportError(e.to_string()))?,
            ),
            Some(RequestBody::Form(fields)) => builder.form(&fields),
            Some(RequestBody::Bytes { data, .. }) => builder.body(data),
            Some(RequestBody::Multipart(form)) => builder.multipart(multipart_form(&form)?),
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
