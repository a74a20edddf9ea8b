//! # compliance-client - the request client behind the compliance admin console
//!
//! Every call the console makes to its backend (applicants, documents,
//! screening, questionnaires, share tokens) goes through one [`Client`]. The
//! client attaches the session's bearer token, enforces a timeout, composes
//! that timeout with caller cancellation, retries transient failures with
//! exponential backoff, honors `Retry-After` on 429, collapses concurrent
//! identical GETs into one network call, and turns every failure into one
//! structured [`Error`] with a message fit for display.
//!
//! ## Quick Start
//!
//! ```no_run
//! use compliance_client::{auth::StaticToken, Client};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Applicant {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), compliance_client::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com/api/v1")?
//!         .token_provider(StaticToken::new("session-token"))
//!         .build()?;
//!
//!     let applicant = client.get::<Applicant>("/applicants/123").await?;
//!     println!("Applicant: {}", applicant.data.id);
//!     println!("Request took {:?}", applicant.latency);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! ```no_run
//! use compliance_client::{Client, ErrorKind};
//!
//! # async fn example(client: Client) {
//! match client.get::<serde_json::Value>("/applicants/123").await {
//!     Ok(response) => println!("Applicant: {}", response.data),
//!     Err(e) if e.kind() == ErrorKind::Validation => eprintln!("Fix the form: {}", e),
//!     Err(e) if e.is_network_error() => eprintln!("Connection problem: {}", e),
//!     Err(e) => eprintln!("Request failed ({}): {}", e.status(), e),
//! }
//! # }
//! ```
//!
//! ## Retries
//!
//! Network errors and 5xx responses are retried up to three times with
//! delays of 1, 2 and 4 seconds. A 429 with `Retry-After` waits for the hinted
//! duration, capped at 60 seconds. Other 4xx responses, timeouts and
//! cancellations are never retried. See [`RetryPolicy`].

pub mod auth;
pub mod cancel;
pub mod classify;
mod client;
pub mod connectivity;
mod error;
pub mod inflight;
pub mod interceptor;
pub mod query;
pub mod rate_limit;
mod request;
mod response;
pub mod retry;
pub mod transport;

pub use cancel::{CancelReason, CancelSignal, ComposedSignal};
pub use client::{Client, ClientBuilder, DEFAULT_LOGIN_PATH, DEFAULT_TIMEOUT};
pub use error::{Error, ErrorKind, Result};
pub use interceptor::{InterceptorHandle, RequestInterceptor, ResponseInterceptor};
pub use request::{MultipartForm, MultipartPart, RequestBody, RequestDescriptor};
pub use response::{Blob, Response, ResponseParts};
pub use retry::{RetryDecision, RetryPolicy};
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
