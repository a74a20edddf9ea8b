//! Classification of attempt outcomes.
//!
//! Every attempt ends in exactly one [`Outcome`]. `Retry` loops back to a new
//! attempt; the other three end the logical request.

use crate::cancel::CancelReason;
use crate::rate_limit::RateLimitInfo;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::{TransportError, TransportResponse};
use crate::{Error, ResponseParts};
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// The correlation-id header sent with every attempt.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// How an attempt ended before classification.
#[derive(Debug)]
pub enum AttemptResult {
    /// A response was received.
    Response(TransportResponse),
    /// The transport failed.
    Transport(TransportError),
    /// The composed signal fired.
    Cancelled(CancelReason),
    /// A local step (token, interceptor, body encoding) failed.
    Local(Error),
}

/// The classified outcome of one attempt.
#[derive(Debug)]
pub enum Outcome {
    /// 2xx. 204 and empty bodies decode to `Value::Null`.
    Success {
        /// Status line and headers.
        parts: ResponseParts,
        /// The parsed JSON body.
        data: Value,
    },
    /// A retryable failure with retries left.
    Retry {
        /// The failure being retried.
        error: Error,
        /// How long to wait before the next attempt.
        delay: Duration,
    },
    /// A failure that ends the request.
    TerminalFailure(Error),
    /// Timed out or cancelled by the caller. Never retried.
    Cancelled(Error),
}

impl Outcome {
    /// Classifies `result`, the outcome of attempt number `attempt`.
    pub fn classify(
        result: AttemptResult,
        attempt: usize,
        policy: &RetryPolicy,
        sent_request_id: &str,
    ) -> Self {
        let error = match result {
            AttemptResult::Response(response) if response.status.is_success() => {
                return match success_payload(&response, sent_request_id) {
                    Ok(data) => Outcome::Success {
                        parts: response_parts(&response, sent_request_id),
                        data,
                    },
                    Err(error) => Outcome::TerminalFailure(error),
                };
            }
            AttemptResult::Response(response) => error_from_response(&response, sent_request_id),
            AttemptResult::Transport(e) => transport_failure(&e, sent_request_id),
            AttemptResult::Cancelled(reason) => {
                return Outcome::Cancelled(Error::cancelled(
                    reason == CancelReason::TimedOut,
                    Some(sent_request_id.to_string()),
                ));
            }
            AttemptResult::Local(error) => error,
        };

        match policy.decide(attempt, &error) {
            RetryDecision::Retry(delay) => Outcome::Retry { error, delay },
            RetryDecision::Surface => Outcome::TerminalFailure(error),
        }
    }
}

/// The network error for a transport failure.
pub fn transport_failure(error: &TransportError, sent_request_id: &str) -> Error {
    tracing::warn!(error = %error, request_id = %sent_request_id, "Transport failure");
    Error::network(
        format!("Network error: {error}"),
        Some(sent_request_id.to_string()),
    )
}

/// The server's correlation id if echoed, otherwise the one that was sent.
pub fn response_request_id(headers: &HeaderMap, sent_request_id: &str) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or(sent_request_id)
        .to_string()
}

pub(crate) fn response_parts(
    response: &TransportResponse,
    sent_request_id: &str,
) -> ResponseParts {
    ResponseParts {
        status: response.status,
        headers: response.headers.clone(),
        request_id: Some(response_request_id(&response.headers, sent_request_id)),
    }
}

fn success_payload(response: &TransportResponse, sent_request_id: &str) -> Result<Value, Error> {
    let blank = response.body.iter().all(u8::is_ascii_whitespace);
    if response.status == StatusCode::NO_CONTENT || blank {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&response.body).map_err(|e| {
        tracing::error!(
            error = %e,
            status = response.status.as_u16(),
            "Failed to decode response body"
        );
        Error::decode(
            response.status.as_u16(),
            format!("Unexpected response from server: {e}"),
            Some(raw_payload(&response.body)),
            Some(response_request_id(&response.headers, sent_request_id)),
        )
    })
}

/// Builds the structured error for a non-2xx response.
pub fn error_from_response(response: &TransportResponse, sent_request_id: &str) -> Error {
    let status = response.status.as_u16();
    let data = (!response.body.is_empty()).then(|| raw_payload(&response.body));
    let message = humanize(status, data.as_ref());
    let request_id = response_request_id(&response.headers, sent_request_id);

    if response.status.is_client_error() {
        tracing::error!(
            status,
            request_id = %request_id,
            message = %message,
            "Client error (4xx)"
        );
    } else {
        tracing::warn!(status, request_id = %request_id, message = %message, "Server error");
    }

    let retry_after = (status == 429)
        .then(|| RateLimitInfo::from_headers(&response.headers).retry_after)
        .flatten();

    Error::from_status(status, message, data, Some(request_id)).with_retry_after(retry_after)
}

/// Parsed JSON when possible, otherwise the body text as a JSON string.
fn raw_payload(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Derives a displayable message from an error response body.
///
/// A `detail` string is used as-is; a 422 `detail` list of `{loc, msg}`
/// entries is joined into one line; otherwise a message per status bucket.
pub fn humanize(status: u16, data: Option<&Value>) -> String {
    let detail = data.and_then(|data| data.get("detail"));

    match detail {
        Some(Value::String(detail)) if !detail.is_empty() => return detail.clone(),
        Some(Value::Array(entries)) => {
            if let Some(summary) = validation_summary(entries) {
                return summary;
            }
        }
        Some(Value::Object(object)) => {
            let message = object.get("message").or_else(|| object.get("msg"));
            if let Some(Value::String(message)) = message {
                return message.clone();
            }
        }
        _ => {}
    }

    if let Some(Value::String(message)) = data.and_then(|data| data.get("message")) {
        if !message.is_empty() {
            return message.clone();
        }
    }

    default_message(status)
}

/// Joins `[{loc, msg}]` validation entries into `"field: msg, field: msg"`.
///
/// The leading location segment (`body`, `query`, `path`, `header`) is
/// dropped and the rest of `loc` is joined with dots.
pub fn validation_summary(entries: &[Value]) -> Option<String> {
    let parts: Vec<String> = entries
        .iter()
        .filter_map(|entry| {
            let msg = entry.get("msg").and_then(Value::as_str)?;
            let loc: Vec<String> = entry
                .get("loc")
                .and_then(Value::as_array)
                .map(|loc| {
                    loc.iter()
                        .map(|segment| match segment {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let field = match loc.split_first() {
                Some((first, rest))
                    if !rest.is_empty()
                        && matches!(first.as_str(), "body" | "query" | "path" | "header") =>
                {
                    rest.join(".")
                }
                _ => loc.join("."),
            };

            Some(if field.is_empty() {
                msg.to_string()
            } else {
                format!("{field}: {msg}")
            })
        })
        .collect();

    (!parts.is_empty()).then(|| parts.join(", "))
}

fn default_message(status: u16) -> String {
    match status {
        400 => "The request was invalid.".to_string(),
        401 => "Your session has expired. Please sign in again.".to_string(),
        403 => "You do not have permission to perform this action.".to_string(),
        404 => "The requested resource was not found.".to_string(),
        422 => "The submitted data is invalid.".to_string(),
        429 => "Too many requests. Please try again later.".to_string(),
        500.. => "Server error. Please try again later.".to_string(),
        _ => format!("Request failed with status {status}."),
    }
}
