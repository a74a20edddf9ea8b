//! Authentication collaborators.
//!
//! The client does not manage sessions. It asks a [`TokenProvider`] for a
//! bearer token before every attempt and notifies an [`UnauthorizedHandler`]
//! when the backend answers 401, so the application can send the user back to
//! its login entry point.

use crate::Error;
use async_trait::async_trait;

/// Supplies bearer tokens for outgoing requests.
///
/// The client calls [`token`](TokenProvider::token) once per attempt and never
/// caches the result; refresh and expiry are the provider's concern. Returning
/// `None` sends the request without an `Authorization` header.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use compliance_client::auth::TokenProvider;
///
/// struct SessionTokens;
///
/// #[async_trait]
/// impl TokenProvider for SessionTokens {
///     async fn token(&self) -> Option<String> {
///         Some("session-token".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current bearer token, if a session exists.
    async fn token(&self) -> Option<String>;
}

/// A provider that never supplies a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

#[async_trait]
impl TokenProvider for NoToken {
    async fn token(&self) -> Option<String> {
        None
    }
}

/// A provider that always returns the same token.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Creates a provider for a fixed token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").field("token", &"<redacted>").finish()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Reacts to a 401 response.
///
/// Called once per surfaced 401 with the configured login path, before the
/// error is returned to the caller.
pub trait UnauthorizedHandler: Send + Sync {
    /// Sends the application to its login entry point.
    fn on_unauthorized(&self, login_path: &str, error: &Error);
}

/// The default handler: records the redirect in the log and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogUnauthorized;

impl UnauthorizedHandler for LogUnauthorized {
    fn on_unauthorized(&self, login_path: &str, error: &Error) {
        tracing::warn!(
            login_path = %login_path,
            request_id = ?error.request_id(),
            "Session rejected - redirecting to login"
        );
    }
}

impl<F> UnauthorizedHandler for F
where
    F: Fn(&str, &Error) + Send + Sync,
{
    fn on_unauthorized(&self, login_path: &str, error: &Error) {
        self(login_path, error)
    }
}
