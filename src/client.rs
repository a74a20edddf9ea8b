//! The request executor and its builder.
//!
//! [`Client`] is the single funnel for backend calls. One logical request runs
//! as follows: connectivity check, deduplication lookup (GET only), then an
//! attempt loop of token fetch, request interceptors, network call bounded by
//! a [`ComposedSignal`], classification, and either a backoff delay or a
//! terminal result. Use [`ClientBuilder`] to configure and create clients.

use crate::{
    auth::{LogUnauthorized, NoToken, TokenProvider, UnauthorizedHandler},
    cancel::ComposedSignal,
    classify::{self, AttemptResult, Outcome, REQUEST_ID_HEADER},
    connectivity::{AlwaysOnline, ConnectivityProbe},
    inflight::{InFlightRegistry, Registration},
    interceptor::{InterceptorHandle, Interceptors, RequestInterceptor, ResponseInterceptor},
    retry::{AttemptState, RetryPolicy},
    transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse},
    Blob, Error, MultipartForm, RequestBody, RequestDescriptor, Response, Result,
};
use futures::FutureExt;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default login entry point handed to the unauthorized handler.
pub const DEFAULT_LOGIN_PATH: &str = "/sign-in";

/// An HTTP client for the compliance backend.
///
/// The client is cheap to clone; clones share configuration, interceptors and
/// the in-flight registry. Independent clients never share deduplication state.
///
/// # Examples
///
/// ```no_run
/// use compliance_client::{auth::StaticToken, Client, Response};
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct NewApplicant {
///     email: String,
/// }
///
/// #[derive(Deserialize)]
/// struct Applicant {
///     id: String,
/// }
///
/// # async fn example() -> Result<(), compliance_client::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com/api/v1")?
///     .token_provider(StaticToken::new("session-token"))
///     .timeout(Duration::from_secs(30))
///     .build()?;
///
/// let applicant: Response<Applicant> = client.get("/applicants/123").await?;
/// println!("Applicant: {}", applicant.data.id);
///
/// let created: Response<Applicant> = client
///     .post("/applicants", &NewApplicant { email: "jane@example.com".into() })
///     .await?;
/// println!("Created applicant {}", created.data.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    base_url: Url,
    default_headers: HeaderMap,
    token_provider: Arc<dyn TokenProvider>,
    connectivity: Arc<dyn ConnectivityProbe>,
    unauthorized: Arc<dyn UnauthorizedHandler>,
    login_path: String,
    retry_policy: RetryPolicy,
    timeout: Duration,
    dedupe: bool,
    interceptors: Interceptors,
    in_flight: InFlightRegistry<Result<Response<Value>>>,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Executes one logical request and returns the JSON payload.
    ///
    /// Concurrent GETs for the same path share a single attempt sequence and
    /// all receive the same result. A shared sequence observes the
    /// cancellation signal and timeout of the caller that started it.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<Response<Value>> {
        if !self.inner.connectivity.is_online() {
            tracing::warn!(
                method = %request.method,
                path = %request.path,
                "Host is offline - request not sent"
            );
            return Err(Error::offline());
        }

        let dedupe = request.dedupe.unwrap_or(self.inner.dedupe);
        let key = match request.dedup_key() {
            Some(key) if dedupe => key,
            _ => return self.run(request).await,
        };

        let (pending, registration) = self.inner.in_flight.join_or_start(&key, || {
            let client = self.clone();
            let key = key.clone();
            let task = tokio::spawn(async move {
                let _entry = InFlightEntry {
                    client: client.clone(),
                    key,
                };
                client.run(request).await
            });
            async move {
                task.await.unwrap_or_else(|e| {
                    Err(Error::network(format!("Request task failed: {e}"), None))
                })
            }
            .boxed()
        });

        if registration == Registration::Joined {
            tracing::debug!(key = %key, "Joining in-flight request");
        }
        pending.await
    }

    /// Executes a request and decodes the payload into `Res`.
    pub async fn request<Res>(&self, request: RequestDescriptor) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let response = self.execute(request).await?;
        decode(response)
    }

    /// Runs the attempt loop for one logical request.
    async fn run(&self, request: RequestDescriptor) -> Result<Response<Value>> {
        let start_time = Instant::now();
        let policy = if request.skip_retry {
            RetryPolicy::none()
        } else {
            self.inner.retry_policy.clone()
        };
        let mut state = AttemptState::new();

        loop {
            let request_id = uuid::Uuid::new_v4().to_string();
            let result = self.attempt(&request, &request_id, state.attempt).await;

            match Outcome::classify(result, state.attempt, &policy, &request_id) {
                Outcome::Success { parts, data } => {
                    let latency = start_time.elapsed();
                    tracing::info!(
                        status = parts.status.as_u16(),
                        latency_ms = latency.as_millis(),
                        attempts = state.attempt,
                        "Received HTTP response"
                    );
                    let data = self.inner.interceptors.apply_response(&parts, data).await?;
                    return Ok(Response::new(data, parts, latency, state.attempt));
                }
                Outcome::Retry { error, delay } => {
                    tracing::warn!(
                        error = %error,
                        status = error.status(),
                        attempt = state.attempt,
                        method = %request.method,
                        path = %request.path,
                        "Request failed"
                    );
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        attempt = state.attempt,
                        "Retrying request after delay"
                    );
                    if let Some(signal) = &request.signal {
                        tokio::select! {
                            _ = signal.cancelled() => {
                                let request_id = error.request_id().map(str::to_string);
                                return Err(Error::cancelled(false, request_id));
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                    state.schedule_retry(error, delay);
                }
                Outcome::TerminalFailure(error) => return Err(self.surface(error, &state)),
                Outcome::Cancelled(error) => {
                    tracing::warn!(
                        kind = ?error.kind(),
                        attempt = state.attempt,
                        method = %request.method,
                        path = %request.path,
                        "Request cancelled"
                    );
                    return Err(error);
                }
            }
        }
    }

    /// Makes one attempt, bounded by the composed cancellation signal.
    async fn attempt(
        &self,
        request: &RequestDescriptor,
        request_id: &str,
        attempt: usize,
    ) -> AttemptResult {
        let timeout = request.timeout.unwrap_or(self.inner.timeout);
        let mut signal = ComposedSignal::new(request.signal.as_ref(), timeout);

        let result = tokio::select! {
            biased;
            reason = signal.fired() => AttemptResult::Cancelled(reason),
            result = self.send_once(request.clone(), request_id, attempt) => result,
        };

        signal.release();
        result
    }

    async fn send_once(
        &self,
        request: RequestDescriptor,
        request_id: &str,
        attempt: usize,
    ) -> AttemptResult {
        let token = self.inner.token_provider.token().await;

        let request = match self.inner.interceptors.apply_request(request).await {
            Ok(request) => request,
            Err(e) => return AttemptResult::Local(e),
        };

        let transport_request = match self.prepare(request, token, request_id) {
            Ok(prepared) => prepared,
            Err(e) => return AttemptResult::Local(e),
        };

        tracing::debug!(
            method = %transport_request.method,
            url = %transport_request.url,
            attempt = attempt,
            request_id = %request_id,
            "Executing HTTP request"
        );

        match self.inner.transport.send(transport_request).await {
            Ok(response) => AttemptResult::Response(response),
            Err(e) => AttemptResult::Transport(e),
        }
    }

    /// Builds the wire request: URL, auth, correlation id and content type.
    fn prepare(
        &self,
        request: RequestDescriptor,
        token: Option<String>,
        request_id: &str,
    ) -> Result<TransportRequest> {
        let url = self.url_for(&request.path)?;
        let mut headers = self.inner.default_headers.clone();

        if let Some(token) = token {
            let mut value = HeaderValue::try_from(format!("Bearer {token}"))
                .map_err(|e| Error::configuration(format!("Invalid bearer token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let request_id = HeaderValue::try_from(request_id)
            .map_err(|e| Error::configuration(format!("Invalid request id: {e}")))?;
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), request_id);

        match &request.body {
            Some(RequestBody::Bytes {
                content_type: Some(content_type),
                ..
            }) => {
                let value = HeaderValue::try_from(content_type.as_str())
                    .map_err(|e| Error::configuration(format!("Invalid content type: {e}")))?;
                headers.insert(header::CONTENT_TYPE, value);
            }
            Some(RequestBody::Form(_)) => {}
            Some(body) if body.is_binary() => {}
            _ => {
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
        }

        headers.extend(request.headers);

        // The transport writes the boundary.
        if matches!(request.body, Some(RequestBody::Multipart(_))) {
            headers.remove(header::CONTENT_TYPE);
        }

        Ok(TransportRequest {
            method: request.method,
            url,
            headers,
            body: request.body,
        })
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let base = self.inner.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| Error::configuration(format!("Invalid URL for path '{path}': {e}")))
    }

    /// Logs a terminal failure and runs the 401 side effect.
    fn surface(&self, error: Error, state: &AttemptState) -> Error {
        tracing::warn!(
            error = %error,
            status = error.status(),
            attempts = state.attempt,
            waited_ms = state.total_delay().as_millis(),
            "Request failed permanently"
        );
        if error.kind() == crate::ErrorKind::Unauthorized {
            self.inner
                .unauthorized
                .on_unauthorized(&self.inner.login_path, &error);
        }
        error
    }

    /// Single attempt without JSON parsing, retry, deduplication or response interceptors.
    async fn fetch_raw(&self, request: RequestDescriptor) -> Result<TransportResponse> {
        if !self.inner.connectivity.is_online() {
            tracing::warn!(path = %request.path, "Host is offline - download not started");
            return Err(Error::offline());
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let state = AttemptState::new();
        match self.attempt(&request, &request_id, state.attempt).await {
            AttemptResult::Response(response) if response.status.is_success() => Ok(response),
            AttemptResult::Response(response) => Err(self.surface(
                classify::error_from_response(&response, &request_id),
                &state,
            )),
            AttemptResult::Transport(e) => Err(self.surface(
                classify::transport_failure(&e, &request_id),
                &state,
            )),
            AttemptResult::Cancelled(reason) => Err(Error::cancelled(
                reason == crate::CancelReason::TimedOut,
                Some(request_id),
            )),
            AttemptResult::Local(e) => Err(self.surface(e, &state)),
        }
    }

    /// Downloads a binary payload, such as a document or an export.
    ///
    /// Shares token acquisition, request interceptors, timeout and
    /// cancellation with the JSON path, but is never retried or deduplicated.
    pub async fn request_blob(&self, request: RequestDescriptor) -> Result<Blob> {
        let response = self.fetch_raw(request).await?;
        Ok(Blob::from_parts(response.body, &response.headers))
    }

    /// Fetches a payload as text, such as a CSV export.
    pub async fn request_text(&self, request: RequestDescriptor) -> Result<String> {
        let response = self.fetch_raw(request).await?;
        String::from_utf8(response.body.to_vec()).map_err(|e| {
            Error::decode(
                response.status.as_u16(),
                format!("Response is not valid UTF-8: {e}"),
                None,
                None,
            )
        })
    }

    /// Makes a GET request to the specified path.
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.request(RequestDescriptor::new(Method::GET, path)).await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let request = RequestDescriptor::new(Method::POST, path).with_json(body)?;
        self.request(request).await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let request = RequestDescriptor::new(Method::PUT, path).with_json(body)?;
        self.request(request).await
    }

    /// Makes a PATCH request with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let request = RequestDescriptor::new(Method::PATCH, path).with_json(body)?;
        self.request(request).await
    }

    /// Makes a DELETE request.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.request(RequestDescriptor::new(Method::DELETE, path)).await
    }

    /// Uploads a multipart form with POST.
    pub async fn upload<Res>(
        &self,
        path: impl Into<String>,
        form: MultipartForm,
    ) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.request(
            RequestDescriptor::new(Method::POST, path).with_body(RequestBody::Multipart(form)),
        )
        .await
    }

    /// Appends a request interceptor. The handle unregisters it.
    pub fn add_request_interceptor<I>(&self, interceptor: I) -> InterceptorHandle
    where
        I: RequestInterceptor + 'static,
    {
        self.inner.interceptors.add_request(Arc::new(interceptor))
    }

    /// Appends a response interceptor. The handle unregisters it.
    pub fn add_response_interceptor<I>(&self, interceptor: I) -> InterceptorHandle
    where
        I: ResponseInterceptor + 'static,
    {
        self.inner.interceptors.add_response(Arc::new(interceptor))
    }

    /// Number of deduplicated reads currently in flight.
    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// The base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("timeout", &self.inner.timeout)
            .field("retry_policy", &self.inner.retry_policy)
            .field("dedupe", &self.inner.dedupe)
            .finish_non_exhaustive()
    }
}

/// Clears a deduplicated key when the task that owns it ends, including by
/// panic or abort.
struct InFlightEntry {
    client: Client,
    key: String,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        self.client.inner.in_flight.remove(&self.key);
    }
}

fn decode<Res: DeserializeOwned>(response: Response<Value>) -> Result<Response<Res>> {
    let decoded = Res::deserialize(&response.data);
    match decoded {
        Ok(data) => Ok(response.map(|_| data)),
        Err(e) => {
            tracing::error!(
                error = %e,
                status = response.status.as_u16(),
                "Failed to deserialize response"
            );
            Err(Error::decode(
                response.status.as_u16(),
                format!("Unexpected response from server: {e}"),
                Some(response.data),
                response.request_id,
            ))
        }
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use compliance_client::{auth::StaticToken, ClientBuilder, RetryPolicy};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), compliance_client::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com/api/v1")?
///     .timeout(Duration::from_secs(15))
///     .retry_policy(RetryPolicy::default().with_max_retries(5))
///     .token_provider(StaticToken::new("session-token"))
///     .default_header("User-Agent", "compliance-admin/1.0")?
///     .login_path("/login")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    transport: Option<Arc<dyn Transport>>,
    token_provider: Arc<dyn TokenProvider>,
    connectivity: Arc<dyn ConnectivityProbe>,
    unauthorized: Arc<dyn UnauthorizedHandler>,
    login_path: String,
    retry_policy: RetryPolicy,
    timeout: Duration,
    dedupe: bool,
    request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    response_interceptors: Vec<Arc<dyn ResponseInterceptor>>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            transport: None,
            token_provider: Arc::new(NoToken),
            connectivity: Arc::new(AlwaysOnline),
            unauthorized: Arc::new(LogUnauthorized),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            retry_policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            dedupe: true,
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
        }
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref())
            .map_err(|e| Error::configuration(format!("Invalid base URL: {e}")))?;
        self.base_url = Some(url);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::configuration(format!("Invalid header name: {e}")))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::configuration(format!("Invalid header value: {e}")))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the per-attempt timeout. Defaults to 30 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets the number of retries after the first attempt. Defaults to 3.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.retry_policy.max_retries = max_retries;
        self
    }

    /// Enables or disables deduplication of concurrent GETs. Defaults to enabled.
    pub fn dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Sets the bearer token source.
    pub fn token_provider<P>(mut self, provider: P) -> Self
    where
        P: TokenProvider + 'static,
    {
        self.token_provider = Arc::new(provider);
        self
    }

    /// Sets the connectivity probe.
    pub fn connectivity<C>(mut self, probe: C) -> Self
    where
        C: ConnectivityProbe + 'static,
    {
        self.connectivity = Arc::new(probe);
        self
    }

    /// Sets the transport. Defaults to [`ReqwestTransport`].
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the handler notified on 401 responses.
    pub fn on_unauthorized<H>(mut self, handler: H) -> Self
    where
        H: UnauthorizedHandler + 'static,
    {
        self.unauthorized = Arc::new(handler);
        self
    }

    /// Sets the login entry point passed to the unauthorized handler.
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Registers a request interceptor at construction time.
    pub fn request_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: RequestInterceptor + 'static,
    {
        self.request_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Registers a response interceptor at construction time.
    pub fn response_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: ResponseInterceptor + 'static,
    {
        self.response_interceptors.push(Arc::new(interceptor));
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided or the default transport
    /// cannot be created.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::configuration("Base URL is required"))?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let interceptors = Interceptors::default();
        for interceptor in self.request_interceptors {
            let _registered = interceptors.add_request(interceptor);
        }
        for interceptor in self.response_interceptors {
            let _registered = interceptors.add_response(interceptor);
        }

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                base_url,
                default_headers: self.default_headers,
                token_provider: self.token_provider,
                connectivity: self.connectivity,
                unauthorized: self.unauthorized,
                login_path: self.login_path,
                retry_policy: self.retry_policy,
                timeout: self.timeout,
                dedupe: self.dedupe,
                interceptors,
                in_flight: InFlightRegistry::new(),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
