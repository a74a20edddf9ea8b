//! Timing-sensitive executor behavior, driven by a scripted transport under
//! paused tokio time.

use async_trait::async_trait;
use bytes::Bytes;
use compliance_client::auth::TokenProvider;
use compliance_client::{
    CancelSignal, Client, ErrorKind, RequestDescriptor, RetryPolicy, Transport, TransportError,
    TransportRequest, TransportResponse,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone)]
enum Step {
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static str,
    },
    Fail,
    Hang,
}

fn respond(status: u16, body: &'static str) -> Step {
    Step::Respond {
        status,
        headers: Vec::new(),
        body,
    }
}

/// Plays back a fixed script of responses. The last step repeats.
struct Scripted {
    steps: Vec<Step>,
    latency: Duration,
    calls: Arc<Mutex<Vec<(Instant, TransportRequest)>>>,
}

impl Scripted {
    fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<Vec<(Instant, TransportRequest)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                steps,
                latency: Duration::from_millis(100),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((Instant::now(), request));
            calls.len() - 1
        };
        let step = self.steps[index.min(self.steps.len() - 1)].clone();

        tokio::time::sleep(self.latency).await;
        match step {
            Step::Respond {
                status,
                headers,
                body,
            } => {
                let mut map = HeaderMap::new();
                for (name, value) in headers {
                    map.insert(name, HeaderValue::from_static(value));
                }
                Ok(TransportResponse {
                    status: StatusCode::from_u16(status).unwrap(),
                    headers: map,
                    body: Bytes::from_static(body.as_bytes()),
                })
            }
            Step::Fail => Err(TransportError("connection reset".into())),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError("hung".into()))
            }
        }
    }
}

fn client_with(transport: Scripted) -> Client {
    Client::builder()
        .base_url("https://api.example.com/api/v1")
        .unwrap()
        .transport(transport)
        .build()
        .unwrap()
}

fn call_count(calls: &Arc<Mutex<Vec<(Instant, TransportRequest)>>>) -> usize {
    calls.lock().unwrap().len()
}

fn gaps(calls: &Arc<Mutex<Vec<(Instant, TransportRequest)>>>) -> Vec<Duration> {
    let calls = calls.lock().unwrap();
    calls
        .windows(2)
        .map(|pair| pair[1].0.duration_since(pair[0].0))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_share_one_call() {
    let (transport, calls) = Scripted::new(vec![respond(200, r#"{"items":[1,2,3]}"#)]);
    let client = client_with(transport);

    let results = futures::future::join_all(
        (0..10).map(|_| client.get::<Value>("/applicants")),
    )
    .await;

    assert_eq!(call_count(&calls), 1);
    for result in results {
        assert_eq!(result.unwrap().data, json!({"items": [1, 2, 3]}));
    }
    assert_eq!(client.in_flight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_share_failure() {
    let (transport, calls) =
        Scripted::new(vec![respond(404, r#"{"detail":"Applicant not found"}"#)]);
    let client = client_with(transport);

    let (a, b, c) = tokio::join!(
        client.get::<Value>("/applicants/404"),
        client.get::<Value>("/applicants/404"),
        client.get::<Value>("/applicants/404"),
    );

    assert_eq!(call_count(&calls), 1);
    for result in [a, b, c] {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.message(), "Applicant not found");
    }
    assert_eq!(client.in_flight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_gets_are_not_shared() {
    let (transport, calls) = Scripted::new(vec![respond(200, "{}")]);
    let client = client_with(transport);

    client.get::<Value>("/applicants").await.unwrap();
    client.get::<Value>("/applicants").await.unwrap();

    assert_eq!(call_count(&calls), 2);
}

#[tokio::test(start_paused = true)]
async fn test_writes_are_never_shared() {
    let (transport, calls) = Scripted::new(vec![respond(201, r#"{"id":"a1"}"#)]);
    let client = client_with(transport);
    let body = json!({"email": "jane@example.com"});

    let (a, b) = tokio::join!(
        client.post::<_, Value>("/applicants", &body),
        client.post::<_, Value>("/applicants", &body),
    );

    a.unwrap();
    b.unwrap();
    assert_eq!(call_count(&calls), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dedupe_can_be_disabled() {
    let (transport, calls) = Scripted::new(vec![respond(200, "{}")]);
    let client = Client::builder()
        .base_url("https://api.example.com")
        .unwrap()
        .transport(transport)
        .dedupe(false)
        .build()
        .unwrap();

    let (a, b) = tokio::join!(
        client.get::<Value>("/applicants"),
        client.get::<Value>("/applicants"),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(call_count(&calls), 2);

    let (transport, calls) = Scripted::new(vec![respond(200, "{}")]);
    let client = client_with(transport);
    let (a, b) = tokio::join!(
        client.request::<Value>(RequestDescriptor::get("/applicants").with_dedupe(false)),
        client.request::<Value>(RequestDescriptor::get("/applicants").with_dedupe(false)),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(call_count(&calls), 2);
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_retry_with_backoff() {
    let (transport, calls) = Scripted::new(vec![respond(503, "")]);
    let client = client_with(transport);

    let err = client.get::<Value>("/screening").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.status(), 503);
    assert_eq!(call_count(&calls), 4);

    // Each gap is the transport latency plus the backoff delay.
    let latency = Duration::from_millis(100);
    let gaps = gaps(&calls);
    assert_eq!(gaps.len(), 3);
    for (gap, delay) in gaps.iter().zip([1, 2, 4]) {
        let expected = latency + Duration::from_secs(delay);
        assert!(*gap >= expected, "gap {gap:?} shorter than {expected:?}");
        assert!(*gap < expected + Duration::from_millis(50), "gap {gap:?}");
    }
    assert_eq!(client.in_flight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_network_error_then_success() {
    let (transport, calls) = Scripted::new(vec![Step::Fail, respond(200, r#"{"ok":true}"#)]);
    let client = client_with(transport);

    let response = client.get::<Value>("/health").await.unwrap();

    assert_eq!(response.data, json!({"ok": true}));
    assert_eq!(response.attempts, 2);
    assert_eq!(call_count(&calls), 2);
}

#[tokio::test(start_paused = true)]
async fn test_client_errors_make_one_attempt() {
    for status in [400, 403, 404, 409, 422] {
        let (transport, calls) = Scripted::new(vec![respond(status, "{}")]);
        let client = Client::builder()
            .base_url("https://api.example.com")
            .unwrap()
            .transport(transport)
            .max_retries(10)
            .build()
            .unwrap();

        let err = client.get::<Value>("/applicants").await.unwrap_err();
        assert_eq!(err.status(), status);
        assert_eq!(call_count(&calls), 1, "status {status}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_skip_retry_makes_one_attempt() {
    let (transport, calls) = Scripted::new(vec![respond(500, "")]);
    let client = client_with(transport);

    let err = client
        .request::<Value>(RequestDescriptor::get("/applicants").skip_retry())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(call_count(&calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_honors_retry_after() {
    let (transport, calls) = Scripted::new(vec![
        Step::Respond {
            status: 429,
            headers: vec![("retry-after", "2")],
            body: "",
        },
        respond(200, r#"{"id":"123"}"#),
    ]);
    let client = client_with(transport);

    let response = client.get::<Value>("/applicants/123").await.unwrap();

    assert_eq!(response.data, json!({"id": "123"}));
    assert_eq!(response.attempts, 2);
    let gaps = gaps(&calls);
    assert!(gaps[0] >= Duration::from_secs(2), "gap {:?}", gaps[0]);
    assert!(gaps[0] < Duration::from_secs(3), "gap {:?}", gaps[0]);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_wait_is_capped() {
    let (transport, calls) = Scripted::new(vec![
        Step::Respond {
            status: 429,
            headers: vec![("retry-after", "3600")],
            body: "",
        },
        respond(200, "{}"),
    ]);
    let client = client_with(transport);

    client.get::<Value>("/applicants").await.unwrap();

    let gaps = gaps(&calls);
    assert!(gaps[0] >= Duration::from_secs(60));
    assert!(gaps[0] < Duration::from_secs(61));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_without_hint_surfaces() {
    let (transport, calls) = Scripted::new(vec![respond(429, "")]);
    let client = client_with(transport);

    let err = client.get::<Value>("/applicants").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RateLimited);
    assert_eq!(err.status(), 429);
    assert_eq!(call_count(&calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_external_cancel_wins_over_timeout() {
    let (transport, calls) = Scripted::new(vec![Step::Hang]);
    let client = Client::builder()
        .base_url("https://api.example.com")
        .unwrap()
        .transport(transport)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    let signal = CancelSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = client
        .request::<Value>(RequestDescriptor::get("/exports").with_signal(signal))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.status(), 0);
    assert_eq!(err.message(), "request cancelled/timed out");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(call_count(&calls), 1);
    assert_eq!(client.in_flight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_not_retried() {
    let (transport, calls) = Scripted::new(vec![Step::Hang]);
    let client = client_with(transport);

    let started = Instant::now();
    let err = client
        .request::<Value>(
            RequestDescriptor::get("/exports").with_timeout(Duration::from_millis(500)),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(err.is_network_error());
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(call_count(&calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_retries() {
    let (transport, calls) = Scripted::new(vec![respond(503, "")]);
    let client = client_with(transport);

    let signal = CancelSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let err = client
        .request::<Value>(RequestDescriptor::get("/screening").with_signal(signal))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(call_count(&calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_signal_fails_fast() {
    let (transport, calls) = Scripted::new(vec![Step::Hang]);
    let client = client_with(transport);

    let signal = CancelSignal::new();
    signal.cancel();

    let err = client
        .request::<Value>(RequestDescriptor::get("/applicants").with_signal(signal))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(call_count(&calls), 0);
}

struct CountingToken {
    fetches: Arc<AtomicUsize>,
}

#[async_trait]
impl TokenProvider for CountingToken {
    async fn token(&self) -> Option<String> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Some(format!("token-{n}"))
    }
}

#[tokio::test(start_paused = true)]
async fn test_token_fetched_for_every_attempt() {
    let (transport, calls) = Scripted::new(vec![respond(502, ""), respond(200, "{}")]);
    let fetches = Arc::new(AtomicUsize::new(0));
    let client = Client::builder()
        .base_url("https://api.example.com")
        .unwrap()
        .transport(transport)
        .token_provider(CountingToken {
            fetches: fetches.clone(),
        })
        .build()
        .unwrap();

    client.get::<Value>("/applicants").await.unwrap();

    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].1.headers["authorization"], "Bearer token-1");
    assert_eq!(calls[1].1.headers["authorization"], "Bearer token-2");

    let first_id = &calls[0].1.headers["x-request-id"];
    let second_id = &calls[1].1.headers["x-request-id"];
    assert_ne!(first_id, second_id);
}

#[tokio::test(start_paused = true)]
async fn test_request_interceptors_run_per_attempt() {
    let (transport, calls) = Scripted::new(vec![Step::Fail, respond(200, "{}")]);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let client = Client::builder()
        .base_url("https://api.example.com")
        .unwrap()
        .transport(transport)
        .request_interceptor(
            move |request: RequestDescriptor| -> compliance_client::Result<RequestDescriptor> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(request)
            },
        )
        .build()
        .unwrap();

    client
        .request::<Value>(RequestDescriptor::new(Method::PUT, "/applicants/1"))
        .await
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(call_count(&calls), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_json_is_not_retried() {
    let (transport, calls) = Scripted::new(vec![respond(200, "<html>maintenance</html>")]);
    let client = client_with(transport);

    let err = client.get::<Value>("/applicants").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Decode);
    assert_eq!(err.status(), 200);
    assert_eq!(call_count(&calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy_without_retries() {
    let (transport, calls) = Scripted::new(vec![Step::Fail]);
    let client = Client::builder()
        .base_url("https://api.example.com")
        .unwrap()
        .transport(transport)
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();

    let err = client.get::<Value>("/applicants").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(err.status(), 0);
    assert_eq!(call_count(&calls), 1);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_shared_read_does_not_poison_key() {
    let (transport, calls) = Scripted::new(vec![respond(200, r#"{"id":"123"}"#)]);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let client = Client::builder()
        .base_url("https://api.example.com")
        .unwrap()
        .transport(transport)
        .retry_policy(RetryPolicy::none())
        .request_interceptor(
            move |request: RequestDescriptor| -> compliance_client::Result<RequestDescriptor> {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("interceptor failed on first use");
                }
                Ok(request)
            },
        )
        .build()
        .unwrap();

    let err = client.get::<Value>("/applicants/123").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(client.in_flight_len(), 0);
    assert_eq!(call_count(&calls), 0);

    let response = client.get::<Value>("/applicants/123").await.unwrap();
    assert_eq!(response.data, json!({"id": "123"}));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(call_count(&calls), 1);
    assert_eq!(client.in_flight_len(), 0);
}
