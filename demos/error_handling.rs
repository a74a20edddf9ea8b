//! Example demonstrating error handling.
//!
//! This example shows how to:
//! - Branch on the error kind
//! - Show the display message to the user
//! - Inspect the raw error payload and request id
//! - Cancel a request in flight
//! - React to a rejected session
//!
//! Run with: `COMPLIANCE_API_URL=http://localhost:8000/api/v1 cargo run --example error_handling`

use compliance_client::{CancelSignal, Client, Error, ErrorKind, RequestDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Applicant {
    id: String,
}

#[derive(Debug, Serialize)]
struct NewApplicant {
    email: String,
}

fn describe(error: &Error) {
    println!("Error: {}", error);
    println!("  Kind: {:?}", error.kind());
    println!("  Status: {}", error.status());
    println!("  Request id: {:?}", error.request_id());
    println!("  Network error: {}", error.is_network_error());
    println!("  Retryable: {}", error.is_retryable());
    if let Some(data) = error.data() {
        println!("  Payload: {}", data);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("compliance_client=info")
        .init();

    let base_url = std::env::var("COMPLIANCE_API_URL")
        .unwrap_or_else(|_| "http://localhost:8000/api/v1".to_string());

    let client = Client::builder()
        .base_url(&base_url)?
        .login_path("/login")
        .on_unauthorized(|login_path: &str, error: &Error| {
            println!("Session rejected ({}), sending user to {}", error, login_path);
        })
        .build()?;

    println!("=== Example 1: Validation Errors ===");
    let invalid = NewApplicant {
        email: "not-an-email".to_string(),
    };
    match client.post::<_, Applicant>("/applicants", &invalid).await {
        Ok(response) => println!("Unexpected success: {:?}", response.data),
        Err(e) if e.kind() == ErrorKind::Validation => {
            println!("Please fix the form: {}", e);
            describe(&e);
        }
        Err(e) => describe(&e),
    }
    println!();

    println!("=== Example 2: Missing Resources ===");
    match client.get::<Applicant>("/applicants/does-not-exist").await {
        Ok(_) => println!("Unexpected success"),
        Err(e) => describe(&e),
    }
    println!();

    println!("=== Example 3: Schema Mismatch ===");
    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct WrongSchema {
        nonexistent_field: String,
    }

    match client.get::<WrongSchema>("/applicants").await {
        Ok(_) => println!("Unexpected success"),
        Err(e) if e.kind() == ErrorKind::Decode => {
            println!("The backend answered with an unexpected shape.");
            describe(&e);
        }
        Err(e) => describe(&e),
    }
    println!();

    println!("=== Example 4: Cancellation ===");
    let signal = CancelSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let request = RequestDescriptor::get("/exports/full")
        .with_signal(signal)
        .with_timeout(Duration::from_secs(30));
    match client.request::<Value>(request).await {
        Ok(_) => println!("Finished before cancellation"),
        Err(e) if e.is_cancelled() => describe(&e),
        Err(e) => describe(&e),
    }
    println!();

    println!("=== Example 5: Unreachable Backend ===");
    let bad_client = Client::builder()
        .base_url("https://this-domain-does-not-exist-12345.com")?
        .max_retries(1)
        .build()?;

    match bad_client.get::<Value>("/applicants").await {
        Ok(_) => println!("Unexpected success"),
        Err(e) => describe(&e),
    }

    Ok(())
}
