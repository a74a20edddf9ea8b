//! Basic example demonstrating reads, writes and downloads against the
//! compliance backend.
//!
//! This example shows how to:
//! - Create a client with a base URL and a session token
//! - Fetch and create applicants
//! - Build a filtered list query
//! - Download a document
//!
//! Run with:
//! `COMPLIANCE_API_URL=http://localhost:8000/api/v1 COMPLIANCE_TOKEN=... \
//!  cargo run --example basic_call`

use compliance_client::{auth::StaticToken, Client, Error, RequestDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Applicant {
    id: String,
    email: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct NewApplicant {
    email: String,
    first_name: String,
    last_name: String,
}

#[derive(Debug, Deserialize)]
struct ApplicantPage {
    items: Vec<Applicant>,
    total: u64,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("compliance_client=debug,basic_call=info")
        .init();

    let base_url = std::env::var("COMPLIANCE_API_URL")
        .unwrap_or_else(|_| "http://localhost:8000/api/v1".to_string());
    let token = std::env::var("COMPLIANCE_TOKEN").unwrap_or_default();

    let client = Client::builder()
        .base_url(&base_url)?
        .token_provider(StaticToken::new(token))
        .build()?;

    println!("=== Listing Applicants ===");
    let request = RequestDescriptor::get("/applicants").with_query([
        ("status", json!("pending")),
        ("page", json!(1)),
        ("search", json!(null)),
    ]);
    let page = client.request::<ApplicantPage>(request).await?;
    println!("Found {} applicants ({} on this page)", page.data.total, page.data.items.len());
    println!("Request latency: {:?}", page.latency);
    println!();

    println!("=== Creating an Applicant ===");
    let new_applicant = NewApplicant {
        email: "jane.doe@example.com".to_string(),
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
    };
    let created = client
        .post::<_, Applicant>("/applicants", &new_applicant)
        .await?;
    println!("Created applicant: {}", created.data.id);
    println!("Request id: {:?}", created.request_id);
    println!("Was retried: {}", created.was_retried());
    println!();

    println!("=== Fetching It Back ===");
    let path = format!("/applicants/{}", created.data.id);
    let applicant = client.get::<Applicant>(path).await?;
    println!("Applicant: {:?}", applicant.data);
    println!("Status code: {}", applicant.status);
    println!();

    println!("=== Downloading an Export ===");
    let export = client
        .request_blob(RequestDescriptor::get("/exports/applicants.csv"))
        .await?;
    println!(
        "Downloaded {} bytes ({:?}) as {:?}",
        export.len(),
        export.content_type,
        export.filename
    );

    Ok(())
}
