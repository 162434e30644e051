//! Report sinks — the document and spreadsheet the daily summary lands in.
//!
//! Both sinks are opaque collaborators: a document accepts text inserted at an
//! index, a spreadsheet accepts rows appended after its existing content. The
//! Google implementations authenticate with a bearer access token supplied out
//! of band.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::GoogleConfig;

/// Index of the first character of a Google Docs body.
pub const DOCUMENT_START_INDEX: u32 = 1;

/// A spreadsheet row; cells are JSON values so counts stay numeric.
pub type Row = Vec<Value>;

#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn insert_text(&self, index: u32, text: &str) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait SpreadsheetSink: Send + Sync {
    async fn append_rows(&self, rows: &[Row]) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing {0}")]
    MissingSetting(&'static str),
}

#[derive(Debug, Deserialize)]
struct GoogleErrorResponse {
    error: Option<GoogleErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    code: u16,
    message: String,
}

async fn check_response(response: reqwest::Response, sink: &str) -> Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let error_body = response.text().await.unwrap_or_default();
    let (code, message) = serde_json::from_str::<GoogleErrorResponse>(&error_body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| (e.code, e.message))
        .unwrap_or((status.as_u16(), error_body));

    tracing::error!(sink, code, message = %message, "Google API error");
    Err(SinkError::Api { code, message })
}

fn build_client(config: &GoogleConfig) -> Result<Client, SinkError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn require(value: &str, what: &'static str) -> Result<String, SinkError> {
    if value.trim().is_empty() {
        return Err(SinkError::MissingSetting(what));
    }
    Ok(value.to_string())
}

// ============================================================================
// GoogleDocsClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GoogleDocsClient {
    client: Client,
    base_url: String,
    document_id: String,
    access_token: String,
}

impl GoogleDocsClient {
    pub fn new(config: &GoogleConfig) -> Result<Self, SinkError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.docs_base_url.trim_end_matches('/').to_string(),
            document_id: require(&config.document_id, "document id")?,
            access_token: require(&config.access_token, "access token")?,
        })
    }
}

#[async_trait]
impl DocumentSink for GoogleDocsClient {
    async fn insert_text(&self, index: u32, text: &str) -> Result<(), SinkError> {
        let url = format!("{}/v1/documents/{}:batchUpdate", self.base_url, self.document_id);
        let body = serde_json::json!({
            "requests": [
                { "insertText": { "location": { "index": index }, "text": text } }
            ]
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        check_response(response, self.name()).await
    }

    fn name(&self) -> &str {
        "google-docs"
    }
}

// ============================================================================
// GoogleSheetsClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GoogleSheetsClient {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    range: String,
    access_token: String,
}

impl GoogleSheetsClient {
    pub fn new(config: &GoogleConfig) -> Result<Self, SinkError> {
        Ok(Self {
            client: build_client(config)?,
            base_url: config.sheets_base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: require(&config.spreadsheet_id, "spreadsheet id")?,
            range: require(&config.sheet_range, "sheet range")?,
            access_token: require(&config.access_token, "access token")?,
        })
    }
}

#[async_trait]
impl SpreadsheetSink for GoogleSheetsClient {
    async fn append_rows(&self, rows: &[Row]) -> Result<(), SinkError> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}:append",
            self.base_url, self.spreadsheet_id, self.range
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&serde_json::json!({ "values": rows }))
            .send()
            .await?;

        check_response(response, self.name()).await
    }

    fn name(&self) -> &str {
        "google-sheets"
    }
}

// ============================================================================
// TESTS
// ============================================================================
