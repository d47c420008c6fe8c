//! Google Sheets backend.
//!
//! Talks to the Sheets v4 and Drive v3 REST APIs directly with `reqwest`:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create | `POST {sheets_api}/spreadsheets` |
//! | share | `POST {drive_api}/files/{id}/permissions` (`anyone` / `reader`) |
//! | write | `PUT {sheets_api}/spreadsheets/{id}/values/{range}?valueInputOption=RAW` |
//!
//! # Authentication
//!
//! Requests carry an OAuth 2.0 bearer token with the `spreadsheets` and
//! `drive.file` scopes, from one of two sources:
//!
//! 1. **Service account** (`sheets.credentials_file`): a JSON key file.
//!    Tokens are minted with `gcp_auth`, cached, and refreshed before they
//!    expire, so a long-running server keeps working.
//! 2. **Access token** (fallback): read once from the environment variable
//!    named by `sheets.access_token_env` (default
//!    `GOOGLE_OAUTH_ACCESS_TOKEN`). These expire after about an hour.
//!
//! ```bash
//! export GOOGLE_OAUTH_ACCESS_TOKEN=$(gcloud auth print-access-token \
//!     --scopes=https://www.googleapis.com/auth/spreadsheets,https://www.googleapis.com/auth/drive.file)
//! ```
//!
//! Retrying is the dispatcher's job; every method here makes exactly one
//! request and maps any non-2xx status to an error carrying the status and
//! response body.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde_json::json;

use crate::chunk::RangeAddress;
use crate::config::{Config, SheetsConfig};
use crate::memory::InMemoryDocumentService;
use crate::models::CellMatrix;
use crate::traits::DocumentService;

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive.file",
];

/// Where bearer tokens come from.
enum TokenSource {
    Static(String),
    ServiceAccount(Arc<dyn TokenProvider>),
}

impl TokenSource {
    fn from_config(config: &SheetsConfig) -> Result<Self> {
        if let Some(path) = &config.credentials_file {
            let account = CustomServiceAccount::from_file(path).with_context(|| {
                format!(
                    "Failed to load service account credentials: {}",
                    path.display()
                )
            })?;
            tracing::info!(path = %path.display(), "using service account credentials");
            return Ok(TokenSource::ServiceAccount(Arc::new(account)));
        }

        let token = std::env::var(&config.access_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "{} environment variable not set (or set sheets.credentials_file)",
                    config.access_token_env
                )
            })?;
        Ok(TokenSource::Static(token))
    }

    /// Current bearer token. Service account tokens come from the
    /// provider's cache and are refreshed when expired.
    async fn bearer(&self) -> Result<String> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount(provider) => {
                let token = provider
                    .token(SCOPES)
                    .await
                    .context("Failed to obtain service account token")?;
                Ok(token.as_str().to_string())
            }
        }
    }
}

pub struct GoogleSheetsService {
    client: reqwest::Client,
    tokens: TokenSource,
    sheets_api: String,
    drive_api: String,
    sheet_title: String,
    url_prefix: String,
}

impl GoogleSheetsService {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials file cannot be loaded, or, with
    /// no credentials file, if the access token variable is unset or empty.
    pub fn new(config: &SheetsConfig) -> Result<Self> {
        let tokens = TokenSource::from_config(config)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            tokens,
            sheets_api: config.sheets_api.trim_end_matches('/').to_string(),
            drive_api: config.drive_api.trim_end_matches('/').to_string(),
            sheet_title: config.sheet_title.clone(),
            url_prefix: config.document_url_prefix.clone(),
        })
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        bail!("{} failed: HTTP {}: {}", what, status, body.trim());
    }
}

#[async_trait]
impl DocumentService for GoogleSheetsService {
    fn name(&self) -> &str {
        "google"
    }

    async fn create(&self, title: &str, rows: usize, cols: usize) -> Result<String> {
        let token = self.tokens.bearer().await?;
        let body = create_request(title, &self.sheet_title, rows, cols);
        let response = self
            .client
            .post(format!("{}/spreadsheets", self.sheets_api))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .context("create spreadsheet request failed")?;
        let response = Self::check(response, "create spreadsheet").await?;

        let json: serde_json::Value = response.json().await?;
        json.get("spreadsheetId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid Sheets response: missing spreadsheetId"))
    }

    async fn share(&self, document_id: &str) -> Result<()> {
        let token = self.tokens.bearer().await?;
        let response = self
            .client
            .post(format!("{}/files/{}/permissions", self.drive_api, document_id))
            .bearer_auth(&token)
            .json(&json!({ "type": "anyone", "role": "reader" }))
            .send()
            .await
            .context("share spreadsheet request failed")?;
        Self::check(response, "share spreadsheet").await?;
        Ok(())
    }

    async fn write_range(
        &self,
        document_id: &str,
        range: &RangeAddress,
        values: &CellMatrix,
    ) -> Result<()> {
        let token = self.tokens.bearer().await?;
        let a1 = range.to_string();
        let response = self
            .client
            .put(format!(
                "{}/spreadsheets/{}/values/{}",
                self.sheets_api,
                document_id,
                encode_range(&a1)
            ))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&token)
            .json(&json!({
                "range": a1,
                "majorDimension": "ROWS",
                "values": values,
            }))
            .send()
            .await
            .context("update values request failed")?;
        Self::check(response, "update values").await?;
        Ok(())
    }

    fn document_url(&self, document_id: &str) -> String {
        format!("{}{}", self.url_prefix, document_id)
    }
}

/// Request body for a spreadsheet with one sheet of the given grid size.
fn create_request(title: &str, sheet_title: &str, rows: usize, cols: usize) -> serde_json::Value {
    json!({
        "properties": { "title": title },
        "sheets": [{
            "properties": {
                "title": sheet_title,
                "gridProperties": {
                    "rowCount": rows.max(1),
                    "columnCount": cols.max(1),
                }
            }
        }]
    })
}

/// Percent-encode an A1 range for use as a URL path segment.
fn encode_range(a1: &str) -> String {
    let mut out = String::with_capacity(a1.len());
    for b in a1.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'!' | b':' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Instantiate the backend named by `sheets.backend`.
pub fn create_document_service(config: &Config) -> Result<Arc<dyn DocumentService>> {
    match config.sheets.backend.as_str() {
        "google" => Ok(Arc::new(GoogleSheetsService::new(&config.sheets)?)),
        "memory" => Ok(Arc::new(InMemoryDocumentService::new())),
        other => bail!(
            "Unknown sheets backend: '{}'. Must be google or memory.",
            other
        ),
    }
}
