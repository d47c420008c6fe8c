use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_upload_field")]
    pub upload_field: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            temp_dir: default_temp_dir(),
            upload_field: default_upload_field(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_max_body_bytes() -> usize {
    100 * 1024 * 1024
}
fn default_temp_dir() -> PathBuf {
    PathBuf::from("temp")
}
fn default_upload_field() -> String {
    "file".to_string()
}

/// Limits that shape the chunk plan and the dispatcher.
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Cells per write operation.
    #[serde(default = "default_max_cells_per_write")]
    pub max_cells_per_write: usize,
    /// Cells one document may hold.
    #[serde(default = "default_max_cells_per_document")]
    pub max_cells_per_document: u64,
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,
    /// Consecutive chunks routed to one document before moving to the next.
    #[serde(default = "default_switch_chunk_count")]
    pub switch_chunk_count: usize,
    /// Total write attempts per chunk, first attempt included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound on the decompressed size of one upload.
    #[serde(default = "default_max_decompressed_bytes")]
    pub max_decompressed_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_cells_per_write: default_max_cells_per_write(),
            max_cells_per_document: default_max_cells_per_document(),
            max_concurrent_writes: default_max_concurrent_writes(),
            switch_chunk_count: default_switch_chunk_count(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_decompressed_bytes: default_max_decompressed_bytes(),
        }
    }
}

impl UploadConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn default_max_cells_per_write() -> usize {
    282_400
}
fn default_max_cells_per_document() -> u64 {
    10_000_000
}
fn default_max_concurrent_writes() -> usize {
    5
}
fn default_switch_chunk_count() -> usize {
    35
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_max_decompressed_bytes() -> u64 {
    1024 * 1024 * 1024
}

/// Largest accepted `upload.max_attempts`.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct SheetsConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_sheets_api")]
    pub sheets_api: String,
    #[serde(default = "default_drive_api")]
    pub drive_api: String,
    #[serde(default = "default_document_url_prefix")]
    pub document_url_prefix: String,
    /// Service account key file. When set, tokens are minted and refreshed
    /// from it and `access_token_env` is ignored.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_sheet_title")]
    pub sheet_title: String,
    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,
    #[serde(default = "default_share_publicly")]
    pub share_publicly: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sheets_api: default_sheets_api(),
            drive_api: default_drive_api(),
            document_url_prefix: default_document_url_prefix(),
            credentials_file: None,
            access_token_env: default_access_token_env(),
            sheet_title: default_sheet_title(),
            title_prefix: default_title_prefix(),
            share_publicly: default_share_publicly(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "google".to_string()
}
fn default_sheets_api() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}
fn default_drive_api() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}
fn default_document_url_prefix() -> String {
    "https://docs.google.com/spreadsheets/d/".to_string()
}
fn default_access_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".to_string()
}
fn default_sheet_title() -> String {
    "Sheet1".to_string()
}
fn default_title_prefix() -> String {
    "CSV Import".to_string()
}
fn default_share_publicly() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Defaults for every section, used when no config file is available.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.max_body_bytes == 0 {
        anyhow::bail!("server.max_body_bytes must be > 0");
    }
    if config.server.upload_field.is_empty() {
        anyhow::bail!("server.upload_field must not be empty");
    }

    let upload = &config.upload;
    if upload.max_cells_per_write == 0 {
        anyhow::bail!("upload.max_cells_per_write must be > 0");
    }
    if upload.max_cells_per_document == 0 {
        anyhow::bail!("upload.max_cells_per_document must be > 0");
    }
    if upload.max_concurrent_writes == 0 {
        anyhow::bail!("upload.max_concurrent_writes must be > 0");
    }
    if upload.switch_chunk_count == 0 {
        anyhow::bail!("upload.switch_chunk_count must be > 0");
    }
    if upload.max_attempts == 0 {
        anyhow::bail!("upload.max_attempts must be >= 1");
    }
    if upload.max_attempts > MAX_ATTEMPTS_LIMIT {
        anyhow::bail!(
            "upload.max_attempts must be <= {} (got {})",
            MAX_ATTEMPTS_LIMIT,
            upload.max_attempts
        );
    }
    if upload.max_decompressed_bytes == 0 {
        anyhow::bail!("upload.max_decompressed_bytes must be > 0");
    }

    match config.sheets.backend.as_str() {
        "google" | "memory" => {}
        other => anyhow::bail!(
            "Unknown sheets backend: '{}'. Must be google or memory.",
            other
        ),
    }

    Ok(())
}
