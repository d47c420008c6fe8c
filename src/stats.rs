//! Per-request timing and counters, and the plain-text success summary.
//!
//! Stats are observability only: they are filled in as the pipeline moves
//! through its stages and dropped once the response is sent.

use std::fmt::Write;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RequestStats {
    pub decompression_time: Duration,
    pub csv_parsing_time: Duration,
    pub sheet_creation_time: Duration,
    pub upload_time: Duration,
    pub total_time: Duration,
    /// Data rows, header excluded.
    pub rows_processed: usize,
    pub chunks_uploaded: usize,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadSummary {
    pub request_id: String,
    pub stats: RequestStats,
    pub document_urls: Vec<String>,
}

impl UploadSummary {
    /// Human-readable response body.
    pub fn render(&self) -> String {
        let s = &self.stats;
        let mut out = String::new();
        let _ = writeln!(out, "Processing completed successfully:");
        let _ = writeln!(out, "- Total time: {:?}", s.total_time);
        let _ = writeln!(out, "- Decompression time: {:?}", s.decompression_time);
        let _ = writeln!(out, "- CSV parsing time: {:?}", s.csv_parsing_time);
        let _ = writeln!(out, "- Sheet creation time: {:?}", s.sheet_creation_time);
        let _ = writeln!(out, "- Upload time: {:?}", s.upload_time);
        let _ = writeln!(out, "- Rows processed: {}", s.rows_processed);
        let _ = writeln!(out, "- Chunks uploaded: {}", s.chunks_uploaded);
        let _ = writeln!(out, "- Spreadsheet URLs:");
        for (i, url) in self.document_urls.iter().enumerate() {
            let _ = writeln!(out, "  Spreadsheet {}: {}", i + 1, url);
        }
        out
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
