//! Upload pipeline orchestration.
//!
//! Coordinates one request end to end: decode → plan → provision → route →
//! dispatch. Pure planning runs before any document is created, so an
//! unusable file never leaves empty documents behind.
//!
//! ```text
//! decode_file ─▶ plan_upload ─▶ provision_documents ─▶ ChunkRouter::assign ─▶ Dispatcher
//!   (gzip+csv)    (capacity +     (sequential,           (contiguous runs,      (bounded pool,
//!                  chunk plan)     fatal on error)        clamp to last)          retry, join)
//! ```

use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;

use crate::capacity::required_documents;
use crate::chunk::plan_chunks;
use crate::config::{Config, UploadConfig};
use crate::dispatch::Dispatcher;
use crate::error::PipelineError;
use crate::models::{DocumentPlan, RowSet};
use crate::progress::{ProgressTracker, UploadProgressReporter};
use crate::provision::{provision_documents, ProvisionOptions};
use crate::router::ChunkRouter;
use crate::source::{decompress_gzip, parse_rows};
use crate::stats::{RequestStats, UploadSummary};
use crate::traits::DocumentService;

/// Shared collaborators for running uploads.
#[derive(Clone)]
pub struct UploadContext {
    pub config: Arc<Config>,
    pub service: Arc<dyn DocumentService>,
    pub progress: Arc<dyn UploadProgressReporter>,
}

/// Everything decided about an upload before touching the document service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub total_rows: usize,
    pub field_count: usize,
    pub column_capacity: usize,
    pub num_documents: usize,
    pub max_chunk_rows: usize,
    pub ranges: Vec<Range<usize>>,
    /// Document index per chunk.
    pub routes: Vec<usize>,
}

impl UploadPlan {
    pub fn num_chunks(&self) -> usize {
        self.ranges.len()
    }

    /// Chunk count per document index.
    pub fn chunks_per_document(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_documents];
        for &doc in &self.routes {
            counts[doc] += 1;
        }
        counts
    }
}

/// Read a gzip CSV file into rows, recording decode timings.
pub fn decode_file(
    path: &Path,
    limits: &UploadConfig,
    stats: &mut RequestStats,
) -> Result<RowSet, PipelineError> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open upload: {}", path.display()))?;

    let started = Instant::now();
    let data = decompress_gzip(BufReader::new(file), limits.max_decompressed_bytes)?;
    stats.decompression_time = started.elapsed();
    tracing::info!(
        bytes = data.len(),
        "decompression completed in {:?}",
        stats.decompression_time
    );

    let started = Instant::now();
    let rows = parse_rows(&data)?;
    stats.csv_parsing_time = started.elapsed();
    stats.rows_processed = rows.data_rows();
    tracing::info!(
        rows = rows.data_rows(),
        columns = rows.field_count(),
        "CSV parsing completed in {:?}",
        stats.csv_parsing_time
    );

    Ok(rows)
}

/// Capacity, chunk, and routing plan for `rows`.
pub fn plan_upload(rows: &RowSet, limits: &UploadConfig) -> Result<UploadPlan, PipelineError> {
    let total_rows = rows.total_rows();
    let field_count = rows.field_count();

    let num_documents =
        required_documents(total_rows, field_count, limits.max_cells_per_document)?;
    let chunks = plan_chunks(total_rows, field_count, limits.max_cells_per_write)?;
    let router = ChunkRouter::new(num_documents, limits.switch_chunk_count)?;
    let routes = (0..chunks.len()).map(|i| router.route(i)).collect();

    Ok(UploadPlan {
        total_rows,
        field_count,
        column_capacity: rows.widest_row(),
        num_documents,
        max_chunk_rows: chunks.max_chunk_rows,
        ranges: chunks.ranges,
        routes,
    })
}

/// Provision documents and write `rows` into them.
///
/// `stats` arrives with the decode timings already filled in; `started`
/// marks the beginning of the request for the total time.
pub async fn run_upload(
    ctx: &UploadContext,
    request_id: &str,
    rows: RowSet,
    mut stats: RequestStats,
    started: Instant,
) -> Result<UploadSummary, PipelineError> {
    let config = &ctx.config;
    let plan = plan_upload(&rows, &config.upload)?;
    tracing::info!(
        documents = plan.num_documents,
        chunks = plan.num_chunks(),
        max_chunk_rows = plan.max_chunk_rows,
        "spreadsheets required: {}",
        plan.num_documents
    );

    let sheet_started = Instant::now();
    let documents: DocumentPlan = provision_documents(
        ctx.service.as_ref(),
        plan.num_documents,
        plan.total_rows,
        plan.column_capacity,
        &ProvisionOptions {
            title_prefix: config.sheets.title_prefix.clone(),
            share_publicly: config.sheets.share_publicly,
        },
    )
    .await?;
    stats.sheet_creation_time = sheet_started.elapsed();
    tracing::info!(
        "spreadsheet creation completed in {:?}",
        stats.sheet_creation_time
    );

    let router = ChunkRouter::new(documents.len(), config.upload.switch_chunk_count)?;
    let chunks = router.assign(&plan.ranges, &documents);
    stats.chunks_uploaded = chunks.len();
    tracing::info!(
        "uploading data in {} chunks (max {} rows per chunk)",
        chunks.len(),
        plan.max_chunk_rows
    );

    let upload_started = Instant::now();
    let dispatcher =
        Dispatcher::from_config(ctx.service.clone(), &config.upload, &config.sheets.sheet_title);
    let progress = Arc::new(ProgressTracker::new(
        request_id,
        chunks.len(),
        ctx.progress.clone(),
    ));
    let report = dispatcher
        .dispatch(Arc::new(rows), chunks, progress)
        .await?;
    stats.upload_time = upload_started.elapsed();
    tracing::info!(
        retries = report.retries(),
        "data upload completed in {:?}",
        stats.upload_time
    );

    stats.total_time = started.elapsed();
    tracing::info!("total processing time: {:?}", stats.total_time);

    Ok(UploadSummary {
        request_id: request_id.to_string(),
        stats,
        document_urls: documents
            .ids()
            .iter()
            .map(|id| ctx.service.document_url(id))
            .collect(),
    })
}
