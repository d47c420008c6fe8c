//! Error taxonomy for the upload pipeline.
//!
//! Errors fall into four groups, each with a fixed propagation policy:
//!
//! | Error | Raised by | Policy | HTTP |
//! |-------|-----------|--------|------|
//! | [`InputError`] | multipart / gzip / CSV decoding | abort request | 400 |
//! | [`PipelineError::InvalidInput`] | planners | abort request | 400 |
//! | [`PipelineError::Provisioning`] | document creation | abort, never retried | 500 |
//! | [`WriteFailure`] | one chunk after retries | deferred until all chunks join | n/a |
//! | [`PipelineError::UploadPartialFailure`] | dispatcher aggregation | abort request | 500 |
//!
//! Collaborator and startup failures that have no dedicated variant travel
//! as [`anyhow::Error`] inside [`PipelineError::Internal`].

use std::fmt;

use thiserror::Error;

/// Malformed upload content. Always the caller's fault.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("error parsing form: {0}")]
    Multipart(String),

    #[error("error retrieving file: no multipart field named '{0}'")]
    MissingFile(String),

    #[error("error decompressing file: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("error reading CSV header: file contains no rows")]
    MissingHeader,

    #[error("error reading CSV header: header row has no fields")]
    EmptyHeader,

    /// A record failed to tokenize. `row` counts the records read before
    /// the failing one, so the header is row 0.
    #[error("error parsing CSV at row {row}: {message}")]
    Csv { row: u64, message: String },
}

/// A single chunk that could not be written after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub chunk_index: usize,
    pub document_id: String,
    pub attempts: u32,
    pub error: String,
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error updating chunk {} in document {} after {} attempts: {}",
            self.chunk_index, self.document_id, self.attempts, self.error
        )
    }
}

/// Aggregate of every chunk failure in one dispatch.
///
/// `failures` is sorted by chunk index and never empty.
#[derive(Debug, Clone)]
pub struct UploadFailure {
    pub failures: Vec<WriteFailure>,
    pub total_chunks: usize,
}

impl UploadFailure {
    pub fn count(&self) -> usize {
        self.failures.len()
    }

    pub fn first(&self) -> Option<&WriteFailure> {
        self.failures.first()
    }
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first() {
            Some(first) => write!(
                f,
                "encountered {} errors during upload ({} chunks total). First error: {}",
                self.count(),
                self.total_chunks,
                first
            ),
            None => write!(f, "upload failed with no recorded chunk errors"),
        }
    }
}

/// Request-level failure of the upload pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("error creating spreadsheet {index}: {source:#}")]
    Provisioning {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    UploadPartialFailure(UploadFailure),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether the failure is attributable to the uploaded content rather
    /// than to this service or its collaborators.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::Input(_) | PipelineError::InvalidInput(_))
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Input(_) | PipelineError::InvalidInput(_) => "bad_request",
            PipelineError::Provisioning { .. } => "provisioning_failed",
            PipelineError::UploadPartialFailure(_) => "upload_failed",
            PipelineError::Internal(_) => "internal",
        }
    }
}
