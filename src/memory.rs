//! In-memory document service.
//!
//! Keeps every created document and every write in process memory. Selected
//! with `sheets.backend = "memory"` for local runs without Google
//! credentials, and used by the test suites to inspect what was written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::chunk::RangeAddress;
use crate::models::CellMatrix;
use crate::traits::DocumentService;

/// One recorded write.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub range: RangeAddress,
    pub values: CellMatrix,
}

/// A simulated document.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    pub title: String,
    pub rows: usize,
    pub cols: usize,
    pub shared: bool,
    pub writes: Vec<RecordedWrite>,
}

impl MemoryDocument {
    /// Total cells written across all recorded writes.
    pub fn cells_written(&self) -> usize {
        self.writes
            .iter()
            .map(|w| w.values.iter().map(Vec::len).sum::<usize>())
            .sum()
    }
}

#[derive(Default)]
pub struct InMemoryDocumentService {
    next_id: AtomicUsize,
    documents: Mutex<HashMap<String, MemoryDocument>>,
}

impl InMemoryDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a document.
    pub fn document(&self, id: &str) -> Option<MemoryDocument> {
        self.documents.lock().ok()?.get(id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DocumentService for InMemoryDocumentService {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, title: &str, rows: usize, cols: usize) -> Result<String> {
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut docs = self
            .documents
            .lock()
            .map_err(|_| anyhow!("document store poisoned"))?;
        docs.insert(
            id.clone(),
            MemoryDocument {
                title: title.to_string(),
                rows,
                cols,
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn share(&self, document_id: &str) -> Result<()> {
        let mut docs = self
            .documents
            .lock()
            .map_err(|_| anyhow!("document store poisoned"))?;
        let doc = docs
            .get_mut(document_id)
            .ok_or_else(|| anyhow!("document not found: {}", document_id))?;
        doc.shared = true;
        Ok(())
    }

    async fn write_range(
        &self,
        document_id: &str,
        range: &RangeAddress,
        values: &CellMatrix,
    ) -> Result<()> {
        let mut docs = self
            .documents
            .lock()
            .map_err(|_| anyhow!("document store poisoned"))?;
        let doc = docs
            .get_mut(document_id)
            .ok_or_else(|| anyhow!("document not found: {}", document_id))?;
        if range.width > doc.cols {
            anyhow::bail!(
                "range {} exceeds grid width {} of document {}",
                range,
                doc.cols,
                document_id
            );
        }
        doc.writes.push(RecordedWrite {
            range: range.clone(),
            values: values.clone(),
        });
        Ok(())
    }

    fn document_url(&self, document_id: &str) -> String {
        format!("memory://{}", document_id)
    }
}
