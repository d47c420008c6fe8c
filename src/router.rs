//! Chunk-to-document routing.
//!
//! Chunks go to documents in contiguous runs of `switch_threshold` chunks.
//! The document count comes from the capacity planner (cells per document)
//! while the chunk count comes from the chunk planner (cells per write), so
//! the two can disagree. When they do, every chunk past the last document's
//! nominal run is clamped onto the last document instead of failing.

use std::ops::Range;

use crate::error::PipelineError;
use crate::models::{Chunk, DocumentPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRouter {
    num_documents: usize,
    switch_threshold: usize,
}

impl ChunkRouter {
    pub fn new(num_documents: usize, switch_threshold: usize) -> Result<Self, PipelineError> {
        if num_documents == 0 {
            return Err(PipelineError::InvalidInput(
                "no documents to route chunks to".to_string(),
            ));
        }
        if switch_threshold == 0 {
            return Err(PipelineError::InvalidInput(
                "switch threshold must be > 0".to_string(),
            ));
        }
        Ok(Self {
            num_documents,
            switch_threshold,
        })
    }

    /// Document index for a chunk: `min(chunk_index / threshold, documents - 1)`.
    pub fn route(&self, chunk_index: usize) -> usize {
        (chunk_index / self.switch_threshold).min(self.num_documents - 1)
    }

    /// True when `chunk_index` lands on the last document only because of
    /// the clamp.
    pub fn is_clamped(&self, chunk_index: usize) -> bool {
        chunk_index / self.switch_threshold > self.num_documents - 1
    }

    /// Pair each planned range with its routed document.
    pub fn assign(&self, ranges: &[Range<usize>], documents: &DocumentPlan) -> Vec<Chunk> {
        let clamped = (0..ranges.len())
            .filter(|&i| self.is_clamped(i))
            .count();
        if clamped > 0 {
            tracing::warn!(
                clamped,
                chunks = ranges.len(),
                documents = self.num_documents,
                switch_threshold = self.switch_threshold,
                "chunk count exceeds document runs; overflow chunks clamped onto last document"
            );
        }

        ranges
            .iter()
            .enumerate()
            .map(|(index, rows)| {
                let document_index = self.route(index);
                let document_id = documents
                    .get(document_index)
                    .or_else(|| documents.ids().last().map(String::as_str))
                    .unwrap_or_default()
                    .to_string();
                Chunk {
                    index,
                    rows: rows.clone(),
                    document_index,
                    document_id,
                }
            })
            .collect()
    }
}
