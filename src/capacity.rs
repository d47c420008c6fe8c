//! Capacity planning: how many target documents a row set needs.

use crate::error::PipelineError;

/// Number of documents required to hold `total_rows × field_count` cells
/// when each document holds at most `max_cells_per_document` cells.
///
/// Always at least 1. The header row counts toward `total_rows`.
pub fn required_documents(
    total_rows: usize,
    field_count: usize,
    max_cells_per_document: u64,
) -> Result<usize, PipelineError> {
    if field_count == 0 {
        return Err(PipelineError::InvalidInput(
            "header row has no fields".to_string(),
        ));
    }
    if max_cells_per_document == 0 {
        return Err(PipelineError::InvalidInput(
            "max cells per document must be > 0".to_string(),
        ));
    }

    let total_cells = (total_rows as u64).saturating_mul(field_count as u64);
    let documents = total_cells.div_ceil(max_cells_per_document).max(1);
    usize::try_from(documents)
        .map_err(|_| PipelineError::InvalidInput(format!("{} documents required", documents)))
}
