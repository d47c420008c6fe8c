//! Row-range chunk planner.
//!
//! Splits a row set into contiguous [`Range`]s that each fit one write
//! operation's cell budget. Every chunk holds `max_chunk_rows` rows except
//! possibly the last, and together the ranges cover the row set exactly.
//!
//! Also computes the A1-notation [`RangeAddress`] a chunk is written to.

use std::fmt;
use std::ops::Range;

use crate::error::PipelineError;

/// Output of [`plan_chunks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub max_chunk_rows: usize,
    pub ranges: Vec<Range<usize>>,
}

impl ChunkPlan {
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Partition `[0, total_rows)` into write-sized ranges.
///
/// `max_chunk_rows = floor(max_cells_per_write / field_count)` must be at
/// least 1; a row wider than a whole write operation is rejected.
pub fn plan_chunks(
    total_rows: usize,
    field_count: usize,
    max_cells_per_write: usize,
) -> Result<ChunkPlan, PipelineError> {
    if field_count == 0 {
        return Err(PipelineError::InvalidInput(
            "header row has no fields".to_string(),
        ));
    }

    let max_chunk_rows = max_cells_per_write / field_count;
    if max_chunk_rows == 0 {
        return Err(PipelineError::InvalidInput(format!(
            "{} fields per row exceed the {} cells allowed per write",
            field_count, max_cells_per_write
        )));
    }

    let num_chunks = total_rows.div_ceil(max_chunk_rows);
    let ranges = (0..num_chunks)
        .map(|i| {
            let start = i * max_chunk_rows;
            let end = (start + max_chunk_rows).min(total_rows);
            start..end
        })
        .collect();

    Ok(ChunkPlan {
        max_chunk_rows,
        ranges,
    })
}

/// Target of one write: a rectangular block on a named sheet.
///
/// Rows are 1-based and inclusive, as the document service expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeAddress {
    pub sheet: String,
    pub start_row: usize,
    pub end_row: usize,
    pub width: usize,
}

impl RangeAddress {
    /// Address for the 0-based half-open row range `rows`, spanning
    /// `width` columns starting at column A.
    pub fn for_rows(sheet: &str, rows: &Range<usize>, width: usize) -> Self {
        Self {
            sheet: sheet.to_string(),
            start_row: rows.start + 1,
            end_row: rows.end,
            width: width.max(1),
        }
    }
}

impl fmt::Display for RangeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!A{}:{}{}",
            quote_sheet_name(&self.sheet),
            self.start_row,
            column_letters(self.width),
            self.end_row
        )
    }
}

/// Sheet name as it must appear in A1 notation. Names made only of ASCII
/// letters, digits and `_` go bare; anything else is wrapped in single
/// quotes with embedded quotes doubled.
pub fn quote_sheet_name(name: &str) -> String {
    let bare = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if bare {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// Spreadsheet column name for a 1-based column number (1 → A, 27 → AA).
pub fn column_letters(mut column: usize) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(b'A' + rem as u8);
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}
