//! Core data models used throughout sheetfeed.
//!
//! These types represent the decoded rows, the chunk plan, and the
//! provisioned documents that flow through the upload pipeline. All of them
//! are request-scoped.

use std::ops::Range;

/// One CSV record. Rows may be ragged.
pub type Row = Vec<String>;

/// Values for one write operation, row-major. Every field is sent as an
/// opaque string value.
pub type CellMatrix = Vec<Vec<serde_json::Value>>;

/// The full decoded dataset for one request. The first row is the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    rows: Vec<Row>,
}

impl RowSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn header(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Number of rows, header included.
    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of rows, header excluded.
    pub fn data_rows(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    /// Field count used for capacity math: the header's length.
    pub fn field_count(&self) -> usize {
        self.header().map(Vec::len).unwrap_or(0)
    }

    /// Length of the longest row. Never smaller than [`field_count`](Self::field_count).
    pub fn widest_row(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    pub fn slice(&self, range: Range<usize>) -> &[Row] {
        &self.rows[range]
    }
}

/// Ordered, non-empty list of provisioned document identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPlan {
    ids: Vec<String>,
}

impl DocumentPlan {
    /// Returns `None` for an empty list; a plan always has a last document
    /// to clamp onto.
    pub fn new(ids: Vec<String>) -> Option<Self> {
        if ids.is_empty() {
            None
        } else {
            Some(Self { ids })
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }
}

/// A contiguous range of rows routed to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub rows: Range<usize>,
    pub document_index: usize,
    pub document_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> Row {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rowset_counts() {
        let set = RowSet::new(vec![
            row(&["a", "b", "c"]),
            row(&["1", "2"]),
            row(&["1", "2", "3", "4"]),
        ]);
        assert_eq!(set.total_rows(), 3);
        assert_eq!(set.data_rows(), 2);
        assert_eq!(set.field_count(), 3);
        assert_eq!(set.widest_row(), 4);
    }

    #[test]
    fn empty_rowset() {
        let set = RowSet::default();
        assert_eq!(set.total_rows(), 0);
        assert_eq!(set.data_rows(), 0);
        assert_eq!(set.field_count(), 0);
        assert!(set.header().is_none());
    }

    #[test]
    fn document_plan_rejects_empty() {
        assert!(DocumentPlan::new(vec![]).is_none());
        let plan = DocumentPlan::new(vec!["x".into(), "y".into()]).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.get(1), Some("y"));
        assert_eq!(plan.get(2), None);
    }
}
