//! Document service abstraction.
//!
//! The upload pipeline never talks to a spreadsheet backend directly. It
//! goes through [`DocumentService`], which covers the three operations the
//! pipeline needs: create a document, share it, and write a block of cells.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            DocumentService               │
//! │  ┌──────────────────┐ ┌────────────────┐ │
//! │  │ Google Sheets    │ │  In-memory     │ │
//! │  │ (sheets.rs)      │ │  (memory.rs)   │ │
//! │  └──────────────────┘ └────────────────┘ │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     provision_documents() / Dispatcher
//! ```
//!
//! Custom backends implement the trait and are passed to
//! [`server::router`](crate::server::router) or
//! [`ingest::run_upload`](crate::ingest::run_upload).
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use sheetfeed::chunk::RangeAddress;
//! use sheetfeed::models::CellMatrix;
//! use sheetfeed::traits::DocumentService;
//!
//! pub struct NullService;
//!
//! #[async_trait]
//! impl DocumentService for NullService {
//!     fn name(&self) -> &str { "null" }
//!
//!     async fn create(&self, title: &str, _rows: usize, _cols: usize) -> Result<String> {
//!         Ok(title.to_string())
//!     }
//!
//!     async fn share(&self, _id: &str) -> Result<()> { Ok(()) }
//!
//!     async fn write_range(&self, _id: &str, _range: &RangeAddress, _values: &CellMatrix) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     fn document_url(&self, id: &str) -> String { format!("null://{}", id) }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::chunk::RangeAddress;
use crate::models::CellMatrix;

/// A remote (or simulated) spreadsheet backend.
///
/// Implementations must be cheap to share across tasks: the dispatcher
/// holds one behind an `Arc` and calls [`write_range`](Self::write_range)
/// from many tasks at once. No call is assumed idempotent; in particular
/// every [`create`](Self::create) makes a new document.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Short backend identifier used in logs (e.g. `"google"`).
    fn name(&self) -> &str;

    /// Create a document with a single sheet of `rows × cols` cells and
    /// return its identifier.
    async fn create(&self, title: &str, rows: usize, cols: usize) -> Result<String>;

    /// Make the document readable by anyone with the link.
    async fn share(&self, document_id: &str) -> Result<()>;

    /// Overwrite the cells at `range` with `values`.
    async fn write_range(
        &self,
        document_id: &str,
        range: &RangeAddress,
        values: &CellMatrix,
    ) -> Result<()>;

    /// Human-facing URL for a document.
    fn document_url(&self, document_id: &str) -> String;
}
