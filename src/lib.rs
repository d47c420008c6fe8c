//! # sheetfeed
//!
//! Upload gzip-compressed CSV files into spreadsheet documents.
//!
//! A file posted to the HTTP server (or passed to the CLI) is decoded into
//! rows, split into write-sized chunks, and spread across as many
//! spreadsheet documents as the per-document cell limit requires. Chunks are
//! written concurrently through a bounded worker pool, with exponential
//! backoff retries, and the request succeeds only if every chunk lands.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │ Row Source │──▶│ Planner              │──▶│ Provisioner  │
//! │ gzip + csv │   │ capacity/chunk/route │   │ create+share │
//! └────────────┘   └──────────────────────┘   └──────┬───────┘
//!                                                    ▼
//!                                           ┌────────────────┐
//!                                           │  Dispatcher    │──▶ DocumentService
//!                                           │ pool + retries │    (Google / memory)
//!                                           └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GOOGLE_OAUTH_ACCESS_TOKEN=...
//! sheetfeed --config ./config/sheetfeed.toml serve
//! curl -F file=@data.csv.gz http://localhost:8080/upload
//!
//! sheetfeed plan data.csv.gz          # dry run, no network
//! sheetfeed upload data.csv.gz        # same pipeline from the CLI
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`source`] | Gzip + CSV decoding |
//! | [`capacity`] | Documents required for a row set |
//! | [`chunk`] | Row-range chunk planning and range addresses |
//! | [`router`] | Chunk-to-document routing |
//! | [`provision`] | Document creation |
//! | [`dispatch`] | Bounded concurrent writes with retry |
//! | [`progress`] | Upload progress reporting |
//! | [`stats`] | Request timings and summary |
//! | [`ingest`] | Pipeline orchestration |
//! | [`traits`] | `DocumentService` abstraction |
//! | [`sheets`] | Google Sheets backend |
//! | [`memory`] | In-memory backend |
//! | [`server`] | HTTP server |

pub mod capacity;
pub mod chunk;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod progress;
pub mod provision;
pub mod router;
pub mod server;
pub mod sheets;
pub mod source;
pub mod stats;
pub mod traits;
