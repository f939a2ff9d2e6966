//! Aerostream - time-series alignment and incremental averaging for instrument data
//!
//! Aerostream accumulates raw instrument batches into per-stream series and
//! reduces them onto fixed-width time buckets: batch loading → stream merge
//! (header reconciliation, time-base alignment) → lazy bucket averaging →
//! export.
//!
//! ## Modules
//!
//! - **Series**: raw samples, channel registry and the cached bucketed view
//! - **Data lake**: named collection of series with snapshot support
//! - **Pipeline**: configured ingestion of `stream.raw_batch.v1` records

pub mod average;
pub mod config;
pub mod error;
pub mod export;
pub mod lake;
pub mod merge;
mod nan_serde;
pub mod pipeline;
pub mod registry;
pub mod rounding;
pub mod schema;
pub mod series;

pub use average::{AveragingParams, BucketGrid, BucketStats, GridState};
pub use config::{InstrumentKind, LakeConfig, StreamSettings};
pub use error::StreamError;
pub use export::{AveragedExport, ExportEncoder};
pub use lake::DataLake;
pub use merge::{merge_channels, merge_headers, merge_samples, HeaderPolicy, Layout, RawBlock};
pub use pipeline::{average_batches, ErrorPolicy, IngestPipeline, IngestReport};
pub use registry::ColumnRegistry;
pub use rounding::{round_to_base, RoundMode};
pub use series::Series;

// Schema exports
pub use schema::{BatchAdapter, RawBatchRecord, RawLoader, SCHEMA_VERSION};

/// Aerostream version embedded in every export
pub const AEROSTREAM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exports
pub const PRODUCER_NAME: &str = "aerostream";
