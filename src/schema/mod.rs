//! Raw batch input schema (stream.raw_batch.v1)
//!
//! This module defines the loader boundary: batches of raw instrument samples
//! in epoch seconds, accepted as NDJSON or a JSON array.

mod raw_batch;
mod adapter;

pub use raw_batch::*;
pub use adapter::*;
