//! Loaders for stream.raw_batch.v1 records
//!
//! Batches arrive as NDJSON (one record per line) or as a JSON array.
//! Other file formats plug in through [`RawLoader`].

use crate::error::StreamError;
use crate::schema::raw_batch::*;

/// Trait for anything that turns input text into raw batch records
pub trait RawLoader {
    /// Short name used in logs and diagnostics
    fn name(&self) -> &'static str;

    /// Parse input into records; schema validation happens later
    fn load(&self, input: &str) -> Result<Vec<RawBatchRecord>, StreamError>;
}

/// Newline-delimited JSON records
pub struct NdjsonLoader;

impl RawLoader for NdjsonLoader {
    fn name(&self) -> &'static str {
        "ndjson"
    }

    fn load(&self, input: &str) -> Result<Vec<RawBatchRecord>, StreamError> {
        BatchAdapter::parse_ndjson(input)
    }
}

/// A single JSON array of records
pub struct JsonArrayLoader;

impl RawLoader for JsonArrayLoader {
    fn name(&self) -> &'static str {
        "json_array"
    }

    fn load(&self, input: &str) -> Result<Vec<RawBatchRecord>, StreamError> {
        BatchAdapter::parse_array(input)
    }
}

/// Helpers for parsing and checking raw batch records
pub struct BatchAdapter;

impl BatchAdapter {
    /// Parse a JSON string containing an array of records
    pub fn parse_array(json: &str) -> Result<Vec<RawBatchRecord>, StreamError> {
        let records: Vec<RawBatchRecord> = serde_json::from_str(json)?;
        Ok(records)
    }

    /// Parse NDJSON (newline-delimited JSON) records
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawBatchRecord>, StreamError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawBatchRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    return Err(StreamError::Parse(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(records)
    }

    /// Pick a loader from the first non-blank character of the input
    pub fn detect(input: &str) -> Box<dyn RawLoader> {
        if input.trim_start().starts_with('[') {
            Box::new(JsonArrayLoader)
        } else {
            Box::new(NdjsonLoader)
        }
    }

    /// Parse either format
    pub fn parse_auto(input: &str) -> Result<Vec<RawBatchRecord>, StreamError> {
        let loader = Self::detect(input);
        log::debug!("reading raw batches as {}", loader.name());
        loader.load(input)
    }

    /// Validate a batch of records, returning only the failures
    pub fn validate_batches(records: &[RawBatchRecord]) -> Vec<ValidationResult> {
        records
            .iter()
            .enumerate()
            .map(|(idx, record)| ValidationResult {
                index: idx,
                stream: record.stream.clone(),
                result: record.validate().err(),
            })
            .filter(|r| r.result.is_some())
            .collect()
    }
}

/// Result of record validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub stream: String,
    pub result: Option<ValidationError>,
}
