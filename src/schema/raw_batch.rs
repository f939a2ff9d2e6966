//! stream.raw_batch.v1 schema definition
//!
//! One record carries a batch of raw instrument samples for a single stream:
//! epoch-second timestamps, a value matrix in a stated layout and, for
//! size-resolved instruments, an optional block of per-bin values. JSON
//! `null` stands for a missing value.

use crate::error::StreamError;
use crate::merge::{Layout, RawBlock};
use crate::nan_serde::from_nullable;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "stream.raw_batch.v1";

/// Where a batch came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSource {
    /// Instrument model or name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    /// File the batch was read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Per-bin values of a size-resolved instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinBlock {
    /// Bin labels, usually the bin diameters as text
    pub names: Vec<String>,
    /// Values in the record's layout
    pub values: Vec<Vec<Option<f64>>>,
}

/// A batch of raw samples for one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBatchRecord {
    pub schema_version: String,
    /// Target stream name
    pub stream: String,
    /// Sample timestamps in epoch seconds
    pub times: Vec<f64>,
    /// Channel names; when absent the stream's configured channels are used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    /// Value matrix, `null` for missing
    pub values: Vec<Vec<Option<f64>>>,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bins: Option<BinBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<BatchSource>,
}

impl RawBatchRecord {
    /// Create a channel-major record
    pub fn new(
        stream: impl Into<String>,
        times: Vec<f64>,
        channels: Vec<String>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Self {
        RawBatchRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            stream: stream.into(),
            times,
            channels: Some(channels),
            values,
            layout: Layout::ChannelMajor,
            bins: None,
            source: None,
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_bins(mut self, bins: BinBlock) -> Self {
        self.bins = Some(bins);
        self
    }

    pub fn with_source(mut self, source: BatchSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Earliest finite timestamp, used to order batches
    pub fn first_time(&self) -> Option<f64> {
        self.times
            .iter()
            .copied()
            .filter(|t| t.is_finite())
            .min_by(f64::total_cmp)
    }

    /// Validate the record schema
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }
        if self.stream.trim().is_empty() {
            return Err(ValidationError::MissingStream);
        }
        if let Some(index) = self.times.iter().position(|t| !t.is_finite()) {
            return Err(ValidationError::NonFiniteTime { index });
        }
        check_matrix("values", &self.values, self.layout, self.times.len(), self.channels.as_ref().map(Vec::len))?;
        if let Some(bins) = &self.bins {
            check_matrix("bins", &bins.values, self.layout, self.times.len(), Some(bins.names.len()))?;
        }
        Ok(())
    }

    /// Channel names for this record, falling back to `configured`
    pub fn channel_names(&self, configured: &[String]) -> Result<Vec<String>, ValidationError> {
        match &self.channels {
            Some(names) => Ok(names.clone()),
            None if !configured.is_empty() => Ok(configured.to_vec()),
            None => Err(ValidationError::MissingChannels {
                stream: self.stream.clone(),
            }),
        }
    }

    /// Validate and convert the main value matrix into a block
    pub fn to_block(&self, configured: &[String]) -> Result<RawBlock, StreamError> {
        self.validate()?;
        let names = self.channel_names(configured)?;
        build_block(&self.times, &self.values, names, self.layout)
    }

    /// Validate and convert the bin block, if any
    pub fn bins_block(&self) -> Result<Option<RawBlock>, StreamError> {
        self.validate()?;
        self.bins
            .as_ref()
            .map(|bins| build_block(&self.times, &bins.values, bins.names.clone(), self.layout))
            .transpose()
    }
}

/// Dimensions of a nested value matrix as (channels, samples)
fn matrix_dims(values: &[Vec<Option<f64>>], layout: Layout) -> Result<(usize, usize), usize> {
    let outer = values.len();
    let inner = values.first().map_or(0, Vec::len);
    if let Some(row) = values.iter().position(|r| r.len() != inner) {
        return Err(row);
    }
    Ok(match layout {
        Layout::ChannelMajor => (outer, inner),
        Layout::TimeMajor => (inner, outer),
    })
}

fn check_matrix(
    field: &'static str,
    values: &[Vec<Option<f64>>],
    layout: Layout,
    n_times: usize,
    n_channels: Option<usize>,
) -> Result<(), ValidationError> {
    let (channels, samples) =
        matrix_dims(values, layout).map_err(|row| ValidationError::RaggedValues { field, row })?;
    // an empty matrix has no inner length to check
    if values.is_empty() {
        if n_times == 0 || n_channels == Some(0) {
            return Ok(());
        }
        return Err(ValidationError::SampleCount { field, expected: n_times, actual: 0 });
    }
    if samples != n_times {
        return Err(ValidationError::SampleCount { field, expected: n_times, actual: samples });
    }
    if let Some(expected) = n_channels {
        if channels != expected {
            return Err(ValidationError::ChannelCount { field, expected, actual: channels });
        }
    }
    Ok(())
}

fn build_block(
    times: &[f64],
    values: &[Vec<Option<f64>>],
    names: Vec<String>,
    layout: Layout,
) -> Result<RawBlock, StreamError> {
    let shape = match values.first() {
        Some(row) => (values.len(), row.len()),
        // no rows at all: shape follows the header and the timestamps
        None => match layout {
            Layout::ChannelMajor => (names.len(), times.len()),
            Layout::TimeMajor => (times.len(), names.len()),
        },
    };
    let flat: Vec<f64> = values
        .iter()
        .flat_map(|row| row.iter().copied().map(from_nullable))
        .collect();
    let matrix = if flat.is_empty() {
        Array2::from_elem(shape, f64::NAN)
    } else {
        Array2::from_shape_vec(shape, flat).map_err(|e| StreamError::Parse(e.to_string()))?
    };
    RawBlock::with_layout(Array1::from(times.to_vec()), matrix, names, layout)
}

/// Validation errors for raw batch records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Record has no target stream")]
    MissingStream,

    #[error("Stream '{stream}' has no channel names in the record or the configuration")]
    MissingChannels { stream: String },

    #[error("Timestamp {index} is not a finite number")]
    NonFiniteTime { index: usize },

    #[error("Ragged {field} matrix: row {row} differs in length from row 0")]
    RaggedValues { field: &'static str, row: usize },

    #[error("{field} matrix has {actual} samples but the record has {expected} timestamps")]
    SampleCount { field: &'static str, expected: usize, actual: usize },

    #[error("{field} matrix has {actual} channels but {expected} names")]
    ChannelCount { field: &'static str, expected: usize, actual: usize },
}
