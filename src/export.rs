//! Export encoding
//!
//! Turns a series' bucketed (or raw) view into a self-describing JSON
//! document. Missing values are written as `null`.

use crate::error::StreamError;
use crate::nan_serde::to_nullable;
use crate::rounding::{round_slice, RoundMode};
use crate::series::{epoch_to_datetime, Series};
use crate::{AEROSTREAM_VERSION, PRODUCER_NAME};
use chrono::Utc;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current export document version
pub const EXPORT_VERSION: &str = "1.0.0";

/// Who produced an export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Averaged (or raw) view of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedExport {
    pub export_version: String,
    pub producer: ExportProducer,
    pub computed_at_utc: String,
    pub stream: String,
    /// True when the rows hold raw samples instead of bucket means
    #[serde(default)]
    pub raw: bool,
    /// Bucket width, absent for raw exports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_width_sec: Option<f64>,
    /// Bucket starts (or sample times) in epoch seconds
    pub times: Vec<f64>,
    pub times_utc: Vec<String>,
    pub channels: Vec<String>,
    /// One row per channel
    pub mean: Vec<Vec<Option<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<Vec<Vec<Option<f64>>>>,
}

/// Encoder for stream exports
pub struct ExportEncoder {
    instance_id: String,
    display_base: Option<f64>,
}

impl Default for ExportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            display_base: None,
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self {
            instance_id,
            display_base: None,
        }
    }

    /// Round exported values to multiples of `base`, keeping values that would round to zero
    pub fn with_display_rounding(mut self, base: f64) -> Self {
        self.display_base = Some(base);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Encode the bucketed view of `series`
    pub fn encode(&self, stream: &str, series: &mut Series) -> Result<AveragedExport, StreamError> {
        let times = series.return_time(false)?;
        let mean = series.return_data(None, false)?;
        let std = series.return_std(None, false)?;
        let width = series.params().bucket_width_sec;
        self.build(stream, series, times.to_vec(), &mean, Some(&std), Some(width))
    }

    /// Encode the raw samples of `series`
    pub fn encode_raw(&self, stream: &str, series: &mut Series) -> Result<AveragedExport, StreamError> {
        let times = series.return_time(true)?;
        let values = series.return_data(None, true)?;
        self.build(stream, series, times.to_vec(), &values, None, None)
    }

    /// Encode to a pretty JSON string
    pub fn encode_to_json(&self, stream: &str, series: &mut Series) -> Result<String, StreamError> {
        let export = self.encode(stream, series)?;
        Ok(serde_json::to_string_pretty(&export)?)
    }

    fn build(
        &self,
        stream: &str,
        series: &Series,
        times: Vec<f64>,
        mean: &Array2<f64>,
        std: Option<&Array2<f64>>,
        bucket_width_sec: Option<f64>,
    ) -> Result<AveragedExport, StreamError> {
        let times_utc = times
            .iter()
            .map(|&t| epoch_to_datetime(t).map(|dt| dt.to_rfc3339()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AveragedExport {
            export_version: EXPORT_VERSION.to_string(),
            producer: ExportProducer {
                name: PRODUCER_NAME.to_string(),
                version: AEROSTREAM_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            stream: stream.to_string(),
            raw: bucket_width_sec.is_none(),
            bucket_width_sec,
            times,
            times_utc,
            channels: series.channel_names().to_vec(),
            mean: self.rows(mean)?,
            std: std.map(|s| self.rows(s)).transpose()?,
        })
    }

    fn rows(&self, matrix: &Array2<f64>) -> Result<Vec<Vec<Option<f64>>>, StreamError> {
        matrix
            .rows()
            .into_iter()
            .map(|row| {
                let values = row.to_vec();
                let values = match self.display_base {
                    Some(base) => round_slice(&values, base, RoundMode::Round, true)?,
                    None => values,
                };
                Ok(values.into_iter().map(to_nullable).collect())
            })
            .collect()
    }
}
