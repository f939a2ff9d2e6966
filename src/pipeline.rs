//! Ingestion pipeline
//!
//! This module provides the public batch API for Aerostream.
//! It routes raw batch records into the streams of a data lake, then
//! applies zero-period removal and averaging per stream configuration.

use crate::average::AveragingParams;
use crate::config::{LakeConfig, StreamSettings};
use crate::error::StreamError;
use crate::export::{AveragedExport, ExportEncoder};
use crate::lake::DataLake;
use crate::merge::HeaderPolicy;
use crate::schema::{BatchAdapter, RawBatchRecord};
use crate::series::Series;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// What to do when a batch fails to ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop at the first failing batch
    #[default]
    Abort,
    /// Log the failure, record it and carry on
    Skip,
}

/// One batch that could not be ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    /// Position of the batch in the input
    pub index: usize,
    pub stream: String,
    pub message: String,
}

/// Outcome of [`IngestPipeline::ingest_all`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub ingested: usize,
    pub skipped: usize,
    pub errors: Vec<IngestFailure>,
}

/// Read raw batches and return the averaged export of every stream.
///
/// # Arguments
/// * `config_json` - Stream configuration (see [`LakeConfig`])
/// * `input` - Raw batch records as NDJSON or a JSON array
///
/// # Example
/// ```ignore
/// let exports = average_batches(&config_json, &ndjson)?;
/// ```
pub fn average_batches(config_json: &str, input: &str) -> Result<Vec<AveragedExport>, StreamError> {
    let mut pipeline = IngestPipeline::from_config_json(config_json)?;
    let records = BatchAdapter::parse_auto(input)?;
    pipeline.ingest_all(records, ErrorPolicy::Abort)?;
    pipeline.finish()?;
    pipeline.export()
}

/// Stateful pipeline for incremental ingestion into a data lake.
///
/// Use this when batches arrive over several calls, or to resume from a
/// saved lake snapshot.
pub struct IngestPipeline {
    config: LakeConfig,
    lake: DataLake,
    encoder: ExportEncoder,
}

impl IngestPipeline {
    /// Create a pipeline with an empty lake
    pub fn new(config: LakeConfig) -> Result<Self, StreamError> {
        Self::with_lake(config, DataLake::new())
    }

    /// Create a pipeline from a JSON configuration
    pub fn from_config_json(json: &str) -> Result<Self, StreamError> {
        Self::new(LakeConfig::from_json(json)?)
    }

    /// Create a pipeline that continues filling an existing lake
    pub fn with_lake(config: LakeConfig, lake: DataLake) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            config,
            lake,
            encoder: ExportEncoder::new(),
        })
    }

    /// Replace the lake with a saved snapshot
    pub fn load_snapshot(&mut self, json: &str) -> Result<(), StreamError> {
        self.lake = DataLake::from_json(json)?;
        Ok(())
    }

    /// Save the lake to JSON
    pub fn save_snapshot(&self) -> Result<String, StreamError> {
        self.lake.to_json()
    }

    pub fn config(&self) -> &LakeConfig {
        &self.config
    }

    pub fn lake(&self) -> &DataLake {
        &self.lake
    }

    pub fn lake_mut(&mut self) -> &mut DataLake {
        &mut self.lake
    }

    pub fn into_lake(self) -> DataLake {
        self.lake
    }

    fn settings_for(&self, stream: &str) -> StreamSettings {
        match self.config.stream(stream) {
            Some(settings) => settings.clone(),
            None => {
                log::warn!("stream '{stream}' is not configured, using default settings");
                StreamSettings::new(stream)
            }
        }
    }

    fn working_copy(&self, stream: &str, params: AveragingParams) -> Result<Series, StreamError> {
        if self.lake.contains(stream) {
            Ok(self.lake.get(stream)?.clone())
        } else {
            Series::new(params)
        }
    }

    /// Merge one record into its stream, and its bins into the bin stream.
    ///
    /// Either every target stream takes the batch or none does.
    pub fn ingest(&mut self, record: &RawBatchRecord) -> Result<(), StreamError> {
        let settings = self.settings_for(&record.stream);
        let block = record.to_block(&settings.channels)?;
        let bins = record.bins_block()?;
        let params = settings.params();

        match (bins, settings.bins_stream()) {
            (None, _) if self.lake.contains(&record.stream) => {
                self.lake
                    .get_mut(&record.stream)?
                    .merge(block, settings.header_policy)?;
            }
            (None, _) => {
                let mut series = Series::new(params)?;
                series.merge(block, settings.header_policy)?;
                log::debug!("creating stream '{}'", record.stream);
                self.lake.insert(record.stream.clone(), series);
            }
            (Some(bins), Some(bins_stream)) => {
                let mut main = self.working_copy(&record.stream, params)?;
                let mut binned = self.working_copy(bins_stream, params)?;
                main.merge(block, settings.header_policy)?;
                binned.merge(bins, HeaderPolicy::Reconcile)?;
                self.lake.insert(record.stream.clone(), main);
                self.lake.insert(bins_stream.to_string(), binned);
            }
            (Some(_), None) => {
                return Err(StreamError::Config(format!(
                    "record for '{}' carries bins but the stream is not a sizer",
                    record.stream
                )));
            }
        }
        log::debug!(
            "ingested {} sample(s) into '{}'",
            record.times.len(),
            record.stream
        );
        Ok(())
    }

    /// Ingest records in order of their first timestamp.
    pub fn ingest_all(
        &mut self,
        records: Vec<RawBatchRecord>,
        policy: ErrorPolicy,
    ) -> Result<IngestReport, StreamError> {
        let mut ordered: Vec<(usize, RawBatchRecord)> = records.into_iter().enumerate().collect();
        // stable: batches without timestamps go last, ties keep input order
        ordered.sort_by(|(_, a), (_, b)| match (a.first_time(), b.first_time()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        let mut report = IngestReport::default();
        for (index, record) in ordered {
            match self.ingest(&record) {
                Ok(()) => report.ingested += 1,
                Err(e) => match policy {
                    ErrorPolicy::Abort => {
                        log::error!("batch {index} for '{}' failed: {e}", record.stream);
                        return Err(e);
                    }
                    ErrorPolicy::Skip => {
                        log::warn!("skipping batch {index} for '{}': {e}", record.stream);
                        report.skipped += 1;
                        report.errors.push(IngestFailure {
                            index,
                            stream: record.stream.clone(),
                            message: e.to_string(),
                        });
                    }
                },
            }
        }
        log::info!(
            "ingested {} batch(es), skipped {}, {} stream(s) in lake",
            report.ingested,
            report.skipped,
            self.lake.len()
        );
        Ok(report)
    }

    /// Drop flagged zero periods and average every stream with its configured parameters.
    pub fn finish(&mut self) -> Result<(), StreamError> {
        for settings in &self.config.streams {
            let params = settings.params();
            if self.lake.contains(&settings.name) {
                if !settings.zero_flag_channels.is_empty() {
                    let flags: Vec<&str> = settings.zero_flag_channels.iter().map(String::as_str).collect();
                    self.lake.drop_zero_periods(&settings.name, &flags)?;
                }
                self.lake.get_mut(&settings.name)?.reaverage_with(params)?;
            }
            if let Some(bins_stream) = settings.bins_stream() {
                if self.lake.contains(bins_stream) {
                    self.lake.get_mut(bins_stream)?.reaverage_with(params)?;
                }
            }
        }
        // unconfigured streams keep whatever parameters they were created with
        let names: Vec<String> = self.lake.list_streams().iter().map(|s| s.to_string()).collect();
        for name in names {
            self.lake.get_mut(&name)?.ensure_averaged()?;
        }
        Ok(())
    }

    /// Averaged export of every stream, in name order
    pub fn export(&mut self) -> Result<Vec<AveragedExport>, StreamError> {
        let names: Vec<String> = self.lake.list_streams().iter().map(|s| s.to_string()).collect();
        let mut exports = Vec::with_capacity(names.len());
        for name in names {
            let series = self.lake.get_mut(&name)?;
            exports.push(self.encoder.encode(&name, series)?);
        }
        Ok(exports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BinBlock;
    use pretty_assertions::assert_eq;

    fn sample_config() -> &'static str {
        r#"{
            "streams": [
                {
                    "name": "CAPS_dual",
                    "channels": ["Ext_dry", "Zero_dry_CAPS"],
                    "averaging": {"bucket_width_sec": 60},
                    "zero_flag_channels": ["Zero_dry_CAPS"]
                },
                {
                    "name": "smps_1D",
                    "channels": ["Total_Conc"],
                    "kind": {"type": "sizer", "bins_stream": "smps_2D"},
                    "averaging": {"bucket_width_sec": 120}
                }
            ]
        }"#
    }

    fn caps_record(start: f64, ext: [f64; 3], zero: [f64; 3]) -> RawBatchRecord {
        let mut record = RawBatchRecord::new(
            "CAPS_dual",
            vec![start, start + 20.0, start + 40.0],
            vec![],
            vec![ext.iter().map(|v| Some(*v)).collect(), zero.iter().map(|v| Some(*v)).collect()],
        );
        record.channels = None;
        record
    }

    fn smps_record(start: f64, bins: &[&str], bin_values: Vec<Vec<Option<f64>>>) -> RawBatchRecord {
        RawBatchRecord::new("smps_1D", vec![start], vec!["Total_Conc".to_string()], vec![vec![Some(1000.0)]])
            .with_bins(BinBlock {
                names: bins.iter().map(|s| s.to_string()).collect(),
                values: bin_values,
            })
    }

    #[test]
    fn test_ingest_out_of_order_batches() {
        let mut pipeline = IngestPipeline::from_config_json(sample_config()).unwrap();
        let records = vec![
            caps_record(60.0, [4.0, 5.0, 6.0], [0.0, 0.0, 0.0]),
            caps_record(0.0, [1.0, 2.0, 3.0], [0.0, 0.0, 0.0]),
        ];
        let report = pipeline.ingest_all(records, ErrorPolicy::Abort).unwrap();
        assert_eq!(report.ingested, 2);
        assert_eq!(report.skipped, 0);

        let series = pipeline.lake().get("CAPS_dual").unwrap();
        assert_eq!(series.raw_times().to_vec(), vec![0.0, 20.0, 40.0, 60.0, 80.0, 100.0]);
        assert_eq!(series.channel_names(), &["Ext_dry".to_string(), "Zero_dry_CAPS".to_string()][..]);
    }

    #[test]
    fn test_finish_drops_zero_periods_and_averages() {
        let mut pipeline = IngestPipeline::from_config_json(sample_config()).unwrap();
        pipeline
            .ingest(&caps_record(0.0, [1.0, 100.0, 3.0], [0.0, 1.0, 0.0]))
            .unwrap();
        pipeline.finish().unwrap();

        let series = pipeline.lake_mut().get_mut("CAPS_dual").unwrap();
        assert_eq!(series.n_samples(), 2);
        assert!(series.is_averaged());
        let means = series.return_data(Some(&["Ext_dry"]), false).unwrap();
        assert_eq!(means[[0, 0]], 2.0);
    }

    #[test]
    fn test_sizer_bins_are_reconciled() {
        let mut pipeline = IngestPipeline::from_config_json(sample_config()).unwrap();
        pipeline
            .ingest(&smps_record(0.0, &["20.1", "80.3"], vec![vec![Some(1.0)], vec![Some(2.0)]]))
            .unwrap();
        pipeline
            .ingest(&smps_record(60.0, &["100.5", "50.2"], vec![vec![Some(3.0)], vec![Some(4.0)]]))
            .unwrap();

        let bins = pipeline.lake().get("smps_2D").unwrap();
        assert_eq!(
            bins.channel_names(),
            &["20.1", "50.2", "80.3", "100.5"].map(String::from)[..]
        );
        assert_eq!(pipeline.lake().get("smps_1D").unwrap().n_samples(), 2);

        pipeline.finish().unwrap();
        assert_eq!(pipeline.lake().get("smps_2D").unwrap().params().bucket_width_sec, 120.0);
    }

    #[test]
    fn test_failed_sizer_batch_touches_nothing() {
        let mut pipeline = IngestPipeline::from_config_json(sample_config()).unwrap();
        pipeline
            .ingest(&smps_record(0.0, &["20.1"], vec![vec![Some(1.0)]]))
            .unwrap();
        // two main channels against one configured: strict merge fails
        let mut bad = smps_record(60.0, &["50.2"], vec![vec![Some(2.0)]]);
        bad.channels = Some(vec!["Total_Conc".to_string(), "Extra".to_string()]);
        bad.values = vec![vec![Some(1.0)], vec![Some(2.0)]];
        assert!(pipeline.ingest(&bad).is_err());
        assert_eq!(pipeline.lake().get("smps_2D").unwrap().n_channels(), 1);
        assert_eq!(pipeline.lake().get("smps_1D").unwrap().n_samples(), 1);
    }

    #[test]
    fn test_skip_policy_reports_failures() {
        let mut pipeline = IngestPipeline::from_config_json(sample_config()).unwrap();
        let mut bad = caps_record(100.0, [1.0, 2.0, 3.0], [0.0, 0.0, 0.0]);
        bad.schema_version = "stream.raw_batch.v0".to_string();
        let records = vec![caps_record(0.0, [1.0, 2.0, 3.0], [0.0, 0.0, 0.0]), bad];

        let report = pipeline.ingest_all(records.clone(), ErrorPolicy::Skip).unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.errors[0].index, 1);
        assert_eq!(report.errors[0].stream, "CAPS_dual");

        let mut strict = IngestPipeline::from_config_json(sample_config()).unwrap();
        assert!(strict.ingest_all(records, ErrorPolicy::Abort).is_err());
    }

    #[test]
    fn test_bins_on_general_stream_rejected() {
        let mut pipeline = IngestPipeline::from_config_json(sample_config()).unwrap();
        let record = caps_record(0.0, [1.0, 2.0, 3.0], [0.0, 0.0, 0.0]).with_bins(BinBlock {
            names: vec!["20.1".to_string()],
            values: vec![vec![Some(1.0), Some(1.0), Some(1.0)]],
        });
        assert!(matches!(pipeline.ingest(&record), Err(StreamError::Config(_))));
        assert!(pipeline.lake().is_empty());
    }

    #[test]
    fn test_unconfigured_stream_uses_defaults() {
        let mut pipeline = IngestPipeline::from_config_json(sample_config()).unwrap();
        let record = RawBatchRecord::new("aethalometer", vec![0.0, 30.0], vec!["BC".to_string()], vec![vec![Some(1.0), Some(3.0)]]);
        pipeline.ingest(&record).unwrap();
        pipeline.finish().unwrap();
        let exports = pipeline.export().unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].stream, "aethalometer");
        assert_eq!(exports[0].bucket_width_sec, Some(60.0));
        assert_eq!(exports[0].mean[0][0], Some(2.0));
    }

    #[test]
    fn test_snapshot_and_resume() {
        let mut pipeline = IngestPipeline::from_config_json(sample_config()).unwrap();
        pipeline
            .ingest(&caps_record(0.0, [1.0, 2.0, 3.0], [0.0, 0.0, 0.0]))
            .unwrap();
        let saved = pipeline.save_snapshot().unwrap();

        let mut resumed = IngestPipeline::from_config_json(sample_config()).unwrap();
        resumed.load_snapshot(&saved).unwrap();
        resumed
            .ingest(&caps_record(60.0, [4.0, 5.0, 6.0], [0.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(resumed.lake().get("CAPS_dual").unwrap().n_samples(), 6);
    }

    #[test]
    fn test_average_batches() {
        let input = [
            r#"{"schema_version":"stream.raw_batch.v1","stream":"CAPS_dual","times":[0,20,40],"values":[[1,2,3],[0,0,0]]}"#,
            r#"{"schema_version":"stream.raw_batch.v1","stream":"CAPS_dual","times":[60,80],"values":[[10,null],[0,0]]}"#,
        ]
        .join("\n");
        let exports = average_batches(sample_config(), &input).unwrap();
        assert_eq!(exports.len(), 1);
        let caps = &exports[0];
        assert_eq!(caps.channels, vec!["Ext_dry".to_string(), "Zero_dry_CAPS".to_string()]);
        assert_eq!(caps.times.len(), 60);
        assert_eq!(caps.mean[0][0], Some(2.0));
        assert_eq!(caps.mean[0][1], Some(10.0));
        assert_eq!(caps.mean[0][2], None);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(average_batches("not valid json", "").is_err());
        assert!(average_batches(sample_config(), "{broken").is_err());
        assert!(average_batches(sample_config(), "").unwrap().is_empty());
    }
}
