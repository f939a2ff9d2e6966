//! Series: raw samples plus a lazily derived bucketed view
//!
//! A series owns one [`RawBlock`] and caches its bucket grid and statistics.
//! Raw mutations drop the cached statistics; the grid is kept and grown
//! forward on the next read. Changing the bucket width or window goes
//! through [`Series::reaverage`], which discards the grid as well.

use crate::average::{self, AveragingParams, BucketGrid, BucketStats, GridState};
use crate::error::StreamError;
use crate::merge::{self, HeaderPolicy, RawBlock, RawBlockRepr};
use crate::registry::ColumnRegistry;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// One instrument time-series
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SeriesSnapshot", into = "SeriesSnapshot")]
pub struct Series {
    registry: ColumnRegistry,
    raw: RawBlock,
    params: AveragingParams,
    grid: Option<BucketGrid>,
    stats: Option<BucketStats>,
}

impl Default for Series {
    fn default() -> Self {
        Self {
            registry: ColumnRegistry::default(),
            raw: RawBlock::empty(),
            params: AveragingParams::default(),
            grid: None,
            stats: None,
        }
    }
}

impl Series {
    /// Create an empty series with the given averaging parameters
    pub fn new(params: AveragingParams) -> Result<Self, StreamError> {
        params.validate()?;
        Ok(Self {
            params,
            ..Self::default()
        })
    }

    /// Create an empty series averaging into buckets of `bucket_width_sec`
    pub fn with_width(bucket_width_sec: f64) -> Result<Self, StreamError> {
        Self::new(AveragingParams::with_width(bucket_width_sec))
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Accumulate a batch of raw samples.
    ///
    /// Use [`HeaderPolicy::Reconcile`] when the batch may carry a different
    /// channel set (e.g. sizer bins); [`HeaderPolicy::Strict`] requires the
    /// same number of channels. On error the series is left untouched.
    pub fn merge(&mut self, batch: RawBlock, policy: HeaderPolicy) -> Result<(), StreamError> {
        let merged = merge::merge_samples(&self.raw, batch, policy)?;
        self.install(merged)?;
        Ok(())
    }

    /// Add fully processed channels computed from (or aligned to) this series.
    ///
    /// Channels on a different time base are interpolated onto the raw
    /// times. The bucketed view is always recomputed afterwards.
    pub fn append_derived(&mut self, batch: RawBlock) -> Result<(), StreamError> {
        let merged = merge::merge_channels(&self.raw, batch)?;
        self.install(merged)?;
        self.reaverage(None, None, None)
    }

    /// Drop every sample where one of `flag_channels` is non-zero.
    ///
    /// Instruments mark zeroing or calibration periods with such flags.
    /// NaN flags do not drop a sample. Returns the number of samples removed.
    pub fn drop_flagged(&mut self, flag_channels: &[&str]) -> Result<usize, StreamError> {
        let rows = self.registry.resolve(flag_channels)?;
        let values = self.raw.values();
        let keep: Vec<bool> = (0..self.raw.n_samples())
            .map(|i| rows.iter().all(|&r| {
                let flag = values[[r, i]];
                flag.is_nan() || flag == 0.0
            }))
            .collect();
        let removed = keep.iter().filter(|k| !**k).count();
        if removed > 0 {
            let kept = self.raw.retain_samples(&keep)?;
            self.install(kept)?;
        }
        Ok(removed)
    }

    /// Throw away the grid and statistics, apply any new parameters and
    /// recompute from raw data.
    pub fn reaverage(
        &mut self,
        bucket_width_sec: Option<f64>,
        window_start: Option<f64>,
        window_end: Option<f64>,
    ) -> Result<(), StreamError> {
        let params = self
            .params
            .with_overrides(bucket_width_sec, window_start, window_end);
        self.reaverage_with(params)
    }

    /// Replace all averaging parameters (including clearing a window) and recompute.
    pub fn reaverage_with(&mut self, params: AveragingParams) -> Result<(), StreamError> {
        params.validate()?;
        log::debug!(
            "reaveraging {} channel(s) at {}s buckets",
            self.raw.n_channels(),
            params.bucket_width_sec
        );
        self.params = params;
        self.grid = None;
        self.stats = None;
        self.ensure_averaged()
    }

    fn install(&mut self, raw: RawBlock) -> Result<(), StreamError> {
        let registry = ColumnRegistry::build(raw.names())?;
        self.registry = registry;
        self.raw = raw;
        self.stats = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bucketed view
    // ------------------------------------------------------------------

    /// Where the bucket grid stands relative to the raw data.
    pub fn grid_state(&self) -> GridState {
        match &self.grid {
            None => GridState::Uninitialized,
            Some(grid) => match (self.params.window_end, self.raw.last_time()) {
                (None, Some(last)) if grid.last_edge() <= last => GridState::Stale,
                _ => GridState::Initialized,
            },
        }
    }

    /// True when the cached statistics match the current raw data.
    pub fn is_averaged(&self) -> bool {
        self.stats.is_some()
    }

    /// Build or extend the grid and compute statistics if they are missing.
    pub fn ensure_averaged(&mut self) -> Result<(), StreamError> {
        match self.grid_state() {
            GridState::Uninitialized => {
                self.grid = average::initial_grid(self.raw.times(), &self.params)?;
                self.stats = None;
            }
            GridState::Stale => {
                if let (Some(grid), Some(last)) = (self.grid.as_mut(), self.raw.last_time()) {
                    let end = average::covering_end(last, self.params.rounding_base_sec)?;
                    let added = grid.extend_to(end)?;
                    log::debug!("extended bucket grid by {added} bucket(s) to {end}");
                }
                self.stats = None;
            }
            GridState::Initialized => {}
        }

        // samples before an automatic grid start: rebuild from scratch
        if let (Some(grid), Some(first), None) =
            (&self.grid, self.raw.first_time(), self.params.window_start)
        {
            if first < grid.first_edge() {
                self.grid = average::initial_grid(self.raw.times(), &self.params)?;
                self.stats = None;
            }
        }

        if self.stats.is_none() {
            if let Some(grid) = &self.grid {
                self.stats = Some(average::compute(&self.raw, grid));
            }
        }
        Ok(())
    }

    fn rows_for(&self, channels: Option<&[&str]>) -> Result<Option<Vec<usize>>, StreamError> {
        channels.map(|names| self.registry.resolve(names)).transpose()
    }

    fn select(matrix: ArrayView2<'_, f64>, rows: Option<Vec<usize>>) -> Array2<f64> {
        match rows {
            Some(rows) => matrix.select(Axis(0), &rows),
            None => matrix.to_owned(),
        }
    }

    fn empty_view(&self, rows: &Option<Vec<usize>>) -> Array2<f64> {
        let n = rows.as_ref().map_or(self.raw.n_channels(), Vec::len);
        Array2::zeros((n, 0))
    }

    /// Bucket means (or raw samples when `raw`), optionally for a channel subset.
    pub fn return_data(&mut self, channels: Option<&[&str]>, raw: bool) -> Result<Array2<f64>, StreamError> {
        let rows = self.rows_for(channels)?;
        if raw {
            return Ok(Self::select(self.raw.values(), rows));
        }
        self.ensure_averaged()?;
        Ok(match &self.stats {
            Some(stats) => Self::select(stats.means.view(), rows),
            None => self.empty_view(&rows),
        })
    }

    /// Bucket standard deviations, optionally for a channel subset.
    ///
    /// With `raw` the raw samples are returned, as for [`Series::return_data`].
    pub fn return_std(&mut self, channels: Option<&[&str]>, raw: bool) -> Result<Array2<f64>, StreamError> {
        let rows = self.rows_for(channels)?;
        if raw {
            return Ok(Self::select(self.raw.values(), rows));
        }
        self.ensure_averaged()?;
        Ok(match &self.stats {
            Some(stats) => Self::select(stats.stds.view(), rows),
            None => self.empty_view(&rows),
        })
    }

    /// Bucket start times (or raw timestamps when `raw`) in epoch seconds.
    pub fn return_time(&mut self, raw: bool) -> Result<Array1<f64>, StreamError> {
        if raw {
            return Ok(self.raw.times().to_owned());
        }
        self.ensure_averaged()?;
        Ok(match &self.grid {
            Some(grid) => Array1::from(grid.starts().to_vec()),
            None => Array1::zeros(0),
        })
    }

    /// Same as [`Series::return_time`], as calendar datetimes in UTC.
    pub fn return_datetimes(&mut self, raw: bool) -> Result<Vec<DateTime<Utc>>, StreamError> {
        self.return_time(raw)?.iter().map(|&t| epoch_to_datetime(t)).collect()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn channel_names(&self) -> &[String] {
        self.registry.names()
    }

    pub fn registry(&self) -> &ColumnRegistry {
        &self.registry
    }

    pub fn raw(&self) -> &RawBlock {
        &self.raw
    }

    pub fn raw_times(&self) -> ArrayView1<'_, f64> {
        self.raw.times()
    }

    pub fn raw_values(&self) -> ArrayView2<'_, f64> {
        self.raw.values()
    }

    pub fn params(&self) -> &AveragingParams {
        &self.params
    }

    pub fn bucket_edges(&self) -> Option<&[f64]> {
        self.grid.as_ref().map(BucketGrid::edges)
    }

    pub fn bucket_stats(&self) -> Option<&BucketStats> {
        self.stats.as_ref()
    }

    pub fn n_channels(&self) -> usize {
        self.raw.n_channels()
    }

    pub fn n_samples(&self) -> usize {
        self.raw.n_samples()
    }

    /// Load a series snapshot from JSON
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the series, including the bucketed view, to JSON
    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Convert epoch seconds to a UTC datetime.
pub fn epoch_to_datetime(t: f64) -> Result<DateTime<Utc>, StreamError> {
    if !t.is_finite() {
        return Err(StreamError::InvalidArgument(format!("timestamp {t} is not finite")));
    }
    let secs = t.floor();
    let nanos = ((t - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
        .ok_or_else(|| StreamError::InvalidArgument(format!("timestamp {t} is out of range")))
}

/// Serialized form of a [`Series`]; checked on the way back in
#[derive(Serialize, Deserialize)]
struct SeriesSnapshot {
    raw: RawBlockRepr,
    params: AveragingParams,
    #[serde(default)]
    grid: Option<BucketGrid>,
    #[serde(default)]
    stats: Option<BucketStats>,
}

impl From<Series> for SeriesSnapshot {
    fn from(series: Series) -> Self {
        Self {
            raw: series.raw.into(),
            params: series.params,
            grid: series.grid,
            stats: series.stats,
        }
    }
}

impl TryFrom<SeriesSnapshot> for Series {
    type Error = StreamError;

    fn try_from(snapshot: SeriesSnapshot) -> Result<Self, Self::Error> {
        let params = snapshot.params;
        params.validate()?;
        // statistics computed over out-of-order samples cannot be trusted
        let was_sorted = snapshot.raw.is_time_sorted();
        let raw = RawBlock::try_from(snapshot.raw)?;
        let registry = ColumnRegistry::build(raw.names())?;
        let grid = match snapshot.grid {
            Some(grid) if grid.is_consistent_with(params.bucket_width_sec) => Some(grid),
            Some(_) => {
                log::warn!("discarding malformed bucket grid from snapshot");
                None
            }
            None => None,
        };
        let stats = match (&grid, snapshot.stats) {
            (Some(grid), Some(stats))
                if was_sorted
                    && stats.n_buckets() == grid.n_buckets()
                    && stats.means.nrows() == raw.n_channels()
                    && stats.stds.dim() == stats.means.dim() =>
            {
                Some(stats)
            }
            // inconsistent or orphaned statistics are recomputed on demand
            _ => None,
        };
        Ok(Self {
            registry,
            raw,
            params,
            grid,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn gas_batch(start: f64, n: usize, step: f64) -> RawBlock {
        let times: Vec<f64> = (0..n).map(|i| start + i as f64 * step).collect();
        let co2: Vec<f64> = (0..n).map(|i| 400.0 + i as f64).collect();
        let h2o: Vec<f64> = vec![10.0; n];
        RawBlock::from_rows(times, vec![co2, h2o], strings(&["CO2", "H2O"])).unwrap()
    }

    #[test]
    fn test_new_series_is_empty() {
        let mut series = Series::with_width(60.0).unwrap();
        assert_eq!(series.n_channels(), 0);
        assert_eq!(series.grid_state(), GridState::Uninitialized);
        assert_eq!(series.return_data(None, false).unwrap().dim(), (0, 0));
        assert_eq!(series.return_time(false).unwrap().len(), 0);
        assert!(Series::with_width(0.0).is_err());
    }

    #[test]
    fn test_lazy_average_and_bucket_invariant() {
        let mut series = Series::with_width(600.0).unwrap();
        series.merge(gas_batch(0.0, 100, 10.0), HeaderPolicy::Strict).unwrap();
        assert!(!series.is_averaged());
        assert_eq!(series.grid_state(), GridState::Uninitialized);

        let means = series.return_data(None, false).unwrap();
        assert!(series.is_averaged());
        assert_eq!(series.grid_state(), GridState::Initialized);
        let edges = series.bucket_edges().unwrap();
        assert_eq!(edges.len() - 1, means.ncols());
        // [0, 3600) in 600 s buckets
        assert_eq!(means.ncols(), 6);
        assert_eq!(means[[1, 0]], 10.0);
        assert!(means[[0, 2]].is_nan());
    }

    #[test]
    fn test_grid_goes_stale_and_extends() {
        let mut series = Series::with_width(600.0).unwrap();
        series.merge(gas_batch(0.0, 10, 60.0), HeaderPolicy::Strict).unwrap();
        series.ensure_averaged().unwrap();
        assert_eq!(series.bucket_edges().unwrap().last(), Some(&3600.0));

        series.merge(gas_batch(5000.0, 10, 60.0), HeaderPolicy::Strict).unwrap();
        assert_eq!(series.grid_state(), GridState::Stale);
        assert!(!series.is_averaged());

        let means = series.return_data(Some(&["CO2"]), false).unwrap();
        assert_eq!(series.grid_state(), GridState::Initialized);
        assert_eq!(series.bucket_edges().unwrap().last(), Some(&7200.0));
        assert_eq!(means.dim(), (1, 12));
        assert!(means[[0, 8]].is_finite());
    }

    #[test]
    fn test_fixed_window_never_extends() {
        let mut series = Series::new(
            AveragingParams::with_width(600.0).with_window(Some(0.0), Some(1200.0)),
        )
        .unwrap();
        series.merge(gas_batch(0.0, 100, 60.0), HeaderPolicy::Strict).unwrap();
        let times = series.return_time(false).unwrap();
        assert_eq!(times.to_vec(), vec![0.0, 600.0]);
        assert_eq!(series.grid_state(), GridState::Initialized);
    }

    #[test]
    fn test_earlier_samples_rebuild_grid() {
        let mut series = Series::with_width(600.0).unwrap();
        series.merge(gas_batch(7200.0, 5, 60.0), HeaderPolicy::Strict).unwrap();
        series.ensure_averaged().unwrap();
        series.merge(gas_batch(100.0, 5, 60.0), HeaderPolicy::Strict).unwrap();
        let times = series.return_time(false).unwrap();
        assert_eq!(times[0], 0.0);
        let means = series.return_data(None, false).unwrap();
        assert!(means[[0, 0]].is_finite());
    }

    #[test]
    fn test_reaverage_changes_width_and_is_deterministic() {
        let mut series = Series::with_width(60.0).unwrap();
        series.merge(gas_batch(0.0, 360, 10.0), HeaderPolicy::Strict).unwrap();
        assert_eq!(series.return_data(None, false).unwrap().ncols(), 60);

        series.reaverage(Some(300.0), None, None).unwrap();
        let first = series.return_data(None, false).unwrap();
        let first_std = series.return_std(None, false).unwrap();
        assert_eq!(first.ncols(), 12);
        series.reaverage(Some(300.0), None, None).unwrap();
        let second = series.return_data(None, false).unwrap();
        let second_std = series.return_std(None, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(first_std, second_std);
        assert_eq!(series.params().bucket_width_sec, 300.0);
    }

    #[test]
    fn test_reaverage_validates_before_discarding() {
        let mut series = Series::with_width(60.0).unwrap();
        series.merge(gas_batch(0.0, 10, 10.0), HeaderPolicy::Strict).unwrap();
        series.ensure_averaged().unwrap();
        assert!(series.reaverage(Some(-1.0), None, None).is_err());
        assert!(series.is_averaged());
        assert_eq!(series.params().bucket_width_sec, 60.0);
    }

    #[test]
    fn test_reaverage_with_window() {
        let mut series = Series::with_width(60.0).unwrap();
        series.merge(gas_batch(0.0, 100, 10.0), HeaderPolicy::Strict).unwrap();
        series.reaverage(None, Some(120.0), Some(480.0)).unwrap();
        assert_eq!(series.return_time(false).unwrap().to_vec(), vec![120.0, 180.0, 240.0, 300.0, 360.0, 420.0]);
        series
            .reaverage_with(AveragingParams::with_width(60.0))
            .unwrap();
        assert_eq!(series.return_time(false).unwrap()[0], 0.0);
    }

    #[test]
    fn test_failed_merge_leaves_series_untouched() {
        let mut series = Series::with_width(60.0).unwrap();
        series.merge(gas_batch(0.0, 10, 10.0), HeaderPolicy::Strict).unwrap();
        series.ensure_averaged().unwrap();
        let bad = RawBlock::from_vector(array![200.0], array![1.0], "CO2").unwrap();
        assert!(series.merge(bad, HeaderPolicy::Strict).is_err());
        assert_eq!(series.n_samples(), 10);
        assert!(series.is_averaged());
    }

    #[test]
    fn test_header_aware_merge_updates_registry() {
        let mut series = Series::with_width(60.0).unwrap();
        let first = RawBlock::from_rows(vec![0.0], vec![vec![1.0], vec![2.0]], strings(&["20.1", "80.3"])).unwrap();
        let second = RawBlock::from_rows(vec![10.0], vec![vec![3.0], vec![4.0]], strings(&["100.5", "50.2"])).unwrap();
        series.merge(first, HeaderPolicy::Reconcile).unwrap();
        series.merge(second, HeaderPolicy::Reconcile).unwrap();
        assert_eq!(series.channel_names(), &strings(&["20.1", "50.2", "80.3", "100.5"])[..]);
        assert_eq!(series.registry().resolve_one("100.5").unwrap(), 3);
        let raw = series.return_data(Some(&["50.2", "100.5"]), true).unwrap();
        assert!(raw[[0, 0]].is_nan());
        assert_eq!(raw[[0, 1]], 4.0);
        assert_eq!(raw[[1, 1]], 3.0);
    }

    #[test]
    fn test_unknown_channel_lookup() {
        let mut series = Series::with_width(60.0).unwrap();
        series.merge(gas_batch(0.0, 10, 10.0), HeaderPolicy::Strict).unwrap();
        let err = series.return_data(Some(&["CH4"]), false).unwrap_err();
        assert!(matches!(err, StreamError::UnknownChannel { ref known, .. } if known.len() == 2));
    }

    #[test]
    fn test_append_derived_interpolates_and_reaverages() {
        let mut series = Series::with_width(60.0).unwrap();
        series.merge(gas_batch(0.0, 12, 10.0), HeaderPolicy::Strict).unwrap();
        series.ensure_averaged().unwrap();

        let derived = RawBlock::from_vector(array![0.0, 110.0], array![0.0, 110.0], "ramp").unwrap();
        series.append_derived(derived).unwrap();
        assert!(series.is_averaged());
        assert_eq!(series.channel_names().len(), 3);

        let raw = series.return_data(Some(&["ramp"]), true).unwrap();
        assert_eq!(raw.row(0).to_vec(), (0..12).map(|i| i as f64 * 10.0).collect::<Vec<_>>());
        let means = series.return_data(Some(&["ramp"]), false).unwrap();
        assert!((means[[0, 0]] - 25.0).abs() < 1e-9);
        assert!((means[[0, 1]] - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_append_derived_same_time_base() {
        let mut series = Series::with_width(60.0).unwrap();
        let batch = gas_batch(0.0, 4, 10.0);
        let times = batch.times().to_owned();
        series.merge(batch, HeaderPolicy::Strict).unwrap();
        let ratio = series.return_data(Some(&["CO2"]), true).unwrap().row(0).mapv(|v| v / 10.0);
        series
            .append_derived(RawBlock::from_vector(times, ratio, "CO2_per_H2O").unwrap())
            .unwrap();
        let raw = series.return_data(Some(&["CO2_per_H2O"]), true).unwrap();
        assert_eq!(raw.row(0).to_vec(), vec![40.0, 40.1, 40.2, 40.3]);
    }

    #[test]
    fn test_drop_flagged() {
        let mut series = Series::with_width(60.0).unwrap();
        let batch = RawBlock::from_rows(
            vec![0.0, 10.0, 20.0, 30.0],
            vec![vec![1.0, 100.0, 3.0, f64::NAN], vec![0.0, 1.0, 0.0, f64::NAN]],
            strings(&["ext", "Zero"]),
        )
        .unwrap();
        series.merge(batch, HeaderPolicy::Strict).unwrap();
        assert_eq!(series.drop_flagged(&["Zero"]).unwrap(), 1);
        assert_eq!(series.raw_times().to_vec(), vec![0.0, 20.0, 30.0]);
        let means = series.return_data(Some(&["ext"]), false).unwrap();
        assert_eq!(means[[0, 0]], 2.0);
        assert!(series.drop_flagged(&["missing"]).is_err());
    }

    #[test]
    fn test_datetimes() {
        let mut series = Series::with_width(3600.0).unwrap();
        series
            .merge(gas_batch(1_700_000_000.0, 3, 60.0), HeaderPolicy::Strict)
            .unwrap();
        let raw = series.return_datetimes(true).unwrap();
        assert_eq!(raw[0].to_rfc3339(), "2023-11-14T22:13:20+00:00");
        let buckets = series.return_datetimes(false).unwrap();
        assert_eq!(buckets[0].to_rfc3339(), "2023-11-14T22:00:00+00:00");
        assert!(epoch_to_datetime(f64::NAN).is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut series = Series::with_width(60.0).unwrap();
        let batch = gas_batch(0.0, 30, 10.0);
        let batch = RawBlock::from_rows(
            batch.times().to_vec(),
            vec![batch.values().row(0).to_vec(), vec![f64::NAN; 30]],
            strings(&["CO2", "H2O"]),
        )
        .unwrap();
        series.merge(batch, HeaderPolicy::Strict).unwrap();
        series.ensure_averaged().unwrap();

        let json = series.to_json().unwrap();
        let mut loaded = Series::from_json(&json).unwrap();
        assert!(loaded.is_averaged());
        assert_eq!(loaded.channel_names(), series.channel_names());
        assert_eq!(loaded.bucket_edges(), series.bucket_edges());
        assert_eq!(loaded.params(), series.params());
        assert!(loaded.raw_values().row(1).iter().all(|v| v.is_nan()));
        let before = series.return_data(Some(&["CO2"]), false).unwrap();
        let after = loaded.return_data(Some(&["CO2"]), false).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_snapshot_keeps_infinite_values() {
        let mut series = Series::with_width(60.0).unwrap();
        series
            .merge(
                RawBlock::from_vector(array![0.0, 10.0, 20.0], array![f64::INFINITY, f64::NAN, -1.0], "ratio")
                    .unwrap(),
                HeaderPolicy::Strict,
            )
            .unwrap();
        let loaded = Series::from_json(&series.to_json().unwrap()).unwrap();
        let values = loaded.raw_values();
        assert_eq!(values[[0, 0]], f64::INFINITY);
        assert!(values[[0, 1]].is_nan());
        assert_eq!(values[[0, 2]], -1.0);
    }

    /// One-channel snapshot; `cache` holds the `grid` value and any fields after it
    fn snapshot_json(times: &str, data: &str, cache: &str) -> String {
        format!(
            r#"{{"raw":{{"times":{times},"values":{{"rows":1,"cols":3,"data":{data}}},"names":["ext"]}},"params":{{"bucket_width_sec":60.0}},"grid":{cache}}}"#
        )
    }

    #[test]
    fn test_restore_sorts_out_of_order_times() {
        let cache = r#"{"origin":0.0,"width":60.0,"edges":[0.0,60.0,120.0]},"stats":{"means":{"rows":1,"cols":2,"data":[99.0,99.0]},"stds":{"rows":1,"cols":2,"data":[0.0,0.0]}}"#;
        let json = snapshot_json("[100.0,0.0,50.0]", "[10.0,1.0,5.0]", cache);
        let mut series = Series::from_json(&json).unwrap();
        assert_eq!(series.raw_times().to_vec(), vec![0.0, 50.0, 100.0]);
        assert_eq!(series.raw_values().row(0).to_vec(), vec![1.0, 5.0, 10.0]);
        assert!(!series.is_averaged());

        let means = series.return_data(None, false).unwrap();
        assert_eq!(means[[0, 0]], 3.0);
        assert_eq!(means[[0, 1]], 10.0);
    }

    #[test]
    fn test_restore_discards_malformed_grid() {
        for grid in [
            r#"{"origin":0.0,"width":0.0,"edges":[0.0]}"#,
            r#"{"origin":0.0,"width":-60.0,"edges":[0.0,-60.0]}"#,
            r#"{"origin":0.0,"width":30.0,"edges":[0.0,30.0]}"#,
            r#"{"origin":0.0,"width":60.0,"edges":[]}"#,
        ] {
            let json = snapshot_json("[0.0,50.0,5000.0]", "[1.0,5.0,7.0]", grid);
            let mut series = Series::from_json(&json).unwrap();
            assert_eq!(series.grid_state(), GridState::Uninitialized);
            series.ensure_averaged().unwrap();
            let edges = series.bucket_edges().unwrap();
            assert_eq!(edges[1] - edges[0], 60.0);
            assert_eq!(edges.last(), Some(&7200.0));
            let means = series.return_data(None, false).unwrap();
            assert_eq!(means[[0, 0]], 3.0);
        }
    }
}
