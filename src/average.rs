//! Time-bucketed averaging
//!
//! Raw samples are reduced onto a grid of fixed-width buckets. Bucket `k`
//! covers the half-open interval `[edges[k], edges[k + 1])` and gets the
//! NaN-ignoring mean and population standard deviation of every channel.
//! The grid starts on a floor-rounded boundary (hours by default) and ends
//! on a ceil-rounded one unless a fixed window is configured.

use crate::error::StreamError;
use crate::merge::RawBlock;
use crate::nan_serde;
use crate::rounding::{round_to_base, RoundMode};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Default rounding base for grid boundaries (one hour)
pub const DEFAULT_ROUNDING_BASE_SEC: f64 = 3600.0;

/// Default bucket width in seconds
pub const DEFAULT_BUCKET_WIDTH_SEC: f64 = 60.0;

/// Upper bound on the number of buckets in one grid
pub const MAX_BUCKETS: usize = 50_000_000;

/// Number of `width` buckets needed to cover `[start, end)`, bounded by [`MAX_BUCKETS`].
fn bucket_count(start: f64, end: f64, width: f64) -> Result<usize, StreamError> {
    if !(width > 0.0) || !width.is_finite() {
        return Err(StreamError::InvalidArgument(format!(
            "bucket width must be positive, got {width}"
        )));
    }
    if !(end > start) {
        return Ok(0);
    }
    let n = ((end - start) / width).ceil();
    if !n.is_finite() || n > MAX_BUCKETS as f64 {
        return Err(StreamError::InvalidArgument(format!(
            "{width}s buckets over [{start}, {end}) exceed {MAX_BUCKETS} buckets"
        )));
    }
    Ok(n as usize)
}

fn default_rounding_base() -> f64 {
    DEFAULT_ROUNDING_BASE_SEC
}

/// Parameters controlling the bucket grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AveragingParams {
    /// Bucket width in seconds
    pub bucket_width_sec: f64,
    /// Base used to floor/ceil the automatic grid bounds
    #[serde(default = "default_rounding_base")]
    pub rounding_base_sec: f64,
    /// Fixed grid start (epoch seconds), overrides floor rounding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<f64>,
    /// Fixed grid end (epoch seconds); a fixed end never auto-extends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<f64>,
}

impl Default for AveragingParams {
    fn default() -> Self {
        Self::with_width(DEFAULT_BUCKET_WIDTH_SEC)
    }
}

impl AveragingParams {
    pub fn with_width(bucket_width_sec: f64) -> Self {
        Self {
            bucket_width_sec,
            rounding_base_sec: DEFAULT_ROUNDING_BASE_SEC,
            window_start: None,
            window_end: None,
        }
    }

    pub fn with_window(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.window_start = start;
        self.window_end = end;
        self
    }

    /// Apply the given overrides, keeping the current value where `None`.
    pub fn with_overrides(
        mut self,
        bucket_width_sec: Option<f64>,
        window_start: Option<f64>,
        window_end: Option<f64>,
    ) -> Self {
        if let Some(width) = bucket_width_sec {
            self.bucket_width_sec = width;
        }
        if window_start.is_some() {
            self.window_start = window_start;
        }
        if window_end.is_some() {
            self.window_end = window_end;
        }
        self
    }

    /// Check every field before any computation uses it.
    pub fn validate(&self) -> Result<(), StreamError> {
        if !(self.bucket_width_sec > 0.0) || !self.bucket_width_sec.is_finite() {
            return Err(StreamError::InvalidArgument(format!(
                "bucket width must be positive, got {}",
                self.bucket_width_sec
            )));
        }
        if !(self.rounding_base_sec > 0.0) || !self.rounding_base_sec.is_finite() {
            return Err(StreamError::InvalidArgument(format!(
                "rounding base must be positive, got {}",
                self.rounding_base_sec
            )));
        }
        for bound in [self.window_start, self.window_end].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(StreamError::InvalidArgument(format!(
                    "window bound must be finite, got {bound}"
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.window_start, self.window_end) {
            if start >= end {
                return Err(StreamError::InvalidArgument(format!(
                    "window start {start} must be before window end {end}"
                )));
            }
            bucket_count(start, end, self.bucket_width_sec)?;
        }
        Ok(())
    }
}

/// Lifecycle of a series' bucket grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridState {
    /// No grid has been built yet
    Uninitialized,
    /// The grid covers every raw sample
    Initialized,
    /// Raw data reaches past the last edge and the grid must grow
    Stale,
}

/// Arithmetic progression of bucket edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketGrid {
    origin: f64,
    width: f64,
    edges: Vec<f64>,
}

impl BucketGrid {
    /// Buckets of `width` starting at `start`, enough of them to reach `end`.
    ///
    /// Matches `arange(start, end, width)` for the bucket starts; the final
    /// edge closes the last bucket. Fails on a non-positive width or more
    /// than [`MAX_BUCKETS`] buckets.
    pub fn span(start: f64, end: f64, width: f64) -> Result<Self, StreamError> {
        if !start.is_finite() {
            return Err(StreamError::InvalidArgument(format!("grid start {start} is not finite")));
        }
        let n_buckets = bucket_count(start, end, width)?;
        let edges = (0..=n_buckets).map(|k| start + k as f64 * width).collect();
        Ok(Self {
            origin: start,
            width,
            edges,
        })
    }

    /// True when this grid is a well-formed progression of `width` buckets.
    ///
    /// Grids restored from snapshots are checked with this before use.
    pub fn is_consistent_with(&self, width: f64) -> bool {
        self.width == width
            && self.width > 0.0
            && self.width.is_finite()
            && self.origin.is_finite()
            && self.edges.len() <= MAX_BUCKETS + 1
            && !self.edges.is_empty()
            && self
                .edges
                .iter()
                .enumerate()
                .all(|(k, &edge)| edge == self.origin + k as f64 * self.width)
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Left edge of every bucket
    pub fn starts(&self) -> &[f64] {
        &self.edges[..self.n_buckets()]
    }

    pub fn n_buckets(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn first_edge(&self) -> f64 {
        self.origin
    }

    pub fn last_edge(&self) -> f64 {
        self.edges.last().copied().unwrap_or(self.origin)
    }

    /// Append buckets until the last edge reaches `end`. Returns how many were added.
    pub fn extend_to(&mut self, end: f64) -> Result<usize, StreamError> {
        let target = bucket_count(self.origin, end, self.width)?;
        let mut added = 0;
        while self.last_edge() < end && self.edges.len() <= target {
            let k = self.edges.len();
            self.edges.push(self.origin + k as f64 * self.width);
            added += 1;
        }
        Ok(added)
    }
}

/// Ceil `t` onto `base`, moving one base further when `t` already sits on a
/// boundary so the half-open last bucket still contains `t`.
pub fn covering_end(t: f64, base: f64) -> Result<f64, StreamError> {
    let end = round_to_base(t, base, RoundMode::Ceil)?;
    Ok(if end <= t { end + base } else { end })
}

/// Build the first grid for `times` under `params`.
///
/// Returns `None` when there is no data and the window does not pin both bounds.
pub fn initial_grid(
    times: ArrayView1<'_, f64>,
    params: &AveragingParams,
) -> Result<Option<BucketGrid>, StreamError> {
    params.validate()?;
    let first = times.iter().copied().find(|t| t.is_finite());
    let last = times.iter().rev().copied().find(|t| t.is_finite());

    let start = match (params.window_start, first) {
        (Some(start), _) => start,
        (None, Some(first)) => round_to_base(first, params.rounding_base_sec, RoundMode::Floor)?,
        (None, None) => return Ok(None),
    };
    let end = match (params.window_end, last) {
        (Some(end), _) => end,
        (None, Some(last)) => covering_end(last, params.rounding_base_sec)?,
        (None, None) => return Ok(None),
    };
    BucketGrid::span(start, end, params.bucket_width_sec).map(Some)
}

/// Per-bucket statistics, one row per channel and one column per bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketStats {
    #[serde(with = "nan_serde::matrix")]
    pub means: Array2<f64>,
    #[serde(with = "nan_serde::matrix")]
    pub stds: Array2<f64>,
}

impl BucketStats {
    /// NaN-filled statistics of the given shape
    pub fn nan(n_channels: usize, n_buckets: usize) -> Self {
        Self {
            means: Array2::from_elem((n_channels, n_buckets), f64::NAN),
            stds: Array2::from_elem((n_channels, n_buckets), f64::NAN),
        }
    }

    pub fn n_buckets(&self) -> usize {
        self.means.len_of(Axis(1))
    }
}

/// Welford accumulator for the NaN-ignoring mean and population std
#[derive(Debug, Clone, Copy, Default)]
struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    fn update(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn finish(&self) -> (f64, f64) {
        if self.count == 0 {
            (f64::NAN, f64::NAN)
        } else {
            (self.mean, (self.m2 / self.count as f64).sqrt())
        }
    }
}

/// Reduce raw samples onto `edges`.
///
/// `times` must be non-decreasing; [`RawBlock`] keeps that invariant. A
/// single forward sweep visits every sample at most once, so the cost is
/// linear in samples plus buckets regardless of the sampling rate.
pub fn average(times: ArrayView1<'_, f64>, values: ArrayView2<'_, f64>, edges: &[f64]) -> BucketStats {
    let n_channels = values.nrows();
    let n_buckets = edges.len().saturating_sub(1);
    let mut stats = BucketStats::nan(n_channels, n_buckets);
    let n = times.len();

    let mut lo = 0usize;
    for k in 0..n_buckets {
        let (lower, upper) = (edges[k], edges[k + 1]);
        while lo < n && times[lo] < lower {
            lo += 1;
        }
        let mut hi = lo;
        while hi < n && times[hi] < upper {
            hi += 1;
        }
        if hi == lo {
            continue;
        }
        for ch in 0..n_channels {
            let mut acc = RunningStats::default();
            for i in lo..hi {
                let v = values[[ch, i]];
                if !v.is_nan() {
                    acc.update(v);
                }
            }
            let (mean, std) = acc.finish();
            stats.means[[ch, k]] = mean;
            stats.stds[[ch, k]] = std;
        }
        lo = hi;
    }
    stats
}

/// Pure bucket computation for a raw block on a grid.
pub fn compute(raw: &RawBlock, grid: &BucketGrid) -> BucketStats {
    average(raw.times(), raw.values(), grid.edges())
}
