//! Stream merge engine
//!
//! A [`RawBlock`] is one validated (time, data, header) triple: `values` has
//! one row per channel and one column per timestamp. Merging never mutates
//! the existing block; it builds a new one that the caller installs once the
//! whole operation has succeeded.
//!
//! Two merge axes are supported:
//! - [`merge_samples`] appends incoming samples along the time axis after
//!   reconciling the channel lists (raw accumulation).
//! - [`merge_channels`] adds incoming channels as new rows, reconciling the
//!   time bases by direct concatenation or edge-held interpolation (derived
//!   products).

mod headers;
mod interp;

pub use headers::{is_numeric_header, merge_headers, numeric_name, permute_rows, HeaderMerge};
pub use interp::interp_edge_held;

use crate::error::StreamError;
use crate::nan_serde;
use crate::registry::ColumnRegistry;
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Axis order of an incoming value matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One row per channel, one column per timestamp
    #[default]
    ChannelMajor,
    /// One row per timestamp, one column per channel
    TimeMajor,
}

/// How [`merge_samples`] treats the channel lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderPolicy {
    /// Headers are assumed identical; a row count mismatch is an error
    #[default]
    Strict,
    /// Channel lists are reconciled with NaN backfill
    Reconcile,
}

/// Validated (time, data, header) triple
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawBlockRepr", into = "RawBlockRepr")]
pub struct RawBlock {
    times: Array1<f64>,
    values: Array2<f64>,
    names: Vec<String>,
}

/// Serialized form of a [`RawBlock`]; rebuilt through [`RawBlock::new`]
#[derive(Serialize, Deserialize)]
pub(crate) struct RawBlockRepr {
    #[serde(with = "nan_serde::vector")]
    times: Array1<f64>,
    #[serde(with = "nan_serde::matrix")]
    values: Array2<f64>,
    names: Vec<String>,
}

impl RawBlockRepr {
    pub(crate) fn is_time_sorted(&self) -> bool {
        is_sorted(self.times.view())
    }
}

impl From<RawBlock> for RawBlockRepr {
    fn from(block: RawBlock) -> Self {
        Self {
            times: block.times,
            values: block.values,
            names: block.names,
        }
    }
}

impl TryFrom<RawBlockRepr> for RawBlock {
    type Error = StreamError;

    fn try_from(repr: RawBlockRepr) -> Result<Self, Self::Error> {
        Self::new(repr.times, repr.values, repr.names)
    }
}

impl Default for RawBlock {
    fn default() -> Self {
        Self::empty()
    }
}

impl RawBlock {
    /// Block with no channels and no samples
    pub fn empty() -> Self {
        Self {
            times: Array1::zeros(0),
            values: Array2::zeros((0, 0)),
            names: Vec::new(),
        }
    }

    /// Build a block from channel-major values.
    ///
    /// Samples are stably re-sorted by time when they arrive out of order.
    pub fn new(times: Array1<f64>, values: Array2<f64>, names: Vec<String>) -> Result<Self, StreamError> {
        let (rows, cols) = values.dim();
        if rows != names.len() {
            return Err(StreamError::shape("value rows vs channel names", names.len(), rows));
        }
        if cols != times.len() {
            return Err(StreamError::shape("value columns vs timestamps", times.len(), cols));
        }
        ColumnRegistry::build(&names)?;
        Ok(Self { times, values, names }.into_time_sorted())
    }

    /// Build a block from values in the stated layout.
    pub fn with_layout(
        times: Array1<f64>,
        values: Array2<f64>,
        names: Vec<String>,
        layout: Layout,
    ) -> Result<Self, StreamError> {
        let values = match layout {
            Layout::ChannelMajor => values,
            Layout::TimeMajor => values.reversed_axes().as_standard_layout().into_owned(),
        };
        Self::new(times, values, names)
    }

    /// Build a single-channel block, promoting the vector to a `(1, T)` matrix.
    pub fn from_vector(times: Array1<f64>, values: Array1<f64>, name: impl Into<String>) -> Result<Self, StreamError> {
        Self::new(times, values.insert_axis(Axis(0)), vec![name.into()])
    }

    /// Build a block from per-channel rows.
    pub fn from_rows(times: Vec<f64>, rows: Vec<Vec<f64>>, names: Vec<String>) -> Result<Self, StreamError> {
        let n_times = times.len();
        let n_rows = rows.len();
        let mut data = Vec::with_capacity(n_rows * n_times);
        for row in rows {
            if row.len() != n_times {
                return Err(StreamError::shape("row length vs timestamps", n_times, row.len()));
            }
            data.extend(row);
        }
        let values = Array2::from_shape_vec((n_rows, n_times), data)
            .map_err(|e| StreamError::Parse(e.to_string()))?;
        Self::new(Array1::from(times), values, names)
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn n_channels(&self) -> usize {
        self.names.len()
    }

    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn first_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    pub fn last_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    pub fn is_time_sorted(&self) -> bool {
        is_sorted(self.times.view())
    }

    /// Keep only the samples for which `keep` is true.
    pub fn retain_samples(&self, keep: &[bool]) -> Result<Self, StreamError> {
        if keep.len() != self.n_samples() {
            return Err(StreamError::shape("sample mask vs timestamps", self.n_samples(), keep.len()));
        }
        let indices: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect();
        Ok(Self {
            times: self.times.select(Axis(0), &indices),
            values: self.values.select(Axis(1), &indices),
            names: self.names.clone(),
        })
    }

    /// Sort samples by time (stable) when they are not already ordered.
    fn into_time_sorted(self) -> Self {
        if self.is_time_sorted() {
            return self;
        }
        log::debug!("re-sorting {} samples by time", self.n_samples());
        let mut order: Vec<usize> = (0..self.n_samples()).collect();
        order.sort_by(|&a, &b| self.times[a].total_cmp(&self.times[b]));
        Self {
            times: self.times.select(Axis(0), &order),
            values: self.values.select(Axis(1), &order),
            names: self.names,
        }
    }
}

fn is_sorted(times: ArrayView1<'_, f64>) -> bool {
    times.windows(2).into_iter().all(|w| w[0] <= w[1])
}

fn times_equal(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

fn check_rows(context: &str, values: &Array2<f64>, names: &[String]) -> Result<(), StreamError> {
    if values.nrows() != names.len() {
        return Err(StreamError::shape(context, names.len(), values.nrows()));
    }
    Ok(())
}

/// Append `incoming` samples to `existing` along the time axis.
///
/// An existing block without samples is replaced by `incoming` wholesale.
/// With [`HeaderPolicy::Reconcile`] the channel lists are unified through
/// [`merge_headers`] and missing channels are NaN-filled on either side.
/// The result is re-sorted by time when the appended samples are out of order.
pub fn merge_samples(
    existing: &RawBlock,
    incoming: RawBlock,
    policy: HeaderPolicy,
) -> Result<RawBlock, StreamError> {
    if existing.is_empty() {
        return Ok(incoming.into_time_sorted());
    }

    let (names, existing_values, incoming_values) = match policy {
        HeaderPolicy::Strict => {
            if incoming.n_channels() != existing.n_channels() {
                return Err(StreamError::shape(
                    "incoming rows vs existing channel names",
                    existing.n_channels(),
                    incoming.n_channels(),
                ));
            }
            (existing.names.clone(), existing.values.clone(), incoming.values)
        }
        HeaderPolicy::Reconcile => {
            let merged = merge_headers(&existing.names, &incoming.names)?;
            let existing_values = if merged.is_identity_for_existing() {
                existing.values.clone()
            } else {
                permute_rows(existing.values.view(), &merged.existing_rows)
            };
            let incoming_values = permute_rows(incoming.values.view(), &merged.incoming_rows);
            if merged.names.len() != existing.n_channels() {
                log::debug!(
                    "header reconciliation grew channels {} -> {} (numeric: {})",
                    existing.n_channels(),
                    merged.names.len(),
                    merged.numeric
                );
            }
            (merged.names, existing_values, incoming_values)
        }
    };

    check_rows("existing rows vs reconciled names", &existing_values, &names)?;
    check_rows("incoming rows vs reconciled names", &incoming_values, &names)?;

    let times = concatenate(Axis(0), &[existing.times.view(), incoming.times.view()])
        .map_err(|e| StreamError::Parse(e.to_string()))?;
    let values = concatenate(Axis(1), &[existing_values.view(), incoming_values.view()])
        .map_err(|e| StreamError::Parse(e.to_string()))?;

    Ok(RawBlock { times, values, names }.into_time_sorted())
}

/// Join `incoming` channels onto `existing` as new rows.
///
/// When the time bases are pointwise equal the rows are concatenated as-is.
/// Otherwise every incoming channel is interpolated onto the existing times
/// with [`interp_edge_held`]. Name collisions fail with `DuplicateName`.
pub fn merge_channels(existing: &RawBlock, incoming: RawBlock) -> Result<RawBlock, StreamError> {
    if existing.n_channels() == 0 && existing.is_empty() {
        return Ok(incoming.into_time_sorted());
    }

    let mut names = existing.names.clone();
    names.extend(incoming.names.iter().cloned());
    ColumnRegistry::build(&names)?;

    if existing.is_empty() {
        // no time base yet: adopt the incoming one, existing channels have no data
        let incoming = incoming.into_time_sorted();
        let filler = Array2::from_elem((existing.n_channels(), incoming.n_samples()), f64::NAN);
        let values = concatenate(Axis(0), &[filler.view(), incoming.values.view()])
            .map_err(|e| StreamError::Parse(e.to_string()))?;
        return Ok(RawBlock {
            times: incoming.times,
            values,
            names,
        });
    }

    let aligned = if times_equal(existing.times.view(), incoming.times.view()) {
        incoming.values
    } else {
        log::debug!(
            "interpolating {} channel(s) from {} onto {} timestamps",
            incoming.n_channels(),
            incoming.n_samples(),
            existing.n_samples()
        );
        let mut aligned = Array2::from_elem((incoming.n_channels(), existing.n_samples()), f64::NAN);
        for (i, row) in incoming.values.rows().into_iter().enumerate() {
            let interpolated = interp_edge_held(existing.times.view(), incoming.times.view(), row);
            aligned.row_mut(i).assign(&interpolated);
        }
        aligned
    };

    let values = concatenate(Axis(0), &[existing.values.view(), aligned.view()])
        .map_err(|e| StreamError::Parse(e.to_string()))?;
    let block = RawBlock {
        times: existing.times.clone(),
        values,
        names,
    };
    check_rows("merged rows vs channel names", &block.values, &block.names)?;
    Ok(block)
}
