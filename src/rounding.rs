//! Rounding to an arbitrary base
//!
//! Used to snap bucket boundaries onto round times (hours by default) and to
//! round values for display. `Round` uses half-to-even (banker's) rounding at
//! the granularity of the base, so 1.5 and 2.5 both become 2.0.

use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rounding direction for [`round_to_base`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundMode {
    Round,
    Floor,
    Ceil,
}

impl RoundMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundMode::Round => "round",
            RoundMode::Floor => "floor",
            RoundMode::Ceil => "ceil",
        }
    }
}

impl fmt::Display for RoundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundMode {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round" => Ok(RoundMode::Round),
            "floor" => Ok(RoundMode::Floor),
            "ceil" => Ok(RoundMode::Ceil),
            other => Err(StreamError::InvalidArgument(format!(
                "mode must be one of ['round', 'floor', 'ceil'], got '{other}'"
            ))),
        }
    }
}

fn check_base(base: f64) -> Result<(), StreamError> {
    if !(base > 0.0) || !base.is_finite() {
        return Err(StreamError::InvalidArgument(format!(
            "base must be a positive finite number, got {base}"
        )));
    }
    Ok(())
}

fn apply(value: f64, base: f64, mode: RoundMode) -> f64 {
    let scaled = value / base;
    let snapped = match mode {
        RoundMode::Round => scaled.round_ties_even(),
        RoundMode::Floor => scaled.floor(),
        RoundMode::Ceil => scaled.ceil(),
    };
    snapped * base
}

/// Round `value` to a multiple of `base`.
///
/// Fails with `InvalidArgument` when `base` is not strictly positive.
/// NaN passes through unchanged.
pub fn round_to_base(value: f64, base: f64, mode: RoundMode) -> Result<f64, StreamError> {
    check_base(base)?;
    Ok(apply(value, base, mode))
}

/// Like [`round_to_base`], but keeps the original value wherever the rounded
/// result would be exactly zero. Intended for display rounding of small
/// measurements; bucket boundaries never use it.
pub fn round_to_base_nonzero(value: f64, base: f64, mode: RoundMode) -> Result<f64, StreamError> {
    let rounded = round_to_base(value, base, mode)?;
    Ok(if rounded == 0.0 { value } else { rounded })
}

/// Round every element of `values`, optionally with the nonzero-edge rule.
pub fn round_slice(
    values: &[f64],
    base: f64,
    mode: RoundMode,
    nonzero_edge: bool,
) -> Result<Vec<f64>, StreamError> {
    check_base(base)?;
    Ok(values
        .iter()
        .map(|&v| {
            let rounded = apply(v, base, mode);
            if nonzero_edge && rounded == 0.0 {
                v
            } else {
                rounded
            }
        })
        .collect())
}
