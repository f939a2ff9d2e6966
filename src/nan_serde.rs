//! NaN-preserving serde helpers for ndarray containers
//!
//! JSON has no NaN or infinity, and serde_json writes both as `null` but
//! refuses to read them back into an `f64`. These helpers map NaN ↔ `null`
//! and ±infinity ↔ `"inf"`/`"-inf"` so snapshots round-trip every value.
//! Use with `#[serde(with = "...")]`.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// NaN → `None`, everything else → `Some`
pub fn to_nullable(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

pub fn from_nullable(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::NAN)
}

const POS_INF: &str = "inf";
const NEG_INF: &str = "-inf";

/// One stored value: a finite number, `null` for NaN, or a named infinity
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Cell {
    Number(f64),
    Infinite(String),
    Missing,
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            Cell::Missing
        } else if value == f64::INFINITY {
            Cell::Infinite(POS_INF.to_string())
        } else if value == f64::NEG_INFINITY {
            Cell::Infinite(NEG_INF.to_string())
        } else {
            Cell::Number(value)
        }
    }
}

impl Cell {
    fn into_value<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Cell::Number(value) => Ok(value),
            Cell::Missing => Ok(f64::NAN),
            Cell::Infinite(name) => match name.as_str() {
                POS_INF => Ok(f64::INFINITY),
                NEG_INF => Ok(f64::NEG_INFINITY),
                other => Err(E::custom(format!("expected a number, null, \"inf\" or \"-inf\", got \"{other}\""))),
            },
        }
    }
}

fn cells_to_values<E: serde::de::Error>(cells: Vec<Cell>) -> Result<Vec<f64>, E> {
    cells.into_iter().map(Cell::into_value).collect()
}

pub mod vector {
    use super::*;

    pub fn serialize<S: Serializer>(values: &Array1<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        let cells: Vec<Cell> = values.iter().map(|&v| Cell::from(v)).collect();
        cells.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Array1<f64>, D::Error> {
        let cells = Vec::<Cell>::deserialize(deserializer)?;
        Ok(Array1::from(cells_to_values::<D::Error>(cells)?))
    }
}

#[derive(Serialize, Deserialize)]
struct MatrixRepr {
    rows: usize,
    cols: usize,
    data: Vec<Cell>,
}

pub mod matrix {
    use super::*;

    pub fn serialize<S: Serializer>(values: &Array2<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        let (rows, cols) = values.dim();
        MatrixRepr {
            rows,
            cols,
            data: values.iter().map(|&v| Cell::from(v)).collect(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Array2<f64>, D::Error> {
        let repr = MatrixRepr::deserialize(deserializer)?;
        let data = cells_to_values::<D::Error>(repr.data)?;
        Array2::from_shape_vec((repr.rows, repr.cols), data).map_err(serde::de::Error::custom)
    }
}
