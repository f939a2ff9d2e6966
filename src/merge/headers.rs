//! Header reconciliation
//!
//! Computes how two channel lists line up without touching any data. The
//! result describes, for every unified channel, which row of the existing
//! and of the incoming matrix feeds it (`None` means NaN backfill).

use crate::error::StreamError;
use ndarray::{Array2, ArrayView2, Axis};
use std::collections::{HashMap, HashSet};

/// Outcome of [`merge_headers`]
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMerge {
    /// Unified channel order
    pub names: Vec<String>,
    /// Source row in the existing data for each unified channel
    pub existing_rows: Vec<Option<usize>>,
    /// Source row in the incoming data for each unified channel
    pub incoming_rows: Vec<Option<usize>>,
    /// Whether the unified set was sorted numerically
    pub numeric: bool,
}

impl HeaderMerge {
    /// True when the unified order is exactly the existing order with nothing added.
    pub fn is_identity_for_existing(&self) -> bool {
        self.existing_rows
            .iter()
            .enumerate()
            .all(|(i, row)| *row == Some(i))
    }
}

/// Parse a channel name as a number (e.g. a particle diameter bin label).
pub fn numeric_name(name: &str) -> Option<f64> {
    name.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// True when every name parses as a finite number.
pub fn is_numeric_header<S: AsRef<str>>(names: &[S]) -> bool {
    !names.is_empty() && names.iter().all(|n| numeric_name(n.as_ref()).is_some())
}

fn position_map<'a>(names: &'a [String], side: &str) -> Result<HashMap<&'a str, usize>, StreamError> {
    let mut map = HashMap::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        if map.insert(name.as_str(), i).is_some() {
            return Err(StreamError::DuplicateName(format!("{name} ({side} header)")));
        }
    }
    Ok(map)
}

/// Reconcile an existing channel list with an incoming one.
///
/// Names only present in `incoming` are appended after the existing names.
/// If the unified set is entirely numeric it is sorted by ascending value,
/// otherwise the existing order is kept and incoming rows follow it.
pub fn merge_headers(existing: &[String], incoming: &[String]) -> Result<HeaderMerge, StreamError> {
    let existing_pos = position_map(existing, "existing")?;
    let incoming_pos = position_map(incoming, "incoming")?;

    let mut names: Vec<String> = existing.to_vec();
    let known: HashSet<&str> = existing.iter().map(String::as_str).collect();
    names.extend(
        incoming
            .iter()
            .filter(|n| !known.contains(n.as_str()))
            .cloned(),
    );

    let numeric = is_numeric_header(&names);
    if numeric {
        // numeric_name is Some for every entry here
        names.sort_by(|a, b| {
            let a = numeric_name(a).unwrap_or(f64::NAN);
            let b = numeric_name(b).unwrap_or(f64::NAN);
            a.total_cmp(&b)
        });
    }

    let existing_rows = names
        .iter()
        .map(|n| existing_pos.get(n.as_str()).copied())
        .collect();
    let incoming_rows = names
        .iter()
        .map(|n| incoming_pos.get(n.as_str()).copied())
        .collect();

    Ok(HeaderMerge {
        names,
        existing_rows,
        incoming_rows,
        numeric,
    })
}

/// Build a matrix whose row `i` is `values.row(rows[i])`, or NaN when `rows[i]` is `None`.
pub fn permute_rows(values: ArrayView2<'_, f64>, rows: &[Option<usize>]) -> Array2<f64> {
    let n_cols = values.len_of(Axis(1));
    let mut out = Array2::from_elem((rows.len(), n_cols), f64::NAN);
    for (target, source) in rows.iter().enumerate() {
        if let Some(source) = source {
            out.row_mut(target).assign(&values.row(*source));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_text_headers_keep_existing_order() {
        let merged = merge_headers(&strings(&["a", "b", "c"]), &strings(&["c", "d"])).unwrap();
        assert_eq!(merged.names, strings(&["a", "b", "c", "d"]));
        assert_eq!(merged.existing_rows, vec![Some(0), Some(1), Some(2), None]);
        assert_eq!(merged.incoming_rows, vec![None, None, Some(0), Some(1)]);
        assert!(!merged.numeric);
    }

    #[test]
    fn test_incoming_reordered_to_existing() {
        let merged = merge_headers(&strings(&["x", "y"]), &strings(&["y", "x"])).unwrap();
        assert_eq!(merged.names, strings(&["x", "y"]));
        assert_eq!(merged.incoming_rows, vec![Some(1), Some(0)]);
        assert!(merged.is_identity_for_existing());
    }

    #[test]
    fn test_numeric_headers_sorted() {
        let merged =
            merge_headers(&strings(&["20.1", "80.3"]), &strings(&["100.5", "50.2"])).unwrap();
        assert_eq!(merged.names, strings(&["20.1", "50.2", "80.3", "100.5"]));
        assert_eq!(merged.existing_rows, vec![Some(0), None, Some(1), None]);
        assert_eq!(merged.incoming_rows, vec![None, Some(1), None, Some(0)]);
        assert!(merged.numeric);
        assert!(!merged.is_identity_for_existing());
    }

    #[test]
    fn test_mixed_headers_not_sorted() {
        let merged = merge_headers(&strings(&["3", "1"]), &strings(&["total"])).unwrap();
        assert_eq!(merged.names, strings(&["3", "1", "total"]));
        assert!(!merged.numeric);
    }

    #[test]
    fn test_duplicate_incoming_rejected() {
        let err = merge_headers(&strings(&["a"]), &strings(&["b", "b"])).unwrap_err();
        assert!(matches!(err, StreamError::DuplicateName(_)));
    }

    #[test]
    fn test_permute_rows_backfills_nan() {
        let values = array![[1.0, 2.0], [3.0, 4.0]];
        let out = permute_rows(values.view(), &[Some(1), None, Some(0)]);
        assert_eq!(out.row(0).to_vec(), vec![3.0, 4.0]);
        assert!(out.row(1).iter().all(|v| v.is_nan()));
        assert_eq!(out.row(2).to_vec(), vec![1.0, 2.0]);
    }
}
