//! Edge-held linear interpolation

use ndarray::{Array1, ArrayView1};

/// Interpolate `(source_times, source_values)` onto `target_times`.
///
/// Only finite source samples take part. Targets before the first valid
/// sample take its value, targets after the last valid sample take that
/// value, so the output never leaves the range of the valid samples. A
/// channel with no valid samples interpolates to all-NaN.
pub fn interp_edge_held(
    target_times: ArrayView1<'_, f64>,
    source_times: ArrayView1<'_, f64>,
    source_values: ArrayView1<'_, f64>,
) -> Array1<f64> {
    let mut support: Vec<(f64, f64)> = source_times
        .iter()
        .zip(source_values.iter())
        .filter(|(t, v)| t.is_finite() && v.is_finite())
        .map(|(&t, &v)| (t, v))
        .collect();

    if support.is_empty() {
        return Array1::from_elem(target_times.len(), f64::NAN);
    }
    if !support.windows(2).all(|w| w[0].0 <= w[1].0) {
        support.sort_by(|a, b| a.0.total_cmp(&b.0));
    }

    let (first_t, first_v) = support[0];
    let (last_t, last_v) = support[support.len() - 1];

    target_times.mapv(|t| {
        if t.is_nan() {
            return f64::NAN;
        }
        if t <= first_t {
            return first_v;
        }
        if t >= last_t {
            return last_v;
        }
        // first index with time > t; 1..len because first_t < t < last_t
        let hi = support.partition_point(|&(st, _)| st <= t);
        let (t0, v0) = support[hi - 1];
        let (t1, v1) = support[hi];
        if t1 == t0 {
            v1
        } else {
            v0 + (v1 - v0) * (t - t0) / (t1 - t0)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_between_samples() {
        let out = interp_edge_held(
            array![1.0, 1.5, 2.0, 3.5].view(),
            array![1.0, 2.0, 4.0].view(),
            array![10.0, 20.0, 0.0].view(),
        );
        assert_eq!(out.to_vec(), vec![10.0, 15.0, 20.0, 5.0]);
    }

    #[test]
    fn test_edges_are_held() {
        let out = interp_edge_held(
            array![0.0, 1.0, 2.0, 3.0, 4.0].view(),
            array![1.0, 4.0].view(),
            array![7.0, 8.0].view(),
        );
        assert_eq!(out[0], 7.0);
        assert_eq!(out[4], 8.0);
        let dense: Vec<f64> = (0..200).map(|i| i as f64 * 0.05 - 2.0).collect();
        let dense = Array1::from(dense);
        let out = interp_edge_held(dense.view(), array![1.0, 4.0].view(), array![7.0, 8.0].view());
        assert!(out.iter().all(|&v| (7.0..=8.0).contains(&v)));
    }

    #[test]
    fn test_nan_samples_are_skipped() {
        let out = interp_edge_held(
            array![0.0, 1.0, 2.0, 3.0].view(),
            array![0.0, 1.0, 2.0, 3.0].view(),
            array![f64::NAN, 2.0, f64::NAN, 4.0].view(),
        );
        assert_eq!(out.to_vec(), vec![2.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_all_nan_channel() {
        let out = interp_edge_held(
            array![0.0, 1.0].view(),
            array![0.0, 1.0, 2.0].view(),
            array![f64::NAN, f64::NAN, f64::NAN].view(),
        );
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_unsorted_source() {
        let out = interp_edge_held(
            array![1.5].view(),
            array![2.0, 1.0].view(),
            array![20.0, 10.0].view(),
        );
        assert_eq!(out[0], 15.0);
    }
}
