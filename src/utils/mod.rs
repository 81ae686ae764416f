use nalgebra::DVector;

/// Linear interpolation from `a` to `b` over `n` points (endpoints included).
pub fn linear_interpolation(a: &DVector<f64>, b: &DVector<f64>, n: usize) -> Vec<DVector<f64>> {
    assert!(n >= 2, "interpolation needs at least two points");
    (0..n)
        .map(|k| {
            let t = k as f64 / (n - 1) as f64;
            a * (1.0 - t) + b * t
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn interpolation_endpoints() {
        let pts = linear_interpolation(&dvector![1.0, 0.0], &dvector![0.0, 2.0], 5);
        assert_eq!(pts.len(), 5);
        approx::assert_abs_diff_eq!(pts[0], dvector![1.0, 0.0]);
        approx::assert_abs_diff_eq!(pts[4], dvector![0.0, 2.0]);
        approx::assert_abs_diff_eq!(pts[2], dvector![0.5, 1.0]);
    }
}
