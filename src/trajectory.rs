use nalgebra::DVector;

/// Knot-indexed trajectory storage.
///
/// `x[k]` and `u[k]` for `k = 0..N`; `dt[k]` for the N-1 intervals. The last
/// control is only meaningful under first-order hold. `dx`, `xm` and `um` are
/// the first-order-hold auxiliaries: continuous dynamics at the knots and the
/// Simpson midstates/midcontrols per interval (midcontrols are plant-sized).
///
/// All buffers are allocated once and mutated in place; the solver keeps a
/// second instance as the line-search shadow and swaps the two on acceptance.
pub struct Trajectory {
    pub x: Vec<DVector<f64>>,
    pub u: Vec<DVector<f64>>,
    pub dt: Vec<f64>,
    pub dx: Vec<DVector<f64>>,
    pub xm: Vec<DVector<f64>>,
    pub um: Vec<DVector<f64>>,
}

impl Trajectory {
    pub fn zeros(n: usize, mm: usize, m: usize, n_knots: usize) -> Trajectory {
        Trajectory {
            x: vec![DVector::zeros(n); n_knots],
            u: vec![DVector::zeros(mm); n_knots],
            dt: vec![0.0; n_knots - 1],
            dx: vec![DVector::zeros(n); n_knots],
            xm: vec![DVector::zeros(n); n_knots - 1],
            um: vec![DVector::zeros(m); n_knots - 1],
        }
    }

    pub fn n_knots(&self) -> usize {
        self.x.len()
    }

    pub fn total_time(&self) -> f64 {
        self.dt.iter().sum()
    }

    pub fn copy_from(&mut self, other: &Trajectory) {
        for (dst, src) in self.x.iter_mut().zip(&other.x) {
            dst.copy_from(src);
        }
        for (dst, src) in self.u.iter_mut().zip(&other.u) {
            dst.copy_from(src);
        }
        self.dt.copy_from_slice(&other.dt);
        for (dst, src) in self.dx.iter_mut().zip(&other.dx) {
            dst.copy_from(src);
        }
        for (dst, src) in self.xm.iter_mut().zip(&other.xm) {
            dst.copy_from(src);
        }
        for (dst, src) in self.um.iter_mut().zip(&other.um) {
            dst.copy_from(src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn shadow_swap_keeps_shapes() {
        let mut a = Trajectory::zeros(2, 3, 1, 4);
        let mut b = Trajectory::zeros(2, 3, 1, 4);
        a.x[1] = dvector![1.0, 2.0];
        b.dt[0] = 0.5;
        std::mem::swap(&mut a, &mut b);
        approx::assert_abs_diff_eq!(b.x[1], dvector![1.0, 2.0]);
        approx::assert_abs_diff_eq!(a.dt[0], 0.5);
        assert_eq!(a.n_knots(), 4);
        approx::assert_abs_diff_eq!(b.total_time(), 0.0);
    }
}
