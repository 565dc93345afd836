//! State-space model contract.
//!
//! ```text
//! alpha_{t+1} = T_t alpha_t + eta_t,   eta_t ~ N(0, V_t),  V_t = S_t S_t'
//! y_t         = Z_t alpha_t + eps_t,   eps_t ~ N(0, H_t)
//! alpha_0     ~ N(a0, P0 + kappa * Pinf0),  kappa -> infinity
//! ```
//!
//! Models write into caller-owned buffers so that a composite can hand
//! each component the sub-block of the global state it owns. Every
//! method must leave entries outside its own block untouched.

use nalgebra::{DMatrix, DMatrixViewMut, DVector, DVectorView, DVectorViewMut};

use crate::initialization::Initialization;

pub trait StateSpaceModel: Send + Sync {
    /// State dimension `d`, fixed for the lifetime of the model.
    fn dim(&self) -> usize;

    /// True when `T`, `V`, `Z` and `H` do not depend on the position.
    fn is_time_invariant(&self) -> bool;

    /// Rank of `Pinf0` (number of diffuse directions).
    fn diffuse_dim(&self) -> usize;

    /// Initial mean; the buffer arrives zeroed.
    fn a0(&self, _a: &mut DVectorViewMut<'_, f64>) {}

    /// Proper part of the initial covariance; the buffer arrives zeroed.
    fn p0(&self, p: &mut DMatrixViewMut<'_, f64>);

    /// Diffuse part of the initial covariance; the buffer arrives zeroed.
    fn pinf0(&self, pinf: &mut DMatrixViewMut<'_, f64>);

    /// Writes `T_pos` into `tm` (d × d).
    fn t(&self, pos: usize, tm: &mut DMatrixViewMut<'_, f64>);

    /// x := T_pos x
    fn tx(&self, pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let tm = self.transition_matrix(pos);
        let y = &tm * &*x;
        x.copy_from(&y);
    }

    /// x := T_pos' x (i.e. the row vector x' T_pos)
    fn xt(&self, pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let tm = self.transition_matrix(pos);
        let y = tm.tr_mul(&*x);
        x.copy_from(&y);
    }

    /// Number of columns of the innovation loading `S_t`.
    fn innovation_dim(&self) -> usize;

    /// Writes the innovation loading `S_pos` (d × innovation_dim), with `V_pos = S S'`.
    fn s(&self, pos: usize, s: &mut DMatrixViewMut<'_, f64>);

    /// p := p + V_pos
    fn add_v(&self, pos: usize, p: &mut DMatrixViewMut<'_, f64>) {
        let (d, k) = (self.dim(), self.innovation_dim());
        if k == 0 {
            return;
        }
        let mut s = DMatrix::zeros(d, k);
        self.s(pos, &mut full_view(&mut s));
        p.gemm(1.0, &s, &s.transpose(), 1.0);
    }

    /// Writes the loading `Z_pos`; the buffer arrives zeroed.
    fn z(&self, pos: usize, z: &mut DVectorViewMut<'_, f64>);

    /// Z_pos x
    fn zx(&self, pos: usize, x: &DVectorView<'_, f64>) -> f64 {
        let mut z = DVector::zeros(self.dim());
        self.z(pos, &mut vector_view(&mut z));
        z.dot(x)
    }

    /// Measurement noise variance `H_pos` (0 for exact measurement).
    fn h(&self, _pos: usize) -> f64 {
        0.0
    }

    /// Materialized transition matrix.
    fn transition_matrix(&self, pos: usize) -> DMatrix<f64> {
        let d = self.dim();
        let mut tm = DMatrix::zeros(d, d);
        self.t(pos, &mut full_view(&mut tm));
        tm
    }

    /// Materialized loading vector.
    fn loading(&self, pos: usize) -> DVector<f64> {
        let mut z = DVector::zeros(self.dim());
        self.z(pos, &mut vector_view(&mut z));
        z
    }

    /// Materialized innovation covariance `V_pos`.
    fn innovation_variance(&self, pos: usize) -> DMatrix<f64> {
        let d = self.dim();
        let mut v = DMatrix::zeros(d, d);
        self.add_v(pos, &mut full_view(&mut v));
        v
    }

    /// Materialized initial distribution `(a0, P0, Pinf0)`.
    fn initial(&self) -> Initialization {
        let d = self.dim();
        let mut a0 = DVector::zeros(d);
        let mut p0 = DMatrix::zeros(d, d);
        let mut pinf0 = DMatrix::zeros(d, d);
        self.a0(&mut vector_view(&mut a0));
        self.p0(&mut full_view(&mut p0));
        self.pinf0(&mut full_view(&mut pinf0));
        Initialization {
            a0,
            p0,
            pinf0,
            diffuse_dim: self.diffuse_dim(),
        }
    }
}

impl<M: StateSpaceModel + ?Sized> StateSpaceModel for Box<M> {
    fn dim(&self) -> usize {
        (**self).dim()
    }
    fn is_time_invariant(&self) -> bool {
        (**self).is_time_invariant()
    }
    fn diffuse_dim(&self) -> usize {
        (**self).diffuse_dim()
    }
    fn a0(&self, a: &mut DVectorViewMut<'_, f64>) {
        (**self).a0(a)
    }
    fn p0(&self, p: &mut DMatrixViewMut<'_, f64>) {
        (**self).p0(p)
    }
    fn pinf0(&self, pinf: &mut DMatrixViewMut<'_, f64>) {
        (**self).pinf0(pinf)
    }
    fn t(&self, pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
        (**self).t(pos, tm)
    }
    fn tx(&self, pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        (**self).tx(pos, x)
    }
    fn xt(&self, pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        (**self).xt(pos, x)
    }
    fn innovation_dim(&self) -> usize {
        (**self).innovation_dim()
    }
    fn s(&self, pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
        (**self).s(pos, s)
    }
    fn add_v(&self, pos: usize, p: &mut DMatrixViewMut<'_, f64>) {
        (**self).add_v(pos, p)
    }
    fn z(&self, pos: usize, z: &mut DVectorViewMut<'_, f64>) {
        (**self).z(pos, z)
    }
    fn zx(&self, pos: usize, x: &DVectorView<'_, f64>) -> f64 {
        (**self).zx(pos, x)
    }
    fn h(&self, pos: usize) -> f64 {
        (**self).h(pos)
    }
}

// ---------------------------------------------------------------------------
// Buffer helpers
// ---------------------------------------------------------------------------

/// Mutable view over a whole matrix.
pub fn full_view(m: &mut DMatrix<f64>) -> DMatrixViewMut<'_, f64> {
    let shape = m.shape();
    m.view_mut((0, 0), shape)
}

/// Mutable view over a whole vector.
pub fn vector_view(v: &mut DVector<f64>) -> DVectorViewMut<'_, f64> {
    let n = v.len();
    v.rows_mut(0, n)
}

/// Applies `T_pos` to every column of `a` (a := T a).
pub fn tx_columns<M: StateSpaceModel + ?Sized>(model: &M, pos: usize, a: &mut DMatrix<f64>) {
    for j in 0..a.ncols() {
        model.tx(pos, &mut a.column_mut(j));
    }
}

/// Applies `T_pos'` to every column of `a` (a := T' a).
pub fn xt_columns<M: StateSpaceModel + ?Sized>(model: &M, pos: usize, a: &mut DMatrix<f64>) {
    for j in 0..a.ncols() {
        model.xt(pos, &mut a.column_mut(j));
    }
}

/// p := T p T'
pub fn tvt<M: StateSpaceModel + ?Sized>(model: &M, pos: usize, p: &mut DMatrix<f64>) {
    tx_columns(model, pos, p);
    p.transpose_mut();
    tx_columns(model, pos, p);
    p.transpose_mut();
}

/// n := T' n T
pub fn xtvt<M: StateSpaceModel + ?Sized>(model: &M, pos: usize, n: &mut DMatrix<f64>) {
    xt_columns(model, pos, n);
    n.transpose_mut();
    xt_columns(model, pos, n);
    n.transpose_mut();
}

/// Forces exact symmetry: m := (m + m') / 2.
pub fn symmetrize(m: &mut DMatrix<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (m[(i, j)] + m[(j, i)]);
            m[(i, j)] = v;
            m[(j, i)] = v;
        }
    }
}

/// Checks the structured operations of a model against its materialized matrices.
#[cfg(test)]
pub(crate) fn assert_consistent_ops<M: StateSpaceModel + ?Sized>(model: &M, pos: usize) {
    let d = model.dim();
    let tm = model.transition_matrix(pos);
    let z = model.loading(pos);
    let x0 = DVector::from_fn(d, |i, _| (i as f64 + 1.0).sin());

    let mut x = x0.clone();
    model.tx(pos, &mut vector_view(&mut x));
    assert!((&x - &tm * &x0).amax() < 1e-12, "tx disagrees with T at {}", pos);

    let mut x = x0.clone();
    model.xt(pos, &mut vector_view(&mut x));
    assert!((&x - tm.transpose() * &x0).amax() < 1e-12, "xt disagrees with T' at {}", pos);

    assert!((model.zx(pos, &x0.rows(0, d)) - z.dot(&x0)).abs() < 1e-12);

    let k = model.innovation_dim();
    let mut s = DMatrix::zeros(d, k);
    model.s(pos, &mut full_view(&mut s));
    let v = model.innovation_variance(pos);
    assert!((&v - &s * s.transpose()).amax() < 1e-12, "V disagrees with S S' at {}", pos);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal model relying on every default method.
    struct Dense {
        t: DMatrix<f64>,
        s: DMatrix<f64>,
        z: DVector<f64>,
    }

    impl StateSpaceModel for Dense {
        fn dim(&self) -> usize {
            self.t.nrows()
        }
        fn is_time_invariant(&self) -> bool {
            true
        }
        fn diffuse_dim(&self) -> usize {
            0
        }
        fn p0(&self, p: &mut DMatrixViewMut<'_, f64>) {
            p.fill_with_identity();
        }
        fn pinf0(&self, _pinf: &mut DMatrixViewMut<'_, f64>) {}
        fn t(&self, _pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
            tm.copy_from(&self.t);
        }
        fn innovation_dim(&self) -> usize {
            self.s.ncols()
        }
        fn s(&self, _pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
            s.copy_from(&self.s);
        }
        fn z(&self, _pos: usize, z: &mut DVectorViewMut<'_, f64>) {
            z.copy_from(&self.z);
        }
    }

    fn dense() -> Dense {
        Dense {
            t: DMatrix::from_row_slice(2, 2, &[0.5, 1.0, -0.2, 0.3]),
            s: DMatrix::from_row_slice(2, 1, &[1.0, 0.4]),
            z: DVector::from_vec(vec![1.0, 0.0]),
        }
    }

    #[test]
    fn test_default_tx_xt() {
        let m = dense();
        let mut x = DVector::from_vec(vec![1.0, 2.0]);
        m.tx(0, &mut vector_view(&mut x));
        // T x = [0.5 + 2, -0.2 + 0.6]
        assert!((x[0] - 2.5).abs() < 1e-12);
        assert!((x[1] - 0.4).abs() < 1e-12);

        let mut y = DVector::from_vec(vec![1.0, 2.0]);
        m.xt(0, &mut vector_view(&mut y));
        // T' y = [0.5 - 0.4, 1 + 0.6]
        assert!((y[0] - 0.1).abs() < 1e-12);
        assert!((y[1] - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_tvt_matches_dense_product() {
        let m = dense();
        let p0 = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.0]);
        let mut p = p0.clone();
        tvt(&m, 0, &mut p);
        let expected = &m.t * &p0 * m.t.transpose();
        assert!((&p - &expected).amax() < 1e-12);

        let mut n = p0.clone();
        xtvt(&m, 0, &mut n);
        let expected = m.t.transpose() * &p0 * &m.t;
        assert!((&n - &expected).amax() < 1e-12);
    }

    #[test]
    fn test_default_v_and_zx() {
        let m = dense();
        let v = m.innovation_variance(0);
        assert!((v[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((v[(0, 1)] - 0.4).abs() < 1e-12);
        assert!((v[(1, 1)] - 0.16).abs() < 1e-12);

        let x = DVector::from_vec(vec![3.0, 5.0]);
        assert!((m.zx(0, &x.rows(0, 2)) - 3.0).abs() < 1e-12);

        let init = m.initial();
        assert_eq!(init.diffuse_dim, 0);
        assert!((init.p0[(1, 1)] - 1.0).abs() < 1e-12);
    }
}
