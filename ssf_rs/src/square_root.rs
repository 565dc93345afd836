//! Square-root (array) filter.
//!
//! Propagates a factor `L` with `P = L L'`. Each proper step triangularizes
//! the pre-array with an orthogonal transformation (QR of its transpose):
//!
//! ```text
//! [ sqrt(h)  Z L  0 ]  Q  =  [ sqrt(f)  0        0 ]
//! [ 0        T L  S ]        [ K        L_next   0 ]
//! ```
//!
//! so that `f = Z P Z' + h`, `K sqrt(f) = T P Z'` and `L_next L_next'` is the
//! next predicted covariance, positive semi-definite by construction. The
//! diffuse phase is handled by the ordinary filter, so the factor only
//! exists from the first proper step on and the diffuse steps carry no
//! positive semi-definite guarantee.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use tracing::warn;

use crate::error::Result;
use crate::kalman::{check_series, run_diffuse_phase, FilterOptions, FilterSummary, PredictionErrors, StepKind};
use crate::likelihood::DiffuseLikelihood;
use crate::model::{full_view, tx_columns, vector_view, StateSpaceModel};
use crate::types::is_missing;

/// Factor `L` (d × d) with `L L' = p`, dropping eigenvalues below
/// `tol * max|lambda|`. `p` may be singular.
pub(crate) fn psd_factor(p: &DMatrix<f64>, tol: f64) -> DMatrix<f64> {
    let d = p.nrows();
    let eig = SymmetricEigen::new(p.clone());
    let scale = eig.eigenvalues.amax();
    let mut l = eig.eigenvectors;
    for j in 0..d {
        let lambda = eig.eigenvalues[j];
        let w = if lambda > tol * scale { lambda.sqrt() } else { 0.0 };
        l.column_mut(j).scale_mut(w);
    }
    l
}

/// Lower-triangular factor of the pre-array `pre` (rows × cols, cols >= rows).
fn triangularize(pre: &DMatrix<f64>) -> DMatrix<f64> {
    pre.transpose().qr().r().transpose()
}

#[tracing::instrument(skip_all, fields(n = y.len(), dim = model.dim()))]
pub fn square_root_filter<M: StateSpaceModel + ?Sized>(
    model: &M,
    y: &[f64],
    options: &FilterOptions,
) -> Result<FilterSummary> {
    check_series(y)?;
    let n = y.len();
    let mut lik = DiffuseLikelihood::new();
    let mut errors = PredictionErrors::with_capacity(n);
    let filter = run_diffuse_phase(model, y, options, &mut lik, &mut errors)?;
    let start = filter.position();
    let end = filter.end_diffuse_position();
    let (a, p) = filter.into_state();

    let d = model.dim();
    let q = model.innovation_dim();
    let mut a: DVector<f64> = a.column(0).into_owned();
    let mut l = psd_factor(&p, options.eigen_tolerance);
    let mut z = DVector::zeros(d);
    let mut s = DMatrix::zeros(d, q);

    for pos in start..n {
        z.fill(0.0);
        model.z(pos, &mut vector_view(&mut z));
        let h = model.h(pos);
        let mut tl = l.clone();
        tx_columns(model, pos, &mut tl);
        s.fill(0.0);
        model.s(pos, &mut full_view(&mut s));
        let lz = l.tr_mul(&z);

        if !is_missing(y[pos]) {
            let mut pre = DMatrix::zeros(d + 1, 1 + d + q);
            pre[(0, 0)] = h.sqrt();
            pre.view_mut((0, 1), (1, d)).copy_from(&lz.transpose());
            pre.view_mut((1, 1), (d, d)).copy_from(&tl);
            pre.view_mut((1, 1 + d), (d, q)).copy_from(&s);
            let post = triangularize(&pre);
            let root = post[(0, 0)];
            let f = root * root;
            let v = y[pos] - model.zx(pos, &a.rows(0, d));

            if f > options.variance_epsilon {
                lik.add(v, f);
                errors.push(StepKind::Proper, v, f);
                model.tx(pos, &mut vector_view(&mut a));
                a.axpy(v / root, &post.column(0).rows(1, d), 1.0);
                l = post.view((1, 1), (d, d)).into_owned();
                continue;
            }
            warn!(position = pos, variance = f, "degenerate prediction-error variance, update skipped");
            lik.add_degenerate(pos);
            errors.push(StepKind::Degenerate, v, f);
        } else {
            errors.push(StepKind::Missing, 0.0, lz.norm_squared() + h);
        }

        let mut pre = DMatrix::zeros(d, d + q);
        pre.view_mut((0, 0), (d, d)).copy_from(&tl);
        pre.view_mut((0, d), (d, q)).copy_from(&s);
        l = triangularize(&pre);
        model.tx(pos, &mut vector_view(&mut a));
    }

    let likelihood = lik.finish(None, 0, end.unwrap_or(n), end.is_some())?;
    Ok(FilterSummary { likelihood, errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoregressive::SurveyErrorSsf;
    use crate::kalman::kalman_filter;
    use crate::params::ArimaParams;
    use crate::composite::CompositeBuilder;
    use crate::state_space::ArimaSsf;
    use crate::structural::{LocalLinearTrend, Noise};
    use crate::types::{ArimaOrder, MISSING};

    const Y: [f64; 12] = [1.0, 1.4, 0.9, 2.2, 2.8, 2.1, 3.3, 3.9, 3.1, 4.6, 5.0, 4.4];

    fn assert_same_errors<M: StateSpaceModel + ?Sized>(model: &M, y: &[f64]) {
        let opts = FilterOptions::default();
        let plain = kalman_filter(model, y, &opts).unwrap();
        let sqrt = square_root_filter(model, y, &opts).unwrap();
        assert_eq!(plain.results.errors.kinds, sqrt.errors.kinds);
        for t in 0..y.len() {
            let (v0, v1) = (plain.results.v(t), sqrt.errors.v[t]);
            let (f0, f1) = (plain.results.f(t), sqrt.errors.f[t]);
            assert!((v0 - v1).abs() < 1e-9 * v0.abs().max(1.0), "v mismatch at {}: {} vs {}", t, v0, v1);
            assert!((f0 - f1).abs() < 1e-9 * f0.abs().max(1.0), "f mismatch at {}: {} vs {}", t, f0, f1);
        }
        let (l0, l1) = (plain.likelihood.log_likelihood, sqrt.likelihood.log_likelihood);
        assert!((l0 - l1).abs() < 1e-9 * l0.abs().max(1.0));
    }

    #[test]
    fn test_psd_factor_singular() {
        let p = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let l = psd_factor(&p, 1e-12);
        assert!((&l * l.transpose() - &p).amax() < 1e-12);
        let zero = psd_factor(&DMatrix::zeros(3, 3), 1e-12);
        assert!(zero.amax() < 1e-15);
    }

    #[test]
    fn test_matches_plain_filter_arma() {
        let params = ArimaParams {
            ar_coeffs: vec![0.5],
            ma_coeffs: vec![0.3],
            sar_coeffs: vec![],
            sma_coeffs: vec![],
            sigma2: Some(2.0),
        };
        let ss = ArimaSsf::new(&ArimaOrder::regular(1, 1, 1), &params).unwrap();
        assert_same_errors(&ss, &Y);
    }

    #[test]
    fn test_matches_plain_filter_with_noise_and_missing() {
        let model = CompositeBuilder::new()
            .add("trend", LocalLinearTrend::new(0.3, 0.05, 0.0).unwrap())
            .add("irregular", Noise::new(0.4).unwrap())
            .measurement_noise(0.2)
            .build()
            .unwrap();
        let mut y = Y.to_vec();
        y[5] = MISSING;
        y[9] = MISSING;
        assert_same_errors(&model, &y);
    }

    #[test]
    fn test_matches_plain_filter_with_degenerate_step() {
        let model = SurveyErrorSsf::new(&[0.6], 1.0, vec![1.0, 1.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
        let sqrt = square_root_filter(&model, &Y[..6], &FilterOptions::default()).unwrap();
        assert_eq!(sqrt.errors.kinds[2], StepKind::Degenerate);
        assert_eq!(sqrt.likelihood.degenerate_positions, vec![2]);
        assert_same_errors(&model, &Y[..6]);
    }
}
