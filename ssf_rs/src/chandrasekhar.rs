//! Chandrasekhar-type fast filter for time-invariant models.
//!
//! Instead of the covariance, the filter propagates the increment of the
//! Riccati recursion, `P_{t+1} - P_t = W_t M_t W_t'`, whose rank is at most
//! the rank of the first increment and which decays geometrically:
//!
//! ```text
//! K_t = T P_t Z',  F_t = Z P_t Z' + h
//! F_{t+1} = F_t + Z W M W' Z'
//! K_{t+1} = K_t + T W M W' Z'
//! W_{t+1} = (T - K_t Z / F_t) W
//! M_{t+1} = M - M W' Z' Z W M / F_{t+1}
//! a_{t+1} = T a_t + K_t v_t / F_t
//! ```
//!
//! The recursion starts at the first proper step. Missing observations
//! break the structure, so series containing them are handled by the
//! ordinary filter.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use tracing::debug;

use crate::error::{Result, SsfError};
use crate::kalman::{
    check_series, filter_recorded, run_diffuse_phase, FilterOptions, FilterSummary,
    PredictionErrors, RecorderMode, StepKind,
};
use crate::likelihood::DiffuseLikelihood;
use crate::model::{full_view, tvt, tx_columns, vector_view, StateSpaceModel};
use crate::types::is_missing;

/// Factors a symmetric, possibly indefinite matrix as `W diag(m) W'`,
/// keeping eigenvalues above `tol * max|lambda|` in magnitude.
fn indefinite_factor(delta: &DMatrix<f64>, tol: f64) -> (DMatrix<f64>, DVector<f64>) {
    let eig = SymmetricEigen::new(delta.clone());
    let scale = eig.eigenvalues.amax();
    let keep: Vec<usize> = (0..delta.nrows())
        .filter(|&j| scale > 0.0 && eig.eigenvalues[j].abs() > tol * scale)
        .collect();
    let w = DMatrix::from_fn(delta.nrows(), keep.len(), |i, j| eig.eigenvectors[(i, keep[j])]);
    let m = DVector::from_fn(keep.len(), |j, _| eig.eigenvalues[keep[j]]);
    (w, m)
}

fn fallback<M: StateSpaceModel + ?Sized>(model: &M, y: &[f64], options: &FilterOptions) -> Result<FilterSummary> {
    let out = filter_recorded(model, y, options, RecorderMode::Light)?;
    Ok(FilterSummary {
        likelihood: out.likelihood,
        errors: out.results.errors,
    })
}

#[tracing::instrument(skip_all, fields(n = y.len(), dim = model.dim()))]
pub fn chandrasekhar_filter<M: StateSpaceModel + ?Sized>(
    model: &M,
    y: &[f64],
    options: &FilterOptions,
) -> Result<FilterSummary> {
    check_series(y)?;
    if !model.is_time_invariant() {
        return Err(SsfError::Configuration(
            "the fast filter requires a time-invariant model".into(),
        ));
    }
    if y.iter().any(|&v| is_missing(v)) {
        debug!("series has missing values, using the ordinary filter");
        return fallback(model, y, options);
    }

    let n = y.len();
    let mut lik = DiffuseLikelihood::new();
    let mut errors = PredictionErrors::with_capacity(n);
    let filter = run_diffuse_phase(model, y, options, &mut lik, &mut errors)?;
    let start = filter.position();
    let end = filter.end_diffuse_position();
    let (a, p) = filter.into_state();
    if start == n {
        let likelihood = lik.finish(None, 0, end.unwrap_or(n), end.is_some())?;
        return Ok(FilterSummary { likelihood, errors });
    }

    let d = model.dim();
    let h = model.h(start);
    let tm = model.transition_matrix(start);
    let mut z = DVector::zeros(d);
    model.z(start, &mut vector_view(&mut z));
    let mut a: DVector<f64> = a.column(0).into_owned();

    // Gains at the first proper step and the first Riccati increment.
    let pz = &p * &z;
    let mut f = z.dot(&pz) + h;
    if f <= options.variance_epsilon {
        debug!(position = start, "non-positive initial variance, using the ordinary filter");
        return fallback(model, y, options);
    }
    let mut k = &tm * &pz;
    let mut next = p.clone();
    next.ger(-1.0 / f, &pz, &pz, 1.0);
    tvt(model, start, &mut next);
    model.add_v(start, &mut full_view(&mut next));
    let (mut w, m0) = indefinite_factor(&(next - &p), options.eigen_tolerance);
    let mut m = DMatrix::from_diagonal(&m0);

    for pos in start..n {
        let v = y[pos] - model.zx(pos, &a.rows(0, d));
        lik.add(v, f);
        errors.push(StepKind::Proper, v, f);

        model.tx(pos, &mut vector_view(&mut a));
        a.axpy(v / f, &k, 1.0);

        if w.ncols() == 0 {
            continue;
        }
        let zw = w.tr_mul(&z);
        let mzw = &m * &zw;
        let f_next = f + zw.dot(&mzw);
        if f_next <= options.variance_epsilon {
            debug!(position = pos + 1, "non-positive variance in the fast recursion, using the ordinary filter");
            return fallback(model, y, options);
        }
        let mut tw = w.clone();
        tx_columns(model, pos, &mut tw);
        let k_next = &k + &tw * &mzw;
        tw.ger(-1.0 / f, &k, &zw, 1.0);
        m.ger(-1.0 / f_next, &mzw, &mzw, 1.0);
        w = tw;
        k = k_next;
        f = f_next;
    }

    let likelihood = lik.finish(None, 0, end.unwrap_or(n), end.is_some())?;
    Ok(FilterSummary { likelihood, errors })
}
