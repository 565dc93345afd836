//! Regression effects concentrated out of the likelihood.
//!
//! The filter carries one extra state column per regression variable; each
//! column is filtered with the same gains as the observations, so the
//! prediction errors of `[y, X]` come out of a single pass. Their weighted
//! cross-products form the GLS normal equations:
//!
//! ```text
//! C   = sum_t e_t e_t' / f_t,   e_t = [v_y, v_x1, ..., v_xk]
//! b   = Cxx^-1 Cxy
//! ssq = Cyy - Cxy' b
//! cov = ssq / (n - k) * Cxx^-1
//! ```

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SsfError};
use crate::kalman::{check_series, DiffuseKalmanFilter, FilterOptions, StepKind};
use crate::likelihood::{DiffuseLikelihood, LikelihoodResult};
use crate::model::StateSpaceModel;
use crate::types::is_missing;

/// Named regression variable, aligned with the observations.
#[derive(Debug, Clone)]
pub struct RegressionVariable {
    pub name: String,
    pub values: Vec<f64>,
}

impl RegressionVariable {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// GLS estimate of the regression coefficients.
#[derive(Debug, Clone)]
pub struct RegressionEstimate {
    pub names: Vec<String>,
    pub coefficients: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub residual_sum_of_squares: f64,
    /// Likelihood concentrated in both the regression coefficients and the scale.
    pub likelihood: LikelihoodResult,
}

impl RegressionEstimate {
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.coefficients[i])
    }

    /// Standard errors from the diagonal of the covariance.
    pub fn standard_errors(&self) -> DVector<f64> {
        self.covariance.diagonal().map(|v| v.max(0.0).sqrt())
    }
}

fn check_regressors(y: &[f64], regressors: &[RegressionVariable]) -> Result<()> {
    for x in regressors {
        if x.values.len() != y.len() {
            return Err(SsfError::Data(format!(
                "regression variable '{}' has {} values but the series has {}",
                x.name,
                x.values.len(),
                y.len()
            )));
        }
        if let Some(t) = (0..y.len()).find(|&t| !is_missing(y[t]) && is_missing(x.values[t])) {
            return Err(SsfError::Data(format!(
                "regression variable '{}' is missing at observed position {}",
                x.name, t
            )));
        }
    }
    Ok(())
}

/// Filters `y` together with the regression variables and solves the GLS problem.
#[tracing::instrument(skip_all, fields(n = y.len(), dim = model.dim(), k = regressors.len()))]
pub fn augmented_filter<M: StateSpaceModel + ?Sized>(
    model: &M,
    y: &[f64],
    regressors: &[RegressionVariable],
    options: &FilterOptions,
) -> Result<RegressionEstimate> {
    check_series(y)?;
    check_regressors(y, regressors)?;

    let k = regressors.len();
    let mut filter = DiffuseKalmanFilter::new(model, k + 1, options)?;
    let mut lik = DiffuseLikelihood::new();
    let mut cross = DMatrix::<f64>::zeros(k + 1, k + 1);
    let mut row = vec![0.0; k + 1];

    for (pos, &obs) in y.iter().enumerate() {
        row[0] = obs;
        for (j, x) in regressors.iter().enumerate() {
            row[j + 1] = x.values[pos];
        }
        let info = filter.step(&row);
        match info.kind {
            StepKind::Proper => {
                lik.add_variance(info.f);
                cross.ger(1.0 / info.f, &info.v, &info.v, 1.0);
            }
            StepKind::Diffuse => lik.add_diffuse(info.finf),
            StepKind::Degenerate => lik.add_degenerate(pos),
            StepKind::Missing => {}
        }
    }

    if lik.n_obs() <= k {
        return Err(SsfError::Data(format!(
            "{} informative observations cannot identify {} regression coefficients",
            lik.n_obs(),
            k
        )));
    }

    let cyy = cross[(0, 0)];
    let (coefficients, cxx_inv, ssq) = if k == 0 {
        (DVector::zeros(0), DMatrix::zeros(0, 0), cyy)
    } else {
        let cxx = cross.view((1, 1), (k, k)).into_owned();
        let cxy: DVector<f64> = cross.view((1, 0), (k, 1)).column(0).into_owned();
        let chol = cxx.cholesky().ok_or_else(|| {
            SsfError::Linalg("regression normal equations are not positive definite".into())
        })?;
        let b = chol.solve(&cxy);
        let ssq = (cyy - cxy.dot(&b)).max(0.0);
        (b, chol.inverse(), ssq)
    };

    let df = (lik.n_obs() - k) as f64;
    let covariance = cxx_inv * (ssq / df);
    let end = filter.end_diffuse_position();
    let likelihood = lik.finish(Some(ssq), k, end.unwrap_or(y.len()), end.is_some())?;

    Ok(RegressionEstimate {
        names: regressors.iter().map(|x| x.name.clone()).collect(),
        coefficients,
        covariance,
        residual_sum_of_squares: ssq,
        likelihood,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalman::kalman_loglike;
    use crate::params::ArimaParams;
    use crate::state_space::ArimaSsf;
    use crate::types::{ArimaOrder, MISSING};

    const Y: [f64; 10] = [1.2, 0.8, 1.9, 2.4, 1.1, 0.7, 1.6, 2.2, 1.4, 0.9];

    fn ar1(phi: f64) -> ArimaSsf {
        let params = ArimaParams {
            ar_coeffs: vec![phi],
            ma_coeffs: vec![],
            sar_coeffs: vec![],
            sma_coeffs: vec![],
            sigma2: None,
        };
        ArimaSsf::new(&ArimaOrder::regular(1, 0, 0), &params).unwrap()
    }

    #[test]
    fn test_no_regressors_matches_plain_filter() {
        let ss = ar1(0.5);
        let opts = FilterOptions::default();
        let est = augmented_filter(&ss, &Y, &[], &opts).unwrap();
        let plain = kalman_loglike(&ss, &Y, &opts).unwrap();
        assert!((est.residual_sum_of_squares - plain.ssq_err).abs() < 1e-12);
        assert!((est.likelihood.log_likelihood - plain.log_likelihood).abs() < 1e-12);
        assert_eq!(est.coefficients.len(), 0);
    }

    #[test]
    fn test_matches_explicit_gls() {
        let phi: f64 = 0.6;
        let n = Y.len();
        let trend: Vec<f64> = (0..n).map(|t| t as f64).collect();
        let regressors = vec![
            RegressionVariable::new("mean", vec![1.0; n]),
            RegressionVariable::new("trend", trend.clone()),
        ];
        let est = augmented_filter(&ar1(phi), &Y, &regressors, &FilterOptions::default()).unwrap();

        // Omega_ij = phi^|i-j| / (1 - phi^2)
        let omega = DMatrix::from_fn(n, n, |i, j| {
            phi.powi((i as i32 - j as i32).abs()) / (1.0 - phi * phi)
        });
        let x = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { trend[i] });
        let y = DVector::from_column_slice(&Y);
        let chol = omega.cholesky().unwrap();
        let wx = chol.solve(&x);
        let wy = chol.solve(&y);
        let xtwx = x.transpose() * &wx;
        let b = xtwx.clone().cholesky().unwrap().solve(&(x.transpose() * &wy));
        let e = &y - &x * &b;
        let ssq = e.dot(&chol.solve(&e));

        for j in 0..2 {
            assert!(
                (est.coefficients[j] - b[j]).abs() < 1e-9,
                "coefficient {} mismatch: got {}, expected {}",
                j,
                est.coefficients[j],
                b[j]
            );
        }
        assert!((est.residual_sum_of_squares - ssq).abs() < 1e-9);
        assert_eq!(est.likelihood.degrees_of_freedom, n - 2);

        let cov = xtwx.try_inverse().unwrap() * (ssq / (n - 2) as f64);
        assert!((&est.covariance - &cov).amax() < 1e-9);
        assert!((est.coefficient("trend").unwrap() - b[1]).abs() < 1e-9);
        assert!(est.standard_errors()[0] > 0.0);
    }

    #[test]
    fn test_missing_y_allows_missing_regressor() {
        let mut y = Y.to_vec();
        y[4] = MISSING;
        let mut x = vec![1.0; Y.len()];
        x[4] = MISSING;
        let est = augmented_filter(&ar1(0.3), &y, &[RegressionVariable::new("mean", x.clone())], &FilterOptions::default()).unwrap();
        assert_eq!(est.likelihood.n_obs, Y.len() - 1);

        x[4] = 1.0;
        x[5] = MISSING;
        let err = augmented_filter(&ar1(0.3), &y, &[RegressionVariable::new("mean", x)], &FilterOptions::default());
        assert!(matches!(err, Err(SsfError::Data(_))));
    }

    #[test]
    fn test_length_mismatch_and_singular_design() {
        let opts = FilterOptions::default();
        let short = [RegressionVariable::new("mean", vec![1.0; 3])];
        assert!(matches!(augmented_filter(&ar1(0.3), &Y, &short, &opts), Err(SsfError::Data(_))));

        let zero = [RegressionVariable::new("zero", vec![0.0; Y.len()])];
        assert!(matches!(
            augmented_filter(&ar1(0.3), &Y, &zero, &opts),
            Err(SsfError::Linalg(_))
        ));
    }
}
