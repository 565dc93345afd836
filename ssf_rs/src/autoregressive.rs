use nalgebra::{DMatrix, DMatrixViewMut, DVectorView, DVectorViewMut};

use crate::error::{Result, SsfError};
use crate::initialization::solve_discrete_lyapunov;
use crate::model::StateSpaceModel;

/// Stationary AR(p) in lag-stacked form `[x_t, x_{t-1}, ..., x_{t-p+1}]`.
///
/// `tx` and `xt` run in O(p): the transition is a dot product followed by a
/// shift.
#[derive(Debug, Clone)]
pub struct ArSsf {
    phi: Vec<f64>,
    var: f64,
    stationary_cov: DMatrix<f64>,
}

impl ArSsf {
    pub fn new(phi: &[f64], var: f64) -> Result<Self> {
        if phi.is_empty() {
            return Err(SsfError::Configuration("AR order must be at least 1".into()));
        }
        if phi.iter().any(|c| !c.is_finite()) {
            return Err(SsfError::Configuration("AR coefficients must be finite".into()));
        }
        if !var.is_finite() || var < 0.0 {
            return Err(SsfError::Configuration(format!(
                "AR innovation variance must be non-negative, got {}",
                var
            )));
        }
        let p = phi.len();
        let mut t = DMatrix::zeros(p, p);
        for (j, &c) in phi.iter().enumerate() {
            t[(0, j)] = c;
        }
        for i in 1..p {
            t[(i, i - 1)] = 1.0;
        }
        let mut q = DMatrix::zeros(p, p);
        q[(0, 0)] = var;
        let stationary_cov = solve_discrete_lyapunov(&t, &q)
            .map_err(|_| SsfError::Configuration("non-stationary AR polynomial".into()))?;
        Ok(Self {
            phi: phi.to_vec(),
            var,
            stationary_cov,
        })
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.phi
    }
}

impl StateSpaceModel for ArSsf {
    fn dim(&self) -> usize {
        self.phi.len()
    }
    fn is_time_invariant(&self) -> bool {
        true
    }
    fn diffuse_dim(&self) -> usize {
        0
    }
    fn p0(&self, p: &mut DMatrixViewMut<'_, f64>) {
        p.copy_from(&self.stationary_cov);
    }
    fn pinf0(&self, _pinf: &mut DMatrixViewMut<'_, f64>) {}
    fn t(&self, _pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
        for (j, &c) in self.phi.iter().enumerate() {
            tm[(0, j)] = c;
        }
        for i in 1..self.phi.len() {
            tm[(i, i - 1)] = 1.0;
        }
    }
    fn tx(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let p = self.phi.len();
        let head: f64 = self.phi.iter().enumerate().map(|(j, &c)| c * x[j]).sum();
        for i in (1..p).rev() {
            x[i] = x[i - 1];
        }
        x[0] = head;
    }
    fn xt(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let p = self.phi.len();
        let x0 = x[0];
        for j in 0..p - 1 {
            x[j] = self.phi[j] * x0 + x[j + 1];
        }
        x[p - 1] = self.phi[p - 1] * x0;
    }
    fn innovation_dim(&self) -> usize {
        1
    }
    fn s(&self, _pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
        s[(0, 0)] = self.var.sqrt();
    }
    fn add_v(&self, _pos: usize, p: &mut DMatrixViewMut<'_, f64>) {
        p[(0, 0)] += self.var;
    }
    fn z(&self, _pos: usize, z: &mut DVectorViewMut<'_, f64>) {
        z[0] = 1.0;
    }
    fn zx(&self, _pos: usize, x: &DVectorView<'_, f64>) -> f64 {
        x[0]
    }
}

/// Sampling error of a repeated survey: an AR process scaled by a
/// time-varying standard error, `y_t = scale_t * e_t`.
///
/// Positions beyond the supplied scales reuse the last one.
#[derive(Debug, Clone)]
pub struct SurveyErrorSsf {
    ar: ArSsf,
    scale: Vec<f64>,
}

impl SurveyErrorSsf {
    pub fn new(phi: &[f64], var: f64, scale: Vec<f64>) -> Result<Self> {
        if scale.is_empty() {
            return Err(SsfError::Configuration("survey error scales are empty".into()));
        }
        if scale.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(SsfError::Configuration(
                "survey error scales must be finite and non-negative".into(),
            ));
        }
        Ok(Self {
            ar: ArSsf::new(phi, var)?,
            scale,
        })
    }

    fn scale_at(&self, pos: usize) -> f64 {
        self.scale[pos.min(self.scale.len() - 1)]
    }
}

impl StateSpaceModel for SurveyErrorSsf {
    fn dim(&self) -> usize {
        self.ar.dim()
    }
    fn is_time_invariant(&self) -> bool {
        false
    }
    fn diffuse_dim(&self) -> usize {
        0
    }
    fn p0(&self, p: &mut DMatrixViewMut<'_, f64>) {
        self.ar.p0(p)
    }
    fn pinf0(&self, _pinf: &mut DMatrixViewMut<'_, f64>) {}
    fn t(&self, pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
        self.ar.t(pos, tm)
    }
    fn tx(&self, pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        self.ar.tx(pos, x)
    }
    fn xt(&self, pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        self.ar.xt(pos, x)
    }
    fn innovation_dim(&self) -> usize {
        1
    }
    fn s(&self, pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
        self.ar.s(pos, s)
    }
    fn add_v(&self, pos: usize, p: &mut DMatrixViewMut<'_, f64>) {
        self.ar.add_v(pos, p)
    }
    fn z(&self, pos: usize, z: &mut DVectorViewMut<'_, f64>) {
        z[0] = self.scale_at(pos);
    }
    fn zx(&self, pos: usize, x: &DVectorView<'_, f64>) -> f64 {
        self.scale_at(pos) * x[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalman::{kalman_loglike, FilterOptions};
    use crate::model::assert_consistent_ops;
    use crate::params::ArimaParams;
    use crate::state_space::ArimaSsf;
    use crate::types::ArimaOrder;

    #[test]
    fn test_ar_structured_ops() {
        assert_consistent_ops(&ArSsf::new(&[0.5], 1.0).unwrap(), 0);
        assert_consistent_ops(&ArSsf::new(&[0.5, -0.3, 0.1], 2.0).unwrap(), 0);
        let survey = SurveyErrorSsf::new(&[0.6, 0.2], 1.0, vec![1.0, 2.0, 0.5]).unwrap();
        for pos in 0..5 {
            assert_consistent_ops(&survey, pos);
        }
        assert!(!survey.is_time_invariant());
        assert!((survey.loading(10)[0] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_ar2_matches_arima_loglike() {
        let phi = [0.5, -0.3];
        let ar = ArSsf::new(&phi, 1.0).unwrap();
        let params = ArimaParams {
            ar_coeffs: phi.to_vec(),
            ma_coeffs: vec![],
            sar_coeffs: vec![],
            sma_coeffs: vec![],
            sigma2: None,
        };
        let arima = ArimaSsf::new(&ArimaOrder::regular(2, 0, 0), &params).unwrap();
        let y = [0.2, -0.4, 1.1, 0.3, -0.9, 0.5, 0.0, 0.7];
        let opts = FilterOptions::default();
        let a = kalman_loglike(&ar, &y, &opts).unwrap();
        let b = kalman_loglike(&arima, &y, &opts).unwrap();
        assert!((a.log_likelihood - b.log_likelihood).abs() < 1e-10);
    }

    #[test]
    fn test_survey_error_unit_scale_is_ar() {
        let y = [0.2, -0.4, 1.1, 0.3, -0.9];
        let opts = FilterOptions::default();
        let survey = SurveyErrorSsf::new(&[0.7], 1.0, vec![1.0]).unwrap();
        let ar = ArSsf::new(&[0.7], 1.0).unwrap();
        let a = kalman_loglike(&survey, &y, &opts).unwrap();
        let b = kalman_loglike(&ar, &y, &opts).unwrap();
        assert!((a.log_likelihood - b.log_likelihood).abs() < 1e-12);
    }

    #[test]
    fn test_nonstationary_ar_rejected() {
        assert!(ArSsf::new(&[1.0], 1.0).is_err());
        assert!(ArSsf::new(&[], 1.0).is_err());
        assert!(SurveyErrorSsf::new(&[0.5], 1.0, vec![]).is_err());
    }
}
