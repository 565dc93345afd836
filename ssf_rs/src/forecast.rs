use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{Result, SsfError};
use crate::kalman::{kalman_filter, FilterOptions, KalmanFilterOutput, PredictionErrors, StepKind};
use crate::model::{full_view, tvt, vector_view, StateSpaceModel};
use crate::params::ArimaParams;
use crate::state_space::ArimaSsf;
use crate::types::ArimaOrder;

/// H-step ahead forecast result.
#[derive(Debug, Clone)]
pub struct ForecastResult {
    /// Forecast means E[y_{n+h}] for h = 1..steps.
    pub mean: Vec<f64>,
    /// Forecast variances Var[y_{n+h}].
    pub variance: Vec<f64>,
    /// Lower confidence interval bounds.
    pub ci_lower: Vec<f64>,
    /// Upper confidence interval bounds.
    pub ci_upper: Vec<f64>,
}

/// Residual diagnostics output.
#[derive(Debug, Clone)]
pub struct ResidualOutput {
    /// Raw prediction errors v_t (0 at missing positions).
    pub residuals: Vec<f64>,
    /// v_t / sqrt(f_t * scale) at proper steps, NaN elsewhere.
    pub standardized_residuals: Vec<f64>,
}

/// H-step ahead forecasts from the state predicted after the last observation.
///
///   y_hat_h = Z a_h
///   F_h     = (Z P_h Z' + H) * scale
///   a_{h+1} = T a_h
///   P_{h+1} = T P_h T' + V
///
/// `scale` multiplies the model variances (the concentrated `sigma2` for a
/// model built with unit innovation variance, 1 otherwise).
pub fn forecast<M: StateSpaceModel + ?Sized>(
    model: &M,
    filter_output: &KalmanFilterOutput,
    steps: usize,
    alpha: f64,
    scale: f64,
) -> Result<ForecastResult> {
    if !filter_output.likelihood.converged {
        return Err(SsfError::Data(
            "cannot forecast before the diffuse phase has ended".into(),
        ));
    }
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(SsfError::Configuration(format!(
            "confidence level alpha must be in (0, 1), got {}",
            alpha
        )));
    }

    let z_alpha = z_score(1.0 - alpha / 2.0);
    let d = model.dim();
    let start = filter_output.results.len();
    let mut a = filter_output.final_state.clone();
    let mut p = filter_output.final_variance.clone();

    let mut result = ForecastResult {
        mean: Vec::with_capacity(steps),
        variance: Vec::with_capacity(steps),
        ci_lower: Vec::with_capacity(steps),
        ci_upper: Vec::with_capacity(steps),
    };

    for pos in start..start + steps {
        let y_hat = model.zx(pos, &a.rows(0, d));
        let pz = {
            let mut z = nalgebra::DVector::zeros(d);
            model.z(pos, &mut vector_view(&mut z));
            z.dot(&(&p * &z))
        };
        let f_h = ((pz + model.h(pos)) * scale).max(0.0);
        let se = f_h.sqrt();
        result.mean.push(y_hat);
        result.variance.push(f_h);
        result.ci_lower.push(y_hat - z_alpha * se);
        result.ci_upper.push(y_hat + z_alpha * se);

        model.tx(pos, &mut vector_view(&mut a));
        tvt(model, pos, &mut p);
        model.add_v(pos, &mut full_view(&mut p));
    }

    Ok(result)
}

/// Raw and standardized prediction errors.
pub fn compute_residuals(errors: &PredictionErrors, scale: f64) -> ResidualOutput {
    let standardized = errors
        .kinds
        .iter()
        .zip(errors.v.iter().zip(errors.f.iter()))
        .map(|(kind, (&v, &f))| match kind {
            StepKind::Proper if f * scale > 0.0 => v / (f * scale).sqrt(),
            _ => f64::NAN,
        })
        .collect();

    ResidualOutput {
        residuals: errors.v.clone(),
        standardized_residuals: standardized,
    }
}

/// Scale applied to an ARIMA model's variances: its own `sigma2` is already
/// built into the model, otherwise the concentrated estimate is used.
fn arima_scale(params: &ArimaParams, output: &KalmanFilterOutput) -> f64 {
    match params.sigma2 {
        Some(_) => 1.0,
        None => output.likelihood.sigma2,
    }
}

/// Build ARIMA state space → filter → forecast.
pub fn arima_forecast(
    y: &[f64],
    order: &ArimaOrder,
    params: &ArimaParams,
    steps: usize,
    alpha: f64,
    options: &FilterOptions,
) -> Result<ForecastResult> {
    let ssf = ArimaSsf::new(order, params)?;
    let fo = kalman_filter(&ssf, y, options)?;
    forecast(&ssf, &fo, steps, alpha, arima_scale(params, &fo))
}

/// Build ARIMA state space → filter → residuals.
pub fn arima_residuals(
    y: &[f64],
    order: &ArimaOrder,
    params: &ArimaParams,
    options: &FilterOptions,
) -> Result<ResidualOutput> {
    let ssf = ArimaSsf::new(order, params)?;
    let fo = kalman_filter(&ssf, y, options)?;
    Ok(compute_residuals(&fo.results.errors, arima_scale(params, &fo)))
}

/// Standard normal quantile.
fn z_score(p: f64) -> f64 {
    Normal::standard().inverse_cdf(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structural::LocalLevel;
    use crate::types::MISSING;
    use nalgebra::{DMatrixViewMut, DVectorViewMut};

    const Y: [f64; 10] = [0.3, 0.9, 0.4, -0.2, 0.5, 1.1, 0.8, 0.2, -0.4, 0.6];

    fn ar1_params(phi: f64, sigma2: Option<f64>) -> ArimaParams {
        ArimaParams {
            ar_coeffs: vec![phi],
            ma_coeffs: vec![],
            sar_coeffs: vec![],
            sma_coeffs: vec![],
            sigma2,
        }
    }

    #[test]
    fn test_z_score_standard() {
        assert!((z_score(0.975) - 1.959963984540054).abs() < 1e-9);
        assert!((z_score(0.5)).abs() < 1e-10);
        assert!((z_score(0.025) + 1.959963984540054).abs() < 1e-9);
        assert!((z_score(0.95) - 1.6448536269514722).abs() < 1e-9);
    }

    #[test]
    fn test_forecast_ar1_closed_form() {
        // y_{n+h} | y = phi^h y_n, Var = sigma2 (1 + phi^2 + ... + phi^{2(h-1)})
        let phi: f64 = 0.6;
        let order = ArimaOrder::regular(1, 0, 0);
        let params = ar1_params(phi, Some(2.0));
        let result = arima_forecast(&Y, &order, &params, 4, 0.05, &FilterOptions::default()).unwrap();
        let last = Y[Y.len() - 1];
        let mut var = 0.0;
        for h in 0..4 {
            var += 2.0 * phi.powi(2 * h as i32);
            assert!((result.mean[h] - phi.powi(h as i32 + 1) * last).abs() < 1e-12);
            assert!((result.variance[h] - var).abs() < 1e-12);
        }
    }

    #[test]
    fn test_forecast_ci_symmetric() {
        let order = ArimaOrder::regular(1, 0, 0);
        let result = arima_forecast(&Y, &order, &ar1_params(0.5, None), 5, 0.05, &FilterOptions::default()).unwrap();
        for i in 0..5 {
            let lower_dist = (result.mean[i] - result.ci_lower[i]).abs();
            let upper_dist = (result.ci_upper[i] - result.mean[i]).abs();
            assert!((lower_dist - upper_dist).abs() < 1e-10,
                "CI not symmetric at step {}: lower_dist={}, upper_dist={}",
                i, lower_dist, upper_dist);
        }
        for i in 1..5 {
            assert!(result.variance[i] >= result.variance[i - 1]);
        }
    }

    #[test]
    fn test_forecast_zero_steps() {
        let order = ArimaOrder::regular(1, 0, 0);
        let result = arima_forecast(&Y, &order, &ar1_params(0.5, None), 0, 0.05, &FilterOptions::default()).unwrap();
        assert!(result.mean.is_empty());
    }

    #[test]
    fn test_local_level_forecast_is_flat() {
        let model = LocalLevel::new(0.5, 1.0).unwrap();
        let fo = kalman_filter(&model, &Y, &FilterOptions::default()).unwrap();
        let result = forecast(&model, &fo, 3, 0.1, 1.0).unwrap();
        assert!((result.mean[0] - result.mean[2]).abs() < 1e-12);
        // Each step adds the level variance.
        assert!((result.variance[1] - result.variance[0] - 0.5).abs() < 1e-12);
    }

    /// Second state direction is diffuse but never observed.
    struct Unobserved;

    impl StateSpaceModel for Unobserved {
        fn dim(&self) -> usize {
            2
        }
        fn is_time_invariant(&self) -> bool {
            true
        }
        fn diffuse_dim(&self) -> usize {
            1
        }
        fn p0(&self, p: &mut DMatrixViewMut<'_, f64>) {
            p[(0, 0)] = 1.0 / 0.75;
        }
        fn pinf0(&self, pinf: &mut DMatrixViewMut<'_, f64>) {
            pinf[(1, 1)] = 1.0;
        }
        fn t(&self, _pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
            tm[(0, 0)] = 0.5;
            tm[(1, 1)] = 1.0;
        }
        fn innovation_dim(&self) -> usize {
            1
        }
        fn s(&self, _pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
            s[(0, 0)] = 1.0;
        }
        fn z(&self, _pos: usize, z: &mut DVectorViewMut<'_, f64>) {
            z[0] = 1.0;
        }
    }

    #[test]
    fn test_forecast_requires_end_of_diffuse_phase() {
        let fo = kalman_filter(&Unobserved, &Y, &FilterOptions::default()).unwrap();
        assert!(!fo.likelihood.converged);
        assert!(matches!(
            forecast(&Unobserved, &fo, 2, 0.05, 1.0),
            Err(SsfError::Data(_))
        ));
    }

    #[test]
    fn test_standardized_residuals() {
        let mut y = Y.to_vec();
        y[3] = MISSING;
        let order = ArimaOrder::regular(1, 1, 0);
        let params = ar1_params(0.4, None);
        let result = arima_residuals(&y, &order, &params, &FilterOptions::default()).unwrap();
        assert_eq!(result.residuals.len(), y.len());
        // First step is diffuse, fourth is missing.
        assert!(result.standardized_residuals[0].is_nan());
        assert!(result.standardized_residuals[3].is_nan());
        let proper: Vec<f64> = result
            .standardized_residuals
            .iter()
            .copied()
            .filter(|r| r.is_finite())
            .collect();
        assert_eq!(proper.len(), y.len() - 2);
        // With the concentrated scale the squared standardized residuals average to one.
        let mean_sq = proper.iter().map(|r| r * r).sum::<f64>() / proper.len() as f64;
        assert!((mean_sq - 1.0).abs() < 1e-10);
    }
}
