//! Rayon-based parallel batch processing.
//!
//! Two shapes of work: many series under one model, and many candidate
//! models (parameter vectors) on one series, the inner loop of an
//! optimizer. Every run owns its filter state; models and data are
//! shared read-only.

use rayon::prelude::*;

use crate::error::Result;
use crate::forecast::{arima_forecast, ForecastResult};
use crate::kalman::{kalman_loglike, FilterOptions};
use crate::likelihood::LikelihoodResult;
use crate::model::StateSpaceModel;
use crate::params::ArimaParams;
use crate::smoother::{smooth, SmoothingResults};
use crate::state_space::ArimaSsf;
use crate::types::ArimaOrder;

/// Log-likelihood of each series under the same model.
pub fn batch_loglike<M: StateSpaceModel + ?Sized>(
    model: &M,
    series: &[Vec<f64>],
    options: &FilterOptions,
) -> Vec<Result<LikelihoodResult>> {
    series
        .par_iter()
        .map(|y| kalman_loglike(model, y, options))
        .collect()
}

/// Log-likelihood of one series under each candidate model.
pub fn batch_models_loglike<M: StateSpaceModel>(
    models: &[M],
    y: &[f64],
    options: &FilterOptions,
) -> Vec<Result<LikelihoodResult>> {
    models
        .par_iter()
        .map(|model| kalman_loglike(model, y, options))
        .collect()
}

/// Concentrated log-likelihood of one series for each flat ARIMA parameter vector.
///
/// `candidates[i]` is laid out as in [`ArimaParams::from_flat`] without `sigma2`.
pub fn arima_candidates_loglike(
    y: &[f64],
    order: &ArimaOrder,
    candidates: &[Vec<f64>],
    options: &FilterOptions,
) -> Vec<Result<LikelihoodResult>> {
    candidates
        .par_iter()
        .map(|flat| {
            let params = ArimaParams::from_flat(flat, order, true)?;
            let ssf = ArimaSsf::new(order, &params)?;
            kalman_loglike(&ssf, y, options)
        })
        .collect()
}

/// Smooth each series under the same model.
pub fn batch_smooth<M: StateSpaceModel + ?Sized>(
    model: &M,
    series: &[Vec<f64>],
    options: &FilterOptions,
) -> Vec<Result<SmoothingResults>> {
    series
        .par_iter()
        .map(|y| smooth(model, y, options))
        .collect()
}

/// Forecast multiple series in parallel.
///
/// `params_list[i]` is the flat (concentrated) parameter vector for `series[i]`.
pub fn batch_forecast(
    series: &[Vec<f64>],
    order: &ArimaOrder,
    params_list: &[Vec<f64>],
    steps: usize,
    alpha: f64,
    options: &FilterOptions,
) -> Vec<Result<ForecastResult>> {
    series
        .par_iter()
        .zip(params_list.par_iter())
        .map(|(y, flat)| {
            let params = ArimaParams::from_flat(flat, order, true)?;
            arima_forecast(y, order, &params, steps, alpha, options)
        })
        .collect()
}
