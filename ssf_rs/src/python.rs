//! Python bindings (`python` feature). Missing observations are passed as NaN.

use numpy::{IntoPyArray, PyReadonlyArray1};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use crate::batch;
use crate::error::SsfError;
use crate::forecast;
use crate::kalman::{kalman_loglike, FilterOptions};
use crate::likelihood::LikelihoodResult;
use crate::params::ArimaParams;
use crate::smoother::smooth;
use crate::state_space::ArimaSsf;
use crate::types::ArimaOrder;

fn value_error(e: SsfError) -> PyErr {
    pyo3::exceptions::PyValueError::new_err(e.to_string())
}

fn arima_model(
    order: (usize, usize, usize),
    seasonal: (usize, usize, usize, usize),
    params: &[f64],
) -> PyResult<(ArimaOrder, ArimaParams)> {
    let (p, d, q) = order;
    let (pp, dd, qq, s) = seasonal;
    let order = ArimaOrder::new(p, d, q, pp, dd, qq, s);
    let params = ArimaParams::from_flat(params, &order, true).map_err(value_error)?;
    Ok((order, params))
}

fn likelihood_dict<'py>(py: Python<'py>, lik: &LikelihoodResult) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    dict.set_item("loglike", lik.log_likelihood)?;
    dict.set_item("ssq_err", lik.ssq_err)?;
    dict.set_item("sigma2", lik.sigma2)?;
    dict.set_item("n_obs", lik.n_obs)?;
    dict.set_item("degrees_of_freedom", lik.degrees_of_freedom)?;
    dict.set_item("diffuse_dimension_eliminated", lik.diffuse_dimension_eliminated)?;
    dict.set_item("end_diffuse_position", lik.end_diffuse_position)?;
    dict.set_item("converged", lik.converged)?;
    dict.set_item("degenerate_positions", lik.degenerate_positions.clone())?;
    Ok(dict)
}

/// Smoke-test function: returns the version string.
#[pyfunction]
fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Concentrated diffuse log-likelihood of an ARIMA model.
///
/// `params` is the flat vector `[ar(p), ma(q), sar(P), sma(Q)]`.
#[pyfunction]
#[pyo3(signature = (y, order, seasonal, params))]
fn arima_loglike<'py>(
    py: Python<'py>,
    y: PyReadonlyArray1<'py, f64>,
    order: (usize, usize, usize),
    seasonal: (usize, usize, usize, usize),
    params: PyReadonlyArray1<'py, f64>,
) -> PyResult<Py<PyDict>> {
    let endog = y.as_slice()?;
    let (order, params) = arima_model(order, seasonal, params.as_slice()?)?;
    let ssf = ArimaSsf::new(&order, &params).map_err(value_error)?;
    let lik = kalman_loglike(&ssf, endog, &FilterOptions::default()).map_err(value_error)?;
    Ok(likelihood_dict(py, &lik)?.into())
}

/// Smoothed states of an ARIMA model.
///
/// Returns a dict with: states (n × d), state_variances (diagonals, NaN
/// during the diffuse phase), signal, end_diffuse_position.
#[pyfunction]
#[pyo3(signature = (y, order, seasonal, params))]
fn arima_smooth<'py>(
    py: Python<'py>,
    y: PyReadonlyArray1<'py, f64>,
    order: (usize, usize, usize),
    seasonal: (usize, usize, usize, usize),
    params: PyReadonlyArray1<'py, f64>,
) -> PyResult<Py<PyDict>> {
    let endog = y.as_slice()?;
    let (order, params) = arima_model(order, seasonal, params.as_slice()?)?;
    let ssf = ArimaSsf::new(&order, &params).map_err(value_error)?;
    let sm = smooth(&ssf, endog, &FilterOptions::default()).map_err(value_error)?;

    let states: Vec<Vec<f64>> = sm.states().iter().map(|a| a.iter().copied().collect()).collect();
    let variances: Vec<Vec<f64>> = (0..sm.len())
        .map(|t| sm.raw_variance(t).diagonal().iter().copied().collect())
        .collect();

    let dict = PyDict::new(py);
    dict.set_item("states", states)?;
    dict.set_item("state_variances", variances)?;
    dict.set_item("signal", sm.signal(&ssf).into_pyarray(py))?;
    dict.set_item("end_diffuse_position", sm.end_diffuse_position())?;
    Ok(dict.into())
}

/// H-step ahead forecast of an ARIMA model.
///
/// Returns a dict with: mean, variance, ci_lower, ci_upper.
#[pyfunction]
#[pyo3(signature = (y, order, seasonal, params, steps=10, alpha=0.05))]
fn arima_forecast<'py>(
    py: Python<'py>,
    y: PyReadonlyArray1<'py, f64>,
    order: (usize, usize, usize),
    seasonal: (usize, usize, usize, usize),
    params: PyReadonlyArray1<'py, f64>,
    steps: usize,
    alpha: f64,
) -> PyResult<Py<PyDict>> {
    let endog = y.as_slice()?;
    let (order, params) = arima_model(order, seasonal, params.as_slice()?)?;
    let result = forecast::arima_forecast(endog, &order, &params, steps, alpha, &FilterOptions::default())
        .map_err(value_error)?;

    let dict = PyDict::new(py);
    dict.set_item("mean", result.mean)?;
    dict.set_item("variance", result.variance)?;
    dict.set_item("ci_lower", result.ci_lower)?;
    dict.set_item("ci_upper", result.ci_upper)?;
    Ok(dict.into())
}

/// Log-likelihood of many series under one ARIMA model (Rayon).
///
/// Returns a list of dicts (one per series); failed runs carry an "error" key.
#[pyfunction]
#[pyo3(signature = (series_list, order, seasonal, params))]
fn arima_batch_loglike<'py>(
    py: Python<'py>,
    series_list: Vec<PyReadonlyArray1<'py, f64>>,
    order: (usize, usize, usize),
    seasonal: (usize, usize, usize, usize),
    params: PyReadonlyArray1<'py, f64>,
) -> PyResult<Py<PyList>> {
    let (order, params) = arima_model(order, seasonal, params.as_slice()?)?;
    let ssf = ArimaSsf::new(&order, &params).map_err(value_error)?;

    let series: Vec<Vec<f64>> = series_list
        .iter()
        .map(|a| a.as_slice().map(|s| s.to_vec()))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let results = py.allow_threads(|| batch::batch_loglike(&ssf, &series, &FilterOptions::default()));

    let py_results = results
        .iter()
        .map(|r| match r {
            Ok(lik) => likelihood_dict(py, lik),
            Err(e) => {
                let dict = PyDict::new(py);
                dict.set_item("error", e.to_string())?;
                dict.set_item("converged", false)?;
                Ok(dict)
            }
        })
        .collect::<PyResult<Vec<_>>>()?;

    let list = PyList::new(py, &py_results)?;
    Ok(list.into())
}

/// Python module definition.
#[pymodule]
fn ssf_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(version, m)?)?;
    m.add_function(wrap_pyfunction!(arima_loglike, m)?)?;
    m.add_function(wrap_pyfunction!(arima_smooth, m)?)?;
    m.add_function(wrap_pyfunction!(arima_forecast, m)?)?;
    m.add_function(wrap_pyfunction!(arima_batch_loglike, m)?)?;
    Ok(())
}
