use ssf_rs::augmented::{augmented_filter, RegressionVariable};
use ssf_rs::chandrasekhar::chandrasekhar_filter;
use ssf_rs::kalman::{kalman_filter, kalman_loglike, FilterOptions};
use ssf_rs::params::ArimaParams;
use ssf_rs::polynomial::{apply_lag_poly, differencing_poly, integrate_lag_poly};
use ssf_rs::smoother::smooth;
use ssf_rs::square_root::square_root_filter;
use ssf_rs::state_space::ArimaSsf;
use ssf_rs::types::ArimaOrder;

fn load_fixture() -> serde_json::Value {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/airline.json");
    let data = std::fs::read_to_string(path).expect("fixtures file not found");
    serde_json::from_str(&data).expect("invalid JSON")
}

/// Log passengers, first `n_used` months.
fn log_airline() -> Vec<f64> {
    let fixture = load_fixture();
    let n = fixture["n_used"].as_u64().unwrap() as usize;
    fixture["data"]
        .as_array()
        .unwrap()
        .iter()
        .take(n)
        .map(|v| v.as_f64().unwrap().ln())
        .collect()
}

fn airline_model() -> ArimaSsf {
    let fixture = load_fixture();
    ArimaSsf::airline(
        fixture["period"].as_u64().unwrap() as usize,
        fixture["theta"].as_f64().unwrap(),
        fixture["btheta"].as_f64().unwrap(),
    )
    .unwrap()
}

fn assert_rel(a: f64, b: f64, tol: f64, what: &str) {
    assert!(
        (a - b).abs() <= tol * a.abs().max(b.abs()).max(1.0),
        "{} mismatch: {} vs {}",
        what,
        a,
        b
    );
}

#[test]
fn test_airline_diffuse_likelihood() {
    let y = log_airline();
    assert_eq!(y.len(), 135);
    let lik = kalman_loglike(&airline_model(), &y, &FilterOptions::default()).unwrap();
    assert_eq!(lik.diffuse_dimension_eliminated, 13);
    assert_eq!(lik.end_diffuse_position, 13);
    assert!(lik.converged);
    assert_eq!(lik.n_obs, 135 - 13);
    assert!(lik.log_likelihood.is_finite());
    assert!(!lik.is_degenerate());
}

#[test]
fn test_airline_matches_differenced_series() {
    // The weighted sum of squares does not depend on how the differencing
    // states are initialized.
    let y = log_airline();
    let w = apply_lag_poly(&differencing_poly(1, 1, 12), &y);
    let ma = ArimaSsf::new(&ArimaOrder::new(0, 0, 1, 0, 0, 1, 12), &ArimaParams::airline(-0.6, -0.8)).unwrap();
    let opts = FilterOptions::default();
    let diffuse = kalman_loglike(&airline_model(), &y, &opts).unwrap();
    let stationary = kalman_loglike(&ma, &w, &opts).unwrap();
    assert_eq!(diffuse.n_obs, stationary.n_obs);
    assert_rel(diffuse.ssq_err, stationary.ssq_err, 1e-9, "ssq");
}

#[test]
fn test_airline_mean_regressor_two_step() {
    let y = log_airline();
    let n = y.len();
    let model = airline_model();
    let opts = FilterOptions::default();
    // Regressor whose differenced values are constant: the mean of the
    // differenced series.
    let x = integrate_lag_poly(&differencing_poly(1, 1, 12), &vec![1.0; n]);

    let est = augmented_filter(&model, &y, &[RegressionVariable::new("mean", x.clone())], &opts).unwrap();

    // Two steps: filter y and x separately (the gains do not depend on the
    // data), then weighted least squares on the proper prediction errors.
    let fy = kalman_filter(&model, &y, &opts).unwrap();
    let fx = kalman_filter(&model, &x, &opts).unwrap();
    let end = fy.results.end_diffuse_position();
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for t in end..n {
        let f = fy.results.f(t);
        let (ey, ex) = (fy.results.v(t), fx.results.v(t));
        assert_rel(f, fx.results.f(t), 1e-12, "variance");
        sxx += ex * ex / f;
        sxy += ex * ey / f;
        syy += ey * ey / f;
    }
    let b = sxy / sxx;
    let ssq = syy - b * sxy;

    assert_rel(est.coefficients[0], b, 1e-9, "coefficient");
    assert_rel(est.residual_sum_of_squares, ssq, 1e-9, "ssq");
    assert_rel(est.likelihood.ssq_err, ssq, 1e-9, "likelihood ssq");
    assert_eq!(est.likelihood.degrees_of_freedom, n - 13 - 1);
    let se = est.standard_errors()[0];
    assert_rel(se * se, ssq / (n - 14) as f64 / sxx, 1e-9, "variance of the mean");
}

#[test]
fn test_airline_filter_variants_agree() {
    let y = log_airline();
    let model = airline_model();
    let opts = FilterOptions::default();
    let plain = kalman_filter(&model, &y, &opts).unwrap();
    let sqrt = square_root_filter(&model, &y, &opts).unwrap();
    let fast = chandrasekhar_filter(&model, &y, &opts).unwrap();
    for t in 0..y.len() {
        assert_rel(plain.results.v(t), sqrt.errors.v[t], 1e-9, "square-root v");
        assert_rel(plain.results.f(t), sqrt.errors.f[t], 1e-9, "square-root f");
        assert_rel(plain.results.v(t), fast.errors.v[t], 1e-9, "fast v");
        assert_rel(plain.results.f(t), fast.errors.f[t], 1e-9, "fast f");
    }
    assert_rel(plain.likelihood.log_likelihood, sqrt.likelihood.log_likelihood, 1e-9, "square-root loglike");
    assert_rel(plain.likelihood.log_likelihood, fast.likelihood.log_likelihood, 1e-9, "fast loglike");
}

#[test]
fn test_airline_smoother_ends_at_filtered_state() {
    let y = log_airline();
    let model = airline_model();
    let opts = FilterOptions::default();
    let out = kalman_filter(&model, &y, &opts).unwrap();
    let sm = smooth(&model, &y, &opts).unwrap();
    let last = y.len() - 1;
    let filtered = out.results.filtered_state(last).unwrap();
    assert!((sm.state(last) - filtered).amax() < 1e-9);
    // Exact measurement: the smoothed signal reproduces the observations.
    let signal = sm.signal(&model);
    for t in 0..y.len() {
        assert!((signal[t] - y[t]).abs() < 1e-8, "signal mismatch at {}", t);
    }
    assert!(sm.variance(12).is_none());
    assert!(sm.variance(13).is_some());
}
