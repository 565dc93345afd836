//! Lag-polynomial algebra. A polynomial is its coefficient vector in
//! increasing powers of the lag operator `L`, constant term first.

use crate::params::ArimaParams;
use crate::types::ArimaOrder;

/// Product of two lag polynomials.
pub fn polymul(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return vec![];
    }
    (0..a.len() + b.len() - 1)
        .map(|k| {
            let lo = k.saturating_sub(b.len() - 1);
            let hi = k.min(a.len() - 1);
            (lo..=hi).map(|i| a[i] * b[k - i]).sum()
        })
        .collect()
}

/// `1 + sign * (c_1 L^step + c_2 L^(2 step) + ... + c_len L^(len step))`.
fn lag_poly(coeffs: &[f64], len: usize, step: usize, sign: f64) -> Vec<f64> {
    let mut p = vec![0.0; len * step + 1];
    p[0] = 1.0;
    for (i, &c) in coeffs.iter().take(len).enumerate() {
        p[(i + 1) * step] = sign * c;
    }
    p
}

/// Differencing polynomial (1 - L)^d (1 - L^s)^D.
pub fn differencing_poly(d: usize, dd: usize, s: usize) -> Vec<f64> {
    let mut r = vec![1.0];
    for _ in 0..d {
        r = polymul(&r, &[1.0, -1.0]);
    }
    if s > 0 {
        let mut seasonal = vec![0.0; s + 1];
        seasonal[0] = 1.0;
        seasonal[s] = -1.0;
        for _ in 0..dd {
            r = polymul(&r, &seasonal);
        }
    }
    r
}

/// `(1 - phi_1 L - ... - phi_p L^p)(1 - Phi_1 L^s - ... - Phi_P L^(Ps))`.
pub fn reduced_ar(params: &ArimaParams, order: &ArimaOrder) -> Vec<f64> {
    polymul(
        &lag_poly(&params.ar_coeffs, order.p, 1, -1.0),
        &lag_poly(&params.sar_coeffs, order.pp, order.s, -1.0),
    )
}

/// `(1 + theta_1 L + ... + theta_q L^q)(1 + Theta_1 L^s + ... + Theta_Q L^(Qs))`.
pub fn reduced_ma(params: &ArimaParams, order: &ArimaOrder) -> Vec<f64> {
    polymul(
        &lag_poly(&params.ma_coeffs, order.q, 1, 1.0),
        &lag_poly(&params.sma_coeffs, order.qq, order.s, 1.0),
    )
}

/// Applies a lag polynomial to a series: out[t] = sum_i poly[i] * y[t + deg - i].
///
/// The output has `y.len() - deg` elements; a missing input propagates.
pub fn apply_lag_poly(poly: &[f64], y: &[f64]) -> Vec<f64> {
    let deg = poly.len().saturating_sub(1);
    if poly.is_empty() || y.len() <= deg {
        return vec![];
    }
    (deg..y.len())
        .map(|t| poly.iter().enumerate().map(|(i, &c)| c * y[t - i]).sum())
        .collect()
}

/// Inverse of `apply_lag_poly` for a monic polynomial, starting from zero pre-sample values.
pub fn integrate_lag_poly(poly: &[f64], x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; x.len()];
    for t in 0..x.len() {
        let mut acc = x[t];
        for (i, &c) in poly.iter().enumerate().skip(1) {
            if t >= i {
                acc -= c * y[t - i];
            }
        }
        y[t] = acc;
    }
    y
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
