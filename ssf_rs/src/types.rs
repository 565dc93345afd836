/// Seasonal ARIMA order `(p, d, q)(P, D, Q)_s`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArimaOrder {
    pub p: usize,   // AR order
    pub d: usize,   // differencing order
    pub q: usize,   // MA order
    pub pp: usize,  // seasonal AR order (P)
    pub dd: usize,  // seasonal differencing order (D)
    pub qq: usize,  // seasonal MA order (Q)
    pub s: usize,   // seasonal period
}

impl ArimaOrder {
    pub fn new(p: usize, d: usize, q: usize, pp: usize, dd: usize, qq: usize, s: usize) -> Self {
        Self { p, d, q, pp, dd, qq, s }
    }

    /// Non-seasonal `(p, d, q)` order.
    pub fn regular(p: usize, d: usize, q: usize) -> Self {
        Self::new(p, d, q, 0, 0, 0, 0)
    }

    /// Airline model `(0,1,1)(0,1,1)_s`.
    pub fn airline(s: usize) -> Self {
        Self::new(0, 1, 1, 0, 1, 1, s)
    }

    /// Extended AR order: p + s*P
    pub fn k_ar(&self) -> usize {
        self.p + self.s * self.pp
    }

    /// Extended MA order: q + s*Q
    pub fn k_ma(&self) -> usize {
        self.q + self.s * self.qq
    }

    /// Stationary ARMA block dimension: max(k_ar, k_ma + 1)
    pub fn k_order(&self) -> usize {
        std::cmp::max(self.k_ar(), self.k_ma() + 1)
    }

    /// Differencing (diffuse) state dimension: d + s*D
    pub fn k_states_diff(&self) -> usize {
        self.d + self.s * self.dd
    }

    /// Total state dimension
    pub fn k_states(&self) -> usize {
        self.k_order() + self.k_states_diff()
    }

    /// Number of ARMA coefficients in a flat parameter vector.
    pub fn n_coefficients(&self) -> usize {
        self.p + self.q + self.pp + self.qq
    }
}

/// Explicit marker for a missing observation.
pub const MISSING: f64 = f64::NAN;

/// An observation is missing when it is not a finite number.
#[inline]
pub fn is_missing(y: f64) -> bool {
    !y.is_finite()
}

/// Converts an optional-valued series into the NaN-marked form used by the filters.
pub fn from_options(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().map(|v| v.unwrap_or(MISSING)).collect()
}
