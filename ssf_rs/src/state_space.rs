use nalgebra::{DMatrix, DMatrixViewMut, DVector, DVectorView, DVectorViewMut};

use crate::error::{Result, SsfError};
use crate::initialization::solve_discrete_lyapunov;
use crate::model::StateSpaceModel;
use crate::params::ArimaParams;
use crate::polynomial::{reduced_ar, reduced_ma};
use crate::types::ArimaOrder;

/// Harvey-representation state space for a seasonal ARIMA model.
///
/// State layout: `[regular diff (d) | seasonal diff (s*D) | ARMA (k_order)]`.
///
/// ```text
/// alpha_{t+1} = T alpha_t + R e_t,   e_t ~ N(0, sigma2)
/// y_t         = Z' alpha_t
/// ```
///
/// The differencing states are diffuse; the ARMA block starts at its
/// stationary covariance, so the initialization is exact.
#[derive(Debug, Clone)]
pub struct ArimaSsf {
    order: ArimaOrder,
    k_states: usize,
    k_states_diff: usize,
    /// Companion first column: phi[i] = -reduced_ar[i+1], padded to k_order.
    phi: Vec<f64>,
    /// Innovation loading of the ARMA block: [1, theta_1, ..., theta_{k_order-1}].
    psi: Vec<f64>,
    sigma2: f64,
    /// Stationary covariance of the ARMA block.
    arma_cov: DMatrix<f64>,
}

impl ArimaSsf {
    /// Construct the state space for a SARIMA model.
    ///
    /// Supports SARIMA(p,d,q)(P,D,Q,s) with D <= 1. The stationary part
    /// must have all AR roots outside the unit circle.
    pub fn new(order: &ArimaOrder, params: &ArimaParams) -> Result<Self> {
        if order.dd > 1 {
            return Err(SsfError::Configuration(
                "seasonal differencing D > 1 is not supported".into(),
            ));
        }
        if (order.dd > 0 || order.pp > 0 || order.qq > 0) && order.s < 2 {
            return Err(SsfError::Configuration(format!(
                "seasonal terms require period s >= 2, got s={}",
                order.s
            )));
        }
        params.check_order(order)?;

        let ko = order.k_order();
        let red_ar = reduced_ar(params, order);
        let red_ma = reduced_ma(params, order);

        let phi: Vec<f64> = (0..ko)
            .map(|i| red_ar.get(i + 1).map_or(0.0, |c| -c))
            .collect();
        let psi: Vec<f64> = (0..ko)
            .map(|i| red_ma.get(i).copied().unwrap_or(0.0))
            .collect();
        let sigma2 = params.variance();

        // Stationary covariance of the ARMA companion block.
        let mut t_arma = DMatrix::<f64>::zeros(ko, ko);
        for i in 0..ko {
            t_arma[(i, 0)] = phi[i];
            if i + 1 < ko {
                t_arma[(i, i + 1)] = 1.0;
            }
        }
        let r = DVector::from_column_slice(&psi);
        let q = &r * r.transpose() * sigma2;
        let arma_cov = solve_discrete_lyapunov(&t_arma, &q).map_err(|_| {
            SsfError::Configuration("non-stationary AR polynomial".into())
        })?;

        Ok(Self {
            order: order.clone(),
            k_states: order.k_states(),
            k_states_diff: order.k_states_diff(),
            phi,
            psi,
            sigma2,
            arma_cov,
        })
    }

    /// Airline model (0,1,1)(0,1,1)_period with concentrated variance.
    pub fn airline(period: usize, theta: f64, btheta: f64) -> Result<Self> {
        Self::new(&ArimaOrder::airline(period), &ArimaParams::airline(theta, btheta))
    }

    pub fn order(&self) -> &ArimaOrder {
        &self.order
    }

    pub fn k_states_diff(&self) -> usize {
        self.k_states_diff
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    /// Index of the first ARMA state.
    fn sd(&self) -> usize {
        self.k_states_diff
    }

    fn k_order(&self) -> usize {
        self.k_states - self.k_states_diff
    }

    /// Index of the last seasonal differencing state, if any.
    fn last_seasonal(&self) -> Option<usize> {
        if self.order.dd > 0 {
            Some(self.order.d + self.order.s - 1)
        } else {
            None
        }
    }
}

impl StateSpaceModel for ArimaSsf {
    fn dim(&self) -> usize {
        self.k_states
    }

    fn is_time_invariant(&self) -> bool {
        true
    }

    fn diffuse_dim(&self) -> usize {
        self.k_states_diff
    }

    fn p0(&self, p: &mut DMatrixViewMut<'_, f64>) {
        let (sd, ko) = (self.sd(), self.k_order());
        p.view_mut((sd, sd), (ko, ko)).copy_from(&self.arma_cov);
    }

    fn pinf0(&self, pinf: &mut DMatrixViewMut<'_, f64>) {
        for i in 0..self.k_states_diff {
            pinf[(i, i)] = 1.0;
        }
    }

    /// Structure for SARIMA(p,d,q)(P,D,Q,s):
    /// 1. Regular diff block [0..d, 0..d]: upper triangular ones
    /// 2. Seasonal diff block: s×s cyclic shift
    /// 3. Cross-diff: regular diff states → last seasonal state
    /// 4. Diff → ARMA: regular diff + first seasonal state → first ARMA state
    /// 5. ARMA companion [sd..sd+ko, sd..sd+ko]
    fn t(&self, _pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
        let d = self.order.d;
        let s = self.order.s;
        let sd = self.sd();
        let ko = self.k_order();

        for i in 0..d {
            for j in i..d {
                tm[(i, j)] = 1.0;
            }
        }
        if let Some(last) = self.last_seasonal() {
            tm[(d, last)] = 1.0;
            for i in 0..(s - 1) {
                tm[(d + i + 1, d + i)] = 1.0;
            }
            for i in 0..d {
                tm[(i, last)] = 1.0;
            }
            tm[(d, sd)] = 1.0;
        }
        for i in 0..d {
            tm[(i, sd)] = 1.0;
        }
        for i in 0..ko {
            tm[(sd + i, sd)] = self.phi[i];
            if i + 1 < ko {
                tm[(sd + i, sd + i + 1)] = 1.0;
            }
        }
    }

    fn tx(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let d = self.order.d;
        let sd = self.sd();
        let ko = self.k_order();
        let x_sd = x[sd];

        let seas_last = match self.last_seasonal() {
            Some(last) => {
                let v = x[last];
                for i in (d..last).rev() {
                    x[i + 1] = x[i];
                }
                x[d] = v + x_sd;
                v
            }
            None => 0.0,
        };

        // Row i sums x[i..d]; walk backwards so the suffix sum only reads old values.
        let mut suffix = 0.0;
        for i in (0..d).rev() {
            suffix += x[i];
            x[i] = suffix + seas_last + x_sd;
        }

        for i in 0..ko {
            let next = if i + 1 < ko { x[sd + i + 1] } else { 0.0 };
            x[sd + i] = self.phi[i] * x_sd + next;
        }
    }

    fn xt(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let d = self.order.d;
        let sd = self.sd();
        let ko = self.k_order();
        let old = x.clone_owned();

        let diff_sum: f64 = old.rows(0, d).sum();
        let arma_first: f64 = (0..ko).map(|i| self.phi[i] * old[sd + i]).sum();

        let mut prefix = 0.0;
        for j in 0..d {
            prefix += old[j];
            x[j] = prefix;
        }

        let seasonal_head = match self.last_seasonal() {
            Some(last) => {
                for j in d..last {
                    x[j] = old[j + 1];
                }
                x[last] = old[d] + diff_sum;
                old[d]
            }
            None => 0.0,
        };

        x[sd] = diff_sum + seasonal_head + arma_first;
        for i in 1..ko {
            x[sd + i] = old[sd + i - 1];
        }
    }

    fn innovation_dim(&self) -> usize {
        1
    }

    fn s(&self, _pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
        let scale = self.sigma2.sqrt();
        let sd = self.sd();
        for (i, &c) in self.psi.iter().enumerate() {
            s[(sd + i, 0)] = c * scale;
        }
    }

    fn add_v(&self, _pos: usize, p: &mut DMatrixViewMut<'_, f64>) {
        let sd = self.sd();
        for (i, &ci) in self.psi.iter().enumerate() {
            for (j, &cj) in self.psi.iter().enumerate() {
                p[(sd + i, sd + j)] += self.sigma2 * ci * cj;
            }
        }
    }

    /// Z[i] = 1 for the regular diff states, the last seasonal state and the first ARMA state.
    fn z(&self, _pos: usize, z: &mut DVectorViewMut<'_, f64>) {
        for i in 0..self.order.d {
            z[i] = 1.0;
        }
        if let Some(last) = self.last_seasonal() {
            z[last] = 1.0;
        }
        z[self.sd()] = 1.0;
    }

    fn zx(&self, _pos: usize, x: &DVectorView<'_, f64>) -> f64 {
        let mut r = x.rows(0, self.order.d).sum() + x[self.sd()];
        if let Some(last) = self.last_seasonal() {
            r += x[last];
        }
        r
    }
}
