//! Structural time-series components.
//!
//! Each block is a self-contained state space meant to be combined with
//! others through `composite::CompositeBuilder`.

use nalgebra::{DMatrixViewMut, DVectorView, DVectorViewMut};

use crate::error::{Result, SsfError};
use crate::model::StateSpaceModel;

fn check_variance(name: &str, var: f64) -> Result<()> {
    if !var.is_finite() || var < 0.0 {
        return Err(SsfError::Configuration(format!(
            "{} variance must be finite and non-negative, got {}",
            name, var
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Local level
// ---------------------------------------------------------------------------

/// Random walk level observed with noise.
///
/// ```text
/// mu_{t+1} = mu_t + eta_t,  eta_t ~ N(0, var_level)
/// y_t      = mu_t + eps_t,  eps_t ~ N(0, var_noise)
/// ```
#[derive(Debug, Clone)]
pub struct LocalLevel {
    var_level: f64,
    var_noise: f64,
}

impl LocalLevel {
    pub fn new(var_level: f64, var_noise: f64) -> Result<Self> {
        check_variance("level", var_level)?;
        check_variance("noise", var_noise)?;
        Ok(Self { var_level, var_noise })
    }
}

impl StateSpaceModel for LocalLevel {
    fn dim(&self) -> usize {
        1
    }
    fn is_time_invariant(&self) -> bool {
        true
    }
    fn diffuse_dim(&self) -> usize {
        1
    }
    fn p0(&self, _p: &mut DMatrixViewMut<'_, f64>) {}
    fn pinf0(&self, pinf: &mut DMatrixViewMut<'_, f64>) {
        pinf[(0, 0)] = 1.0;
    }
    fn t(&self, _pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
        tm[(0, 0)] = 1.0;
    }
    fn tx(&self, _pos: usize, _x: &mut DVectorViewMut<'_, f64>) {}
    fn xt(&self, _pos: usize, _x: &mut DVectorViewMut<'_, f64>) {}
    fn innovation_dim(&self) -> usize {
        1
    }
    fn s(&self, _pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
        s[(0, 0)] = self.var_level.sqrt();
    }
    fn add_v(&self, _pos: usize, p: &mut DMatrixViewMut<'_, f64>) {
        p[(0, 0)] += self.var_level;
    }
    fn z(&self, _pos: usize, z: &mut DVectorViewMut<'_, f64>) {
        z[0] = 1.0;
    }
    fn zx(&self, _pos: usize, x: &DVectorView<'_, f64>) -> f64 {
        x[0]
    }
    fn h(&self, _pos: usize) -> f64 {
        self.var_noise
    }
}

// ---------------------------------------------------------------------------
// Local linear trend
// ---------------------------------------------------------------------------

/// Level and slope, both random walks, observed with noise.
///
/// ```text
/// T = [[1, 1], [0, 1]],  V = diag(var_level, var_slope),  Z = [1, 0]
/// ```
#[derive(Debug, Clone)]
pub struct LocalLinearTrend {
    var_level: f64,
    var_slope: f64,
    var_noise: f64,
}

impl LocalLinearTrend {
    pub fn new(var_level: f64, var_slope: f64, var_noise: f64) -> Result<Self> {
        check_variance("level", var_level)?;
        check_variance("slope", var_slope)?;
        check_variance("noise", var_noise)?;
        Ok(Self {
            var_level,
            var_slope,
            var_noise,
        })
    }
}

impl StateSpaceModel for LocalLinearTrend {
    fn dim(&self) -> usize {
        2
    }
    fn is_time_invariant(&self) -> bool {
        true
    }
    fn diffuse_dim(&self) -> usize {
        2
    }
    fn p0(&self, _p: &mut DMatrixViewMut<'_, f64>) {}
    fn pinf0(&self, pinf: &mut DMatrixViewMut<'_, f64>) {
        pinf[(0, 0)] = 1.0;
        pinf[(1, 1)] = 1.0;
    }
    fn t(&self, _pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
        tm[(0, 0)] = 1.0;
        tm[(0, 1)] = 1.0;
        tm[(1, 1)] = 1.0;
    }
    fn tx(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        x[0] += x[1];
    }
    fn xt(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        x[1] += x[0];
    }
    fn innovation_dim(&self) -> usize {
        2
    }
    fn s(&self, _pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
        s[(0, 0)] = self.var_level.sqrt();
        s[(1, 1)] = self.var_slope.sqrt();
    }
    fn add_v(&self, _pos: usize, p: &mut DMatrixViewMut<'_, f64>) {
        p[(0, 0)] += self.var_level;
        p[(1, 1)] += self.var_slope;
    }
    fn z(&self, _pos: usize, z: &mut DVectorViewMut<'_, f64>) {
        z[0] = 1.0;
    }
    fn zx(&self, _pos: usize, x: &DVectorView<'_, f64>) -> f64 {
        x[0]
    }
    fn h(&self, _pos: usize) -> f64 {
        self.var_noise
    }
}

// ---------------------------------------------------------------------------
// Dummy seasonal
// ---------------------------------------------------------------------------

/// Dummy seasonal of period `s`: the last `s` effects sum to a white noise.
///
/// State `[g_t, g_{t-1}, ..., g_{t-s+2}]`; `g_{t+1} = -sum(state) + w_t`.
#[derive(Debug, Clone)]
pub struct Seasonal {
    period: usize,
    var: f64,
}

impl Seasonal {
    pub fn new(period: usize, var: f64) -> Result<Self> {
        if period < 2 {
            return Err(SsfError::Configuration(format!(
                "seasonal period must be >= 2, got {}",
                period
            )));
        }
        check_variance("seasonal", var)?;
        Ok(Self { period, var })
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl StateSpaceModel for Seasonal {
    fn dim(&self) -> usize {
        self.period - 1
    }
    fn is_time_invariant(&self) -> bool {
        true
    }
    fn diffuse_dim(&self) -> usize {
        self.period - 1
    }
    fn p0(&self, _p: &mut DMatrixViewMut<'_, f64>) {}
    fn pinf0(&self, pinf: &mut DMatrixViewMut<'_, f64>) {
        pinf.fill_diagonal(1.0);
    }
    fn t(&self, _pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
        let n = self.dim();
        for j in 0..n {
            tm[(0, j)] = -1.0;
        }
        for i in 1..n {
            tm[(i, i - 1)] = 1.0;
        }
    }
    fn tx(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let n = self.dim();
        let sum = x.sum();
        for i in (1..n).rev() {
            x[i] = x[i - 1];
        }
        x[0] = -sum;
    }
    fn xt(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let n = self.dim();
        let x0 = x[0];
        for j in 0..n - 1 {
            x[j] = x[j + 1] - x0;
        }
        x[n - 1] = -x0;
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

// ---------------------------------------------------------------------------
// Stochastic cycle
// ---------------------------------------------------------------------------

/// Damped stochastic cycle with frequency `lambda` (radians) and damping `rho`.
///
/// ```text
/// T = rho * [[cos l, sin l], [-sin l, cos l]],  V = var * I,  Z = [1, 0]
/// ```
#[derive(Debug, Clone)]
pub struct Cycle {
    rho: f64,
    cos: f64,
    sin: f64,
    var: f64,
}

impl Cycle {
    pub fn new(rho: f64, lambda: f64, var: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&rho) {
            return Err(SsfError::Configuration(format!(
                "cycle damping must be in [0, 1), got {}",
                rho
            )));
        }
        if !lambda.is_finite() {
            return Err(SsfError::Configuration("cycle frequency must be finite".into()));
        }
        check_variance("cycle", var)?;
        Ok(Self {
            rho,
            cos: rho * lambda.cos(),
            sin: rho * lambda.sin(),
            var,
        })
    }
}

impl StateSpaceModel for Cycle {
    fn dim(&self) -> usize {
        2
    }
    fn is_time_invariant(&self) -> bool {
        true
    }
    fn diffuse_dim(&self) -> usize {
        0
    }
    fn p0(&self, p: &mut DMatrixViewMut<'_, f64>) {
        let v = self.var / (1.0 - self.rho * self.rho);
        p[(0, 0)] = v;
        p[(1, 1)] = v;
    }
    fn pinf0(&self, _pinf: &mut DMatrixViewMut<'_, f64>) {}
    fn t(&self, _pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
        tm[(0, 0)] = self.cos;
        tm[(0, 1)] = self.sin;
        tm[(1, 0)] = -self.sin;
        tm[(1, 1)] = self.cos;
    }
    fn tx(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let (a, b) = (x[0], x[1]);
        x[0] = self.cos * a + self.sin * b;
        x[1] = -self.sin * a + self.cos * b;
    }
    fn xt(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        let (a, b) = (x[0], x[1]);
        x[0] = self.cos * a - self.sin * b;
        x[1] = self.sin * a + self.cos * b;
    }
    fn innovation_dim(&self) -> usize {
        2
    }
    fn s(&self, _pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
        let e = self.var.sqrt();
        s[(0, 0)] = e;
        s[(1, 1)] = e;
    }
    fn add_v(&self, _pos: usize, p: &mut DMatrixViewMut<'_, f64>) {
        p[(0, 0)] += self.var;
        p[(1, 1)] += self.var;
    }
    fn z(&self, _pos: usize, z: &mut DVectorViewMut<'_, f64>) {
        z[0] = 1.0;
    }
    fn zx(&self, _pos: usize, x: &DVectorView<'_, f64>) -> f64 {
        x[0]
    }
}

// ---------------------------------------------------------------------------
// Noise
// ---------------------------------------------------------------------------

/// White noise carried as a one-dimensional state, so that the irregular
/// component gets its own smoothed slice in a composite.
#[derive(Debug, Clone)]
pub struct Noise {
    var: f64,
}

impl Noise {
    pub fn new(var: f64) -> Result<Self> {
        check_variance("noise", var)?;
        Ok(Self { var })
    }
}

impl StateSpaceModel for Noise {
    fn dim(&self) -> usize {
        1
    }
    fn is_time_invariant(&self) -> bool {
        true
    }
    fn diffuse_dim(&self) -> usize {
        0
    }
    fn p0(&self, p: &mut DMatrixViewMut<'_, f64>) {
        p[(0, 0)] = self.var;
    }
    fn pinf0(&self, _pinf: &mut DMatrixViewMut<'_, f64>) {}
    fn t(&self, _pos: usize, _tm: &mut DMatrixViewMut<'_, f64>) {}
    fn tx(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        x[0] = 0.0;
    }
    fn xt(&self, _pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        x[0] = 0.0;
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
