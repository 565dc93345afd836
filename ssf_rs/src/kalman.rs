//! Exact diffuse Kalman filter (univariate measurement).
//!
//! The state mean is carried as a `d × ncols` matrix: column 0 filters the
//! observations, extra columns filter regression variables with the same
//! gains (see `augmented`). While the state is diffuse, the covariance is
//! split into a proper part `P` and a diffuse part `Pinf`:
//!
//! ```text
//! v    = y - Z a
//! M    = P Z',     f    = Z P Z' + H
//! Minf = Pinf Z',  finf = Z Pinf Z'
//!
//! finf > 0:  K0 = Minf / finf
//!            a    += K0 v
//!            P    += K0 K0' f - K0 M' - M K0'
//!            Pinf -= Minf Minf' / finf
//! otherwise: a    += M v / f
//!            P    -= M M' / f
//!
//! a := T a,  P := T P T' + V,  Pinf := T Pinf T'
//! ```
//!
//! The diffuse regime ends when as many diffuse updates as `diffuse_dim`
//! have been performed; `Pinf` is then reset to zero.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use crate::error::{Result, SsfError};
use crate::likelihood::{DiffuseLikelihood, LikelihoodResult};
use crate::model::{full_view, symmetrize, tvt, tx_columns, vector_view, StateSpaceModel};
use crate::types::is_missing;

/// Numerical thresholds of a filter run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterOptions {
    /// `finf` above this value triggers the diffuse update.
    pub diffuse_epsilon: f64,
    /// Proper variances at or below this value make the step degenerate.
    pub variance_epsilon: f64,
    /// Relative tolerance on negative diagonal entries after an update.
    pub psd_tolerance: f64,
    /// Relative eigenvalue cutoff when factoring semi-definite matrices.
    pub eigen_tolerance: f64,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            diffuse_epsilon: 1e-9,
            variance_epsilon: 1e-12,
            psd_tolerance: 1e-9,
            eigen_tolerance: 1e-12,
        }
    }
}

/// How a single position was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Diffuse update; eliminates one diffuse direction.
    Diffuse,
    /// Ordinary update; contributes to the likelihood.
    Proper,
    /// Missing observation; prediction only.
    Missing,
    /// Non-positive variance or loss of positive semi-definiteness; prediction only.
    Degenerate,
}

/// Quantities computed by the update at one position.
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub kind: StepKind,
    /// Prediction errors, one per state column (zero when not observed).
    pub v: DVector<f64>,
    pub f: f64,
    pub finf: f64,
    /// `P Z'`
    pub m: DVector<f64>,
    /// `Pinf Z'`, present while the filter is diffuse.
    pub minf: Option<DVector<f64>>,
}

/// One-step prediction errors of a run.
#[derive(Debug, Clone, Default)]
pub struct PredictionErrors {
    pub v: Vec<f64>,
    pub f: Vec<f64>,
    pub kinds: Vec<StepKind>,
}

impl PredictionErrors {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            v: Vec::with_capacity(n),
            f: Vec::with_capacity(n),
            kinds: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, kind: StepKind, v: f64, f: f64) {
        self.kinds.push(kind);
        self.v.push(v);
        self.f.push(f);
    }

    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }
}

/// Likelihood and prediction errors of an unrecorded run.
#[derive(Debug, Clone)]
pub struct FilterSummary {
    pub likelihood: LikelihoodResult,
    pub errors: PredictionErrors,
}

// ---------------------------------------------------------------------------
// Filter core
// ---------------------------------------------------------------------------

pub struct DiffuseKalmanFilter<'a, M: StateSpaceModel + ?Sized> {
    model: &'a M,
    options: FilterOptions,
    a: DMatrix<f64>,
    p: DMatrix<f64>,
    pinf: DMatrix<f64>,
    diffuse_remaining: usize,
    diffuse_eliminated: usize,
    end_diffuse: Option<usize>,
    pos: usize,
    z: DVector<f64>,
}

impl<'a, M: StateSpaceModel + ?Sized> DiffuseKalmanFilter<'a, M> {
    /// Starts a filter at position 0 with `ncols` state columns.
    pub fn new(model: &'a M, ncols: usize, options: &FilterOptions) -> Result<Self> {
        let init = model.initial();
        init.validate()?;
        let d = model.dim();
        let mut a = DMatrix::zeros(d, ncols.max(1));
        a.set_column(0, &init.a0);
        let diffuse_remaining = init.diffuse_dim;
        Ok(Self {
            model,
            options: *options,
            a,
            p: init.p0,
            pinf: init.pinf0,
            diffuse_remaining,
            diffuse_eliminated: 0,
            end_diffuse: if diffuse_remaining == 0 { Some(0) } else { None },
            pos: 0,
            z: DVector::zeros(d),
        })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_diffuse(&self) -> bool {
        self.diffuse_remaining > 0
    }

    /// Predicted state columns `a_{t|t-1}`.
    pub fn state(&self) -> &DMatrix<f64> {
        &self.a
    }

    /// Proper part of the predicted covariance.
    pub fn variance(&self) -> &DMatrix<f64> {
        &self.p
    }

    /// Diffuse part of the predicted covariance (zero once proper).
    pub fn diffuse_variance(&self) -> &DMatrix<f64> {
        &self.pinf
    }

    /// Index of the first proper step, once the diffuse regime has ended.
    pub fn end_diffuse_position(&self) -> Option<usize> {
        self.end_diffuse
    }

    pub fn diffuse_eliminated(&self) -> usize {
        self.diffuse_eliminated
    }

    /// Consumes the filter, returning the predicted state columns and covariance.
    pub fn into_state(self) -> (DMatrix<f64>, DMatrix<f64>) {
        (self.a, self.p)
    }

    /// Update with `y` (one value per state column), then predict.
    pub fn step(&mut self, y: &[f64]) -> StepInfo {
        let info = self.update(y);
        self.predict();
        info
    }

    fn update(&mut self, y: &[f64]) -> StepInfo {
        let pos = self.pos;
        let ncols = self.a.ncols();
        self.z.fill(0.0);
        self.model.z(pos, &mut vector_view(&mut self.z));

        let m = &self.p * &self.z;
        let f = self.z.dot(&m) + self.model.h(pos);
        let minf = if self.is_diffuse() {
            Some(&self.pinf * &self.z)
        } else {
            None
        };
        let finf = minf.as_ref().map_or(0.0, |mi| self.z.dot(mi));

        let mut v = DVector::zeros(ncols);
        if y.first().map_or(true, |&y0| is_missing(y0)) {
            return StepInfo {
                kind: StepKind::Missing,
                v,
                f,
                finf,
                m,
                minf,
            };
        }
        for j in 0..ncols {
            v[j] = y[j] - self.model.zx(pos, &self.a.column(j));
        }

        let kind = match &minf {
            Some(mi) if finf > self.options.diffuse_epsilon => {
                self.diffuse_update(&v, f, finf, &m, mi);
                StepKind::Diffuse
            }
            _ if f > self.options.variance_epsilon && self.proper_update_is_psd(&m, f) => {
                for j in 0..ncols {
                    self.a.column_mut(j).axpy(v[j] / f, &m, 1.0);
                }
                self.p.ger(-1.0 / f, &m, &m, 1.0);
                StepKind::Proper
            }
            _ => {
                warn!(position = pos, variance = f, "degenerate prediction-error variance, update skipped");
                StepKind::Degenerate
            }
        };

        StepInfo {
            kind,
            v,
            f,
            finf,
            m,
            minf,
        }
    }

    fn diffuse_update(&mut self, v: &DVector<f64>, f: f64, finf: f64, m: &DVector<f64>, minf: &DVector<f64>) {
        let k0 = minf / finf;
        for j in 0..self.a.ncols() {
            self.a.column_mut(j).axpy(v[j], &k0, 1.0);
        }
        self.p.ger(f, &k0, &k0, 1.0);
        self.p.ger(-1.0, &k0, m, 1.0);
        self.p.ger(-1.0, m, &k0, 1.0);
        self.pinf.ger(-1.0 / finf, minf, minf, 1.0);

        self.diffuse_remaining -= 1;
        self.diffuse_eliminated += 1;
        if self.diffuse_remaining == 0 {
            self.pinf.fill(0.0);
            self.end_diffuse = Some(self.pos + 1);
            debug!(
                position = self.pos + 1,
                eliminated = self.diffuse_eliminated,
                "left diffuse regime"
            );
        }
    }

    /// Diagonal of `P - M M' / f` stays non-negative within tolerance.
    fn proper_update_is_psd(&self, m: &DVector<f64>, f: f64) -> bool {
        let tol = self.options.psd_tolerance;
        (0..m.len()).all(|i| {
            let pii = self.p[(i, i)];
            pii - m[i] * m[i] / f >= -tol * pii.abs().max(1.0)
        })
    }

    fn predict(&mut self) {
        let pos = self.pos;
        tx_columns(self.model, pos, &mut self.a);
        tvt(self.model, pos, &mut self.p);
        self.model.add_v(pos, &mut full_view(&mut self.p));
        symmetrize(&mut self.p);
        if self.is_diffuse() {
            tvt(self.model, pos, &mut self.pinf);
            symmetrize(&mut self.pinf);
        }
        self.pos += 1;
    }
}

/// Feeds one step into the likelihood accumulator.
pub(crate) fn accumulate(lik: &mut DiffuseLikelihood, pos: usize, info: &StepInfo) {
    match info.kind {
        StepKind::Diffuse => lik.add_diffuse(info.finf),
        StepKind::Proper => lik.add(info.v[0], info.f),
        StepKind::Degenerate => lik.add_degenerate(pos),
        StepKind::Missing => {}
    }
}

/// Runs the ordinary filter through the diffuse phase.
///
/// Returns the filter positioned at the first proper step (or at the end
/// of the series if the data never eliminate every diffuse direction).
pub(crate) fn run_diffuse_phase<'a, M: StateSpaceModel + ?Sized>(
    model: &'a M,
    y: &[f64],
    options: &FilterOptions,
    lik: &mut DiffuseLikelihood,
    errors: &mut PredictionErrors,
) -> Result<DiffuseKalmanFilter<'a, M>> {
    let mut filter = DiffuseKalmanFilter::new(model, 1, options)?;
    while filter.is_diffuse() && filter.position() < y.len() {
        let pos = filter.position();
        let info = filter.step(&y[pos..=pos]);
        accumulate(lik, pos, &info);
        errors.push(info.kind, info.v[0], info.f);
    }
    Ok(filter)
}

pub(crate) fn check_series(y: &[f64]) -> Result<()> {
    if y.is_empty() {
        return Err(SsfError::Data("empty series".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filtering results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderMode {
    /// Predicted states and covariances at every step.
    Full,
    /// Prediction errors, variances and gains only.
    Light,
}

/// Per-step filter output kept for smoothing.
#[derive(Debug, Clone)]
pub struct FilteringResults {
    mode: RecorderMode,
    pub errors: PredictionErrors,
    finf: Vec<f64>,
    m: Vec<DVector<f64>>,
    minf: Vec<DVector<f64>>,
    a: Vec<DVector<f64>>,
    p: Vec<DMatrix<f64>>,
    pinf: Vec<DMatrix<f64>>,
    end_diffuse_position: usize,
}

impl FilteringResults {
    pub fn new(mode: RecorderMode, n: usize) -> Self {
        let cap = if mode == RecorderMode::Full { n } else { 0 };
        Self {
            mode,
            errors: PredictionErrors::with_capacity(n),
            finf: Vec::with_capacity(n),
            m: Vec::with_capacity(n),
            minf: Vec::new(),
            a: Vec::with_capacity(cap),
            p: Vec::with_capacity(cap),
            pinf: Vec::new(),
            end_diffuse_position: 0,
        }
    }

    /// Records the predicted quantities before the update at the current position.
    fn save_prediction<M: StateSpaceModel + ?Sized>(&mut self, filter: &DiffuseKalmanFilter<'_, M>) {
        if self.mode == RecorderMode::Full {
            self.a.push(filter.state().column(0).into_owned());
            self.p.push(filter.variance().clone());
            if filter.is_diffuse() {
                self.pinf.push(filter.diffuse_variance().clone());
            }
        }
    }

    fn save_update(&mut self, info: StepInfo) {
        self.errors.push(info.kind, info.v[0], info.f);
        self.finf.push(info.finf);
        self.m.push(info.m);
        if let Some(minf) = info.minf {
            self.minf.push(minf);
        }
    }

    pub fn mode(&self) -> RecorderMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn kind(&self, t: usize) -> StepKind {
        self.errors.kinds[t]
    }

    pub fn v(&self, t: usize) -> f64 {
        self.errors.v[t]
    }

    pub fn f(&self, t: usize) -> f64 {
        self.errors.f[t]
    }

    pub fn finf(&self, t: usize) -> f64 {
        self.finf[t]
    }

    pub fn m(&self, t: usize) -> &DVector<f64> {
        &self.m[t]
    }

    /// `Pinf Z'` at a diffuse position.
    pub fn minf(&self, t: usize) -> Option<&DVector<f64>> {
        self.minf.get(t)
    }

    /// Predicted state `a_{t|t-1}` (full mode only).
    pub fn a(&self, t: usize) -> Option<&DVector<f64>> {
        self.a.get(t)
    }

    /// Predicted covariance `P_{t|t-1}` (full mode only).
    pub fn p(&self, t: usize) -> Option<&DMatrix<f64>> {
        self.p.get(t)
    }

    /// Predicted diffuse covariance at a diffuse position (full mode only).
    pub fn pinf(&self, t: usize) -> Option<&DMatrix<f64>> {
        self.pinf.get(t)
    }

    pub fn end_diffuse_position(&self) -> usize {
        self.end_diffuse_position
    }

    /// Filtered state `a_{t|t}` (full mode only).
    pub fn filtered_state(&self, t: usize) -> Option<DVector<f64>> {
        let a = self.a(t)?;
        Some(match self.kind(t) {
            StepKind::Proper => a + &self.m[t] * (self.v(t) / self.f(t)),
            StepKind::Diffuse => a + self.minf(t)? * (self.v(t) / self.finf(t)),
            StepKind::Missing | StepKind::Degenerate => a.clone(),
        })
    }

    /// Filtered covariance `P_{t|t}` (full mode only; NaN during the diffuse phase).
    pub fn filtered_variance(&self, t: usize) -> Option<DMatrix<f64>> {
        let p = self.p(t)?;
        if t < self.end_diffuse_position {
            return Some(DMatrix::from_element(p.nrows(), p.ncols(), f64::NAN));
        }
        Some(match self.kind(t) {
            StepKind::Proper => {
                let m = &self.m[t];
                p - m * m.transpose() / self.f(t)
            }
            _ => p.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Output of a recorded filter run.
#[derive(Debug, Clone)]
pub struct KalmanFilterOutput {
    pub likelihood: LikelihoodResult,
    pub results: FilteringResults,
    /// Predicted state `a_{n|n-1}` after the last observation.
    pub final_state: DVector<f64>,
    /// Predicted covariance `P_{n|n-1}` after the last observation.
    pub final_variance: DMatrix<f64>,
}

/// Runs the diffuse filter, recording the per-step quantities needed for smoothing.
#[tracing::instrument(skip_all, fields(n = y.len(), dim = model.dim()))]
pub fn kalman_filter<M: StateSpaceModel + ?Sized>(
    model: &M,
    y: &[f64],
    options: &FilterOptions,
) -> Result<KalmanFilterOutput> {
    filter_recorded(model, y, options, RecorderMode::Full)
}

pub(crate) fn filter_recorded<M: StateSpaceModel + ?Sized>(
    model: &M,
    y: &[f64],
    options: &FilterOptions,
    mode: RecorderMode,
) -> Result<KalmanFilterOutput> {
    check_series(y)?;
    let n = y.len();
    let mut filter = DiffuseKalmanFilter::new(model, 1, options)?;
    let mut lik = DiffuseLikelihood::new();
    let mut results = FilteringResults::new(mode, n);

    for pos in 0..n {
        results.save_prediction(&filter);
        let info = filter.step(&y[pos..=pos]);
        accumulate(&mut lik, pos, &info);
        results.save_update(info);
    }

    let end = filter.end_diffuse_position();
    results.end_diffuse_position = end.unwrap_or(n);
    let likelihood = lik.finish(None, 0, end.unwrap_or(n), end.is_some())?;
    let (a, p) = filter.into_state();
    Ok(KalmanFilterOutput {
        likelihood,
        results,
        final_state: a.column(0).into_owned(),
        final_variance: p,
    })
}

/// Concentrated diffuse log-likelihood of `y` without recording.
#[tracing::instrument(skip_all, fields(n = y.len(), dim = model.dim()))]
pub fn kalman_loglike<M: StateSpaceModel + ?Sized>(
    model: &M,
    y: &[f64],
    options: &FilterOptions,
) -> Result<LikelihoodResult> {
    check_series(y)?;
    let mut filter = DiffuseKalmanFilter::new(model, 1, options)?;
    let mut lik = DiffuseLikelihood::new();
    for pos in 0..y.len() {
        let info = filter.step(&y[pos..=pos]);
        accumulate(&mut lik, pos, &info);
    }
    let end = filter.end_diffuse_position();
    lik.finish(None, 0, end.unwrap_or(y.len()), end.is_some())
}
