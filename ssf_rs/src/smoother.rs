//! Fixed-interval smoothing (backward information recursion).
//!
//! Going backward, `r` and `N` carry the information about the predicted
//! state from future observations. Each position is processed in two
//! parts, the transition then the measurement:
//!
//! ```text
//! r := T' r,  N := T' N T
//! proper:  r += Z' (v/f - k'r),  N := N - Z n' - n Z + Z Z' (k'n + 1/f),
//!          k = M/f, n = N k
//! diffuse: r1 := r1 - Z' (k0'r1) + Z' v/finf - Z' (k1'r0),
//!          r0 := r0 - Z' (k0'r0),
//!          k0 = Minf/finf, k1 = (M - k0 f)/finf
//! ```
//!
//! Smoothed states are `a + P r0 + Pinf r1`. Smoothed covariances
//! `P - P N P` are only defined after the diffuse phase; before it they are
//! reported as NaN.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use crate::composite::CompositeSsf;
use crate::error::{Result, SsfError};
use crate::kalman::{filter_recorded, kalman_filter, FilterOptions, FilteringResults, RecorderMode, StepKind};
use crate::model::{vector_view, xtvt, StateSpaceModel};

/// Smoothed state and covariance of one composite component.
#[derive(Debug, Clone)]
pub struct ComponentSlice {
    pub state: DVector<f64>,
    /// `None` during the diffuse phase.
    pub variance: Option<DMatrix<f64>>,
}

#[derive(Debug, Clone)]
pub struct SmoothingResults {
    states: Vec<DVector<f64>>,
    variances: Vec<DMatrix<f64>>,
    /// Smoothed measurement disturbances `E[eps_t | y]`.
    pub measurement_disturbances: Vec<f64>,
    pub measurement_disturbance_variances: Vec<f64>,
    /// Smoothed state innovations `E[eta_t | y]`, `eta_t = alpha_{t+1} - T_t alpha_t`.
    pub state_disturbances: Vec<DVector<f64>>,
    pub state_disturbance_variances: Vec<DMatrix<f64>>,
    end_diffuse_position: usize,
}

impl SmoothingResults {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn end_diffuse_position(&self) -> usize {
        self.end_diffuse_position
    }

    pub fn state(&self, t: usize) -> &DVector<f64> {
        &self.states[t]
    }

    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }

    /// Smoothed covariance; `None` during the diffuse phase.
    pub fn variance(&self, t: usize) -> Option<&DMatrix<f64>> {
        if t < self.end_diffuse_position {
            None
        } else {
            self.variances.get(t)
        }
    }

    /// Raw covariance, NaN during the diffuse phase.
    pub fn raw_variance(&self, t: usize) -> &DMatrix<f64> {
        &self.variances[t]
    }

    /// Sub-vector and sub-matrix of the block `[pos, pos + dim)`.
    pub fn slice(&self, t: usize, pos: usize, dim: usize) -> ComponentSlice {
        ComponentSlice {
            state: self.states[t].rows(pos, dim).into_owned(),
            variance: self
                .variance(t)
                .map(|v| v.view((pos, pos), (dim, dim)).into_owned()),
        }
    }

    /// Every component of a composite at position `t`, keyed by name.
    pub fn component_slices(&self, model: &CompositeSsf, t: usize) -> BTreeMap<String, ComponentSlice> {
        model
            .component_names()
            .filter_map(|name| {
                let (pos, dim) = model.component(name)?;
                Some((name.to_string(), self.slice(t, pos, dim)))
            })
            .collect()
    }

    /// Signal contribution `Z_i a_i` of one composite component at every position.
    pub fn component_signal(&self, model: &CompositeSsf, name: &str) -> Result<Vec<f64>> {
        if model.component(name).is_none() {
            return Err(SsfError::Configuration(format!("unknown component '{}'", name)));
        }
        Ok(self
            .states
            .iter()
            .enumerate()
            .filter_map(|(t, a)| model.component_signal(name, t, a))
            .collect())
    }

    /// Smoothed signal `Z_t a_t`.
    pub fn signal<M: StateSpaceModel + ?Sized>(&self, model: &M) -> Vec<f64> {
        let d = model.dim();
        self.states
            .iter()
            .enumerate()
            .map(|(t, a)| model.zx(t, &a.rows(0, d)))
            .collect()
    }
}

/// Backward information carried between positions.
struct Information {
    r0: DVector<f64>,
    r1: DVector<f64>,
    n: Option<DMatrix<f64>>,
    z: DVector<f64>,
}

impl Information {
    fn new(d: usize, with_variance: bool) -> Self {
        Self {
            r0: DVector::zeros(d),
            r1: DVector::zeros(d),
            n: if with_variance { Some(DMatrix::zeros(d, d)) } else { None },
            z: DVector::zeros(d),
        }
    }

    fn transition<M: StateSpaceModel + ?Sized>(&mut self, model: &M, pos: usize) {
        model.xt(pos, &mut vector_view(&mut self.r0));
        model.xt(pos, &mut vector_view(&mut self.r1));
        if let Some(n) = self.n.as_mut() {
            xtvt(model, pos, n);
        }
    }

    fn load_z<M: StateSpaceModel + ?Sized>(&mut self, model: &M, pos: usize) {
        self.z.fill(0.0);
        model.z(pos, &mut vector_view(&mut self.z));
    }

    fn proper_update(&mut self, v: f64, f: f64, m: &DVector<f64>) {
        let k = m / f;
        let c = v / f - k.dot(&self.r0);
        self.r0.axpy(c, &self.z, 1.0);
        if let Some(n) = self.n.as_mut() {
            let nk = &*n * &k;
            let zz = k.dot(&nk) + 1.0 / f;
            n.ger(-1.0, &self.z, &nk, 1.0);
            n.ger(-1.0, &nk, &self.z, 1.0);
            n.ger(zz, &self.z, &self.z, 1.0);
        }
    }

    fn diffuse_update(&mut self, v: f64, f: f64, finf: f64, m: &DVector<f64>, minf: &DVector<f64>) {
        let k0 = minf / finf;
        let k1 = (m - &k0 * f) / finf;
        let c1 = -k0.dot(&self.r1) + v / finf - k1.dot(&self.r0);
        let c0 = -k0.dot(&self.r0);
        self.r1.axpy(c1, &self.z, 1.0);
        self.r0.axpy(c0, &self.z, 1.0);
    }
}

fn require_full(results: &FilteringResults) -> Result<()> {
    if results.mode() != RecorderMode::Full {
        return Err(SsfError::Configuration(
            "smoothing requires filtering results recorded in full mode".into(),
        ));
    }
    Ok(())
}

/// Filters then smooths `y`.
#[tracing::instrument(skip_all, fields(n = y.len(), dim = model.dim()))]
pub fn smooth<M: StateSpaceModel + ?Sized>(
    model: &M,
    y: &[f64],
    options: &FilterOptions,
) -> Result<SmoothingResults> {
    let out = kalman_filter(model, y, options)?;
    smooth_filtered(model, &out.results)
}

/// Smoothed states, covariances and disturbances from recorded filter output.
pub fn smooth_filtered<M: StateSpaceModel + ?Sized>(
    model: &M,
    results: &FilteringResults,
) -> Result<SmoothingResults> {
    require_full(results)?;
    let n = results.len();
    let d = model.dim();
    let end = results.end_diffuse_position();
    let nan = DMatrix::from_element(d, d, f64::NAN);

    let mut states = vec![DVector::zeros(d); n];
    let mut variances = vec![nan.clone(); n];
    let mut eps = vec![0.0; n];
    let mut eps_var = vec![f64::NAN; n];
    let mut eta = vec![DVector::zeros(d); n];
    let mut eta_var = vec![nan; n];

    let mut info = Information::new(d, true);
    for t in (0..n).rev() {
        // State disturbance, from the information on alpha_{t+1}.
        let v_t = model.innovation_variance(t);
        eta[t] = &v_t * &info.r0;
        if t + 1 >= end {
            if let Some(nm) = info.n.as_ref() {
                eta_var[t] = &v_t - &v_t * nm * &v_t;
            }
        }

        if t + 1 < n {
            info.transition(model, t);
        }
        info.load_z(model, t);

        let h = model.h(t);
        let m = results.m(t);
        let (v, f) = (results.v(t), results.f(t));
        match results.kind(t) {
            StepKind::Proper => {
                let u = (v - m.dot(&info.r0)) / f;
                eps[t] = h * u;
                if t >= end {
                    if let Some(nm) = info.n.as_ref() {
                        let mnm = m.dot(&(nm * m));
                        eps_var[t] = h - h * h * (1.0 / f + mnm / (f * f));
                    }
                }
                info.proper_update(v, f, m);
            }
            StepKind::Diffuse => {
                let minf = results.minf(t).ok_or_else(|| {
                    SsfError::Configuration(format!("missing diffuse gain at position {}", t))
                })?;
                let finf = results.finf(t);
                eps[t] = -h * minf.dot(&info.r0) / finf;
                info.diffuse_update(v, f, finf, m, minf);
            }
            StepKind::Missing | StepKind::Degenerate => {
                eps_var[t] = h;
            }
        }

        let (a, p) = match (results.a(t), results.p(t)) {
            (Some(a), Some(p)) => (a, p),
            _ => {
                return Err(SsfError::Configuration(format!(
                    "missing predicted state at position {}",
                    t
                )))
            }
        };
        let mut state = a + p * &info.r0;
        if t < end {
            if let Some(pinf) = results.pinf(t) {
                state += pinf * &info.r1;
            }
        } else if let Some(nm) = info.n.as_ref() {
            variances[t] = p - p * nm * p;
        }
        states[t] = state;
    }

    Ok(SmoothingResults {
        states,
        variances,
        measurement_disturbances: eps,
        measurement_disturbance_variances: eps_var,
        state_disturbances: eta,
        state_disturbance_variances: eta_var,
        end_diffuse_position: end,
    })
}

/// Smoothed states without storing covariances.
///
/// The filter keeps only prediction errors and gains; the backward pass
/// keeps only `r`; states are rebuilt forward with
/// `a_{t+1} = T a_t + V r_t`.
#[tracing::instrument(skip_all, fields(n = y.len(), dim = model.dim()))]
pub fn fast_smooth<M: StateSpaceModel + ?Sized>(
    model: &M,
    y: &[f64],
    options: &FilterOptions,
) -> Result<Vec<DVector<f64>>> {
    let out = filter_recorded(model, y, options, RecorderMode::Light)?;
    let results = &out.results;
    let n = results.len();
    let d = model.dim();

    let mut info = Information::new(d, false);
    let mut r_next = vec![DVector::zeros(d); n];
    for t in (0..n).rev() {
        r_next[t] = info.r0.clone();
        if t + 1 < n {
            info.transition(model, t);
        }
        info.load_z(model, t);
        let m = results.m(t);
        match results.kind(t) {
            StepKind::Proper => info.proper_update(results.v(t), results.f(t), m),
            StepKind::Diffuse => {
                let minf = results.minf(t).ok_or_else(|| {
                    SsfError::Configuration(format!("missing diffuse gain at position {}", t))
                })?;
                info.diffuse_update(results.v(t), results.f(t), results.finf(t), m, minf);
            }
            StepKind::Missing | StepKind::Degenerate => {}
        }
    }

    let init = model.initial();
    let mut states = Vec::with_capacity(n);
    let mut a = init.a0 + &init.p0 * &info.r0 + &init.pinf0 * &info.r1;
    for (t, r) in r_next.iter().enumerate() {
        states.push(a.clone());
        model.tx(t, &mut vector_view(&mut a));
        a += model.innovation_variance(t) * r;
    }
    Ok(states)
}
