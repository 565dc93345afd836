//! Diffuse likelihood accumulator.
//!
//! Proper steps contribute `ln f_t` and `v_t^2 / f_t`; diffuse steps
//! contribute `ln f∞_t` and are counted as eliminated dimensions. The
//! innovation variance is concentrated out:
//!
//! ```text
//! sigma2 = ssq / n
//! ll     = -0.5 * (n ln 2pi + n ln sigma2 + n + sum ln f + sum ln f∞)
//! ```

use std::f64::consts::PI;

use crate::error::{Result, SsfError};

/// Terminal value of a filter run.
#[derive(Debug, Clone)]
pub struct LikelihoodResult {
    /// Concentrated diffuse log-likelihood.
    pub log_likelihood: f64,
    /// Weighted residual sum of squares `sum v_t^2 / f_t`.
    pub ssq_err: f64,
    /// Maximum likelihood estimate of the innovation variance, `ssq / n_obs`.
    pub sigma2: f64,
    /// Sum of `ln f_t` over proper steps.
    pub sum_log_f: f64,
    /// Sum of `ln f∞_t` over diffuse steps.
    pub sum_log_diffuse_f: f64,
    /// Number of informative proper steps.
    pub n_obs: usize,
    /// `n_obs` minus the number of concentrated regression coefficients.
    pub degrees_of_freedom: usize,
    /// Number of diffuse-branch updates performed.
    pub diffuse_dimension_eliminated: usize,
    /// Index of the first step filtered in the proper regime.
    pub end_diffuse_position: usize,
    /// True when every diffuse direction was eliminated by the data.
    pub converged: bool,
    /// Steps whose update was skipped for a non-positive variance.
    pub degenerate_positions: Vec<usize>,
}

impl LikelihoodResult {
    /// True when the run completed but skipped at least one step.
    pub fn is_degenerate(&self) -> bool {
        !self.degenerate_positions.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiffuseLikelihood {
    n_obs: usize,
    ssq: f64,
    sum_log_f: f64,
    sum_log_diffuse_f: f64,
    n_diffuse: usize,
    degenerate_positions: Vec<usize>,
}

impl DiffuseLikelihood {
    pub fn new() -> Self {
        Self::default()
    }

    /// Proper step with prediction error `v` and variance `f`.
    pub fn add(&mut self, v: f64, f: f64) {
        self.n_obs += 1;
        self.ssq += v * v / f;
        self.sum_log_f += f.ln();
    }

    /// Proper step whose squared error is accumulated elsewhere (augmented filter).
    pub fn add_variance(&mut self, f: f64) {
        self.n_obs += 1;
        self.sum_log_f += f.ln();
    }

    /// Diffuse step with diffuse variance `finf`.
    pub fn add_diffuse(&mut self, finf: f64) {
        self.n_diffuse += 1;
        self.sum_log_diffuse_f += finf.ln();
    }

    pub fn add_degenerate(&mut self, pos: usize) {
        self.degenerate_positions.push(pos);
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn ssq(&self) -> f64 {
        self.ssq
    }

    /// Concentrated log-likelihood from the accumulated terms.
    ///
    /// `ssq` overrides the accumulated sum of squares and `n_regressors`
    /// is subtracted from the degrees of freedom.
    pub fn finish(
        self,
        ssq: Option<f64>,
        n_regressors: usize,
        end_diffuse_position: usize,
        converged: bool,
    ) -> Result<LikelihoodResult> {
        if self.n_obs == 0 {
            return Err(SsfError::DegenerateModel(format!(
                "no informative observations ({} degenerate, {} diffuse)",
                self.degenerate_positions.len(),
                self.n_diffuse
            )));
        }
        let n = self.n_obs as f64;
        let ssq = ssq.unwrap_or(self.ssq);
        let sigma2 = ssq / n;
        let log_likelihood = -0.5
            * (n * (2.0 * PI).ln()
                + n * sigma2.max(1e-300).ln()
                + n
                + self.sum_log_f
                + self.sum_log_diffuse_f);

        Ok(LikelihoodResult {
            log_likelihood,
            ssq_err: ssq,
            sigma2,
            sum_log_f: self.sum_log_f,
            sum_log_diffuse_f: self.sum_log_diffuse_f,
            n_obs: self.n_obs,
            degrees_of_freedom: self.n_obs.saturating_sub(n_regressors),
            diffuse_dimension_eliminated: self.n_diffuse,
            end_diffuse_position,
            converged,
            degenerate_positions: self.degenerate_positions,
        })
    }
}
