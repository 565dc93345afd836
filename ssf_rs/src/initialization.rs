use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::error::{Result, SsfError};

/// Initial state distribution `alpha_0 ~ N(a0, P0 + kappa * Pinf0)`, kappa -> infinity.
#[derive(Debug, Clone)]
pub struct Initialization {
    /// Initial mean a0.
    pub a0: DVector<f64>,
    /// Proper part of the initial covariance.
    pub p0: DMatrix<f64>,
    /// Diffuse part of the initial covariance.
    pub pinf0: DMatrix<f64>,
    /// Declared rank of `pinf0`.
    pub diffuse_dim: usize,
}

const SYMMETRY_TOL: f64 = 1e-9;
const MAX_DOUBLINGS: usize = 100;
const RANK_TOL: f64 = 1e-9;

impl Initialization {
    /// Fully stationary initialization (no diffuse directions).
    pub fn stationary(a0: DVector<f64>, p0: DMatrix<f64>) -> Self {
        let d = a0.len();
        Self {
            a0,
            p0,
            pinf0: DMatrix::zeros(d, d),
            diffuse_dim: 0,
        }
    }

    /// Checks dimensions, symmetry, non-negative variances and the
    /// compatibility of the diffuse and proper parts.
    pub fn validate(&self) -> Result<()> {
        let d = self.a0.len();
        if d == 0 {
            return Err(SsfError::Configuration("state dimension must be positive".into()));
        }
        for (name, m) in [("P0", &self.p0), ("Pinf0", &self.pinf0)] {
            if m.nrows() != d || m.ncols() != d {
                return Err(SsfError::Configuration(format!(
                    "{} must be {}×{}, got {}×{}",
                    name,
                    d,
                    d,
                    m.nrows(),
                    m.ncols()
                )));
            }
            if m.iter().any(|v| !v.is_finite()) {
                return Err(SsfError::Configuration(format!("{} must be finite", name)));
            }
            let scale = m.amax().max(1.0);
            for i in 0..d {
                if m[(i, i)] < -SYMMETRY_TOL * scale {
                    return Err(SsfError::Configuration(format!(
                        "{} has a negative variance at {}",
                        name, i
                    )));
                }
                for j in (i + 1)..d {
                    if (m[(i, j)] - m[(j, i)]).abs() > SYMMETRY_TOL * scale {
                        return Err(SsfError::Configuration(format!(
                            "{} is not symmetric at ({}, {})",
                            name, i, j
                        )));
                    }
                }
            }
        }
        if self.a0.iter().any(|v| !v.is_finite()) {
            return Err(SsfError::Configuration("a0 must be finite".into()));
        }
        if self.diffuse_dim > d {
            return Err(SsfError::Configuration(format!(
                "diffuse dimension {} exceeds state dimension {}",
                self.diffuse_dim, d
            )));
        }
        let rank = numerical_rank(&self.pinf0, RANK_TOL);
        if rank != self.diffuse_dim {
            return Err(SsfError::Configuration(format!(
                "diffuse dimension {} is inconsistent with Pinf0 of rank {}",
                self.diffuse_dim, rank
            )));
        }
        Ok(())
    }
}

/// Number of eigenvalues of the symmetric matrix `m` above `tol * max|lambda|`.
fn numerical_rank(m: &DMatrix<f64>, tol: f64) -> usize {
    if m.amax() == 0.0 {
        return 0;
    }
    let eigenvalues = SymmetricEigen::new(m.clone()).eigenvalues;
    let cutoff = tol * eigenvalues.amax();
    eigenvalues.iter().filter(|&&l| l > cutoff).count()
}

/// Solves the discrete Lyapunov equation `P = T P T' + Q` by doubling.
///
/// Fails with a configuration error when `T` is not stable (the series
/// `sum_k T^k Q T'^k` diverges).
pub fn solve_discrete_lyapunov(t: &DMatrix<f64>, q: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let mut a = t.clone();
    let mut p = q.clone();
    for _ in 0..MAX_DOUBLINGS {
        let next = &p + &a * &p * a.transpose();
        a = &a * &a;
        p = next;
        if p.iter().any(|v| !v.is_finite()) || a.iter().any(|v| !v.is_finite()) {
            break;
        }
        if a.amax() <= f64::EPSILON * 1e-3 {
            return Ok(0.5 * (&p + p.transpose()));
        }
    }
    Err(SsfError::Configuration(
        "transition is not stable: no stationary covariance exists".into(),
    ))
}
