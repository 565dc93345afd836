//! Block-diagonal composition of independent state spaces.
//!
//! Components own contiguous blocks `[pos, pos + dim)` of the global state,
//! assigned in insertion order. Dynamics are block diagonal, loadings are
//! concatenated and measurement noise variances add up.

use nalgebra::{DMatrixViewMut, DVector, DVectorView, DVectorViewMut};

use crate::error::{Result, SsfError};
use crate::model::StateSpaceModel;

struct Block {
    name: String,
    pos: usize,
    dim: usize,
    innovation_pos: usize,
    innovation_dim: usize,
    model: Box<dyn StateSpaceModel>,
}

#[derive(Default)]
pub struct CompositeBuilder {
    components: Vec<(String, Box<dyn StateSpaceModel>)>,
    noise: f64,
}

impl CompositeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a named component.
    pub fn add<M: StateSpaceModel + 'static>(self, name: impl Into<String>, model: M) -> Self {
        self.add_boxed(name, Box::new(model))
    }

    pub fn add_boxed(mut self, name: impl Into<String>, model: Box<dyn StateSpaceModel>) -> Self {
        self.components.push((name.into(), model));
        self
    }

    /// Measurement noise variance added on top of the components' own.
    pub fn measurement_noise(mut self, var: f64) -> Self {
        self.noise = var;
        self
    }

    pub fn build(self) -> Result<CompositeSsf> {
        if self.components.is_empty() {
            return Err(SsfError::Configuration("composite model has no components".into()));
        }
        if !self.noise.is_finite() || self.noise < 0.0 {
            return Err(SsfError::Configuration(format!(
                "measurement noise variance must be non-negative, got {}",
                self.noise
            )));
        }

        let mut blocks: Vec<Block> = Vec::with_capacity(self.components.len());
        let mut pos = 0;
        let mut innovation_pos = 0;
        for (name, model) in self.components {
            if blocks.iter().any(|b| b.name == name) {
                return Err(SsfError::Configuration(format!(
                    "duplicate component name '{}'",
                    name
                )));
            }
            let dim = model.dim();
            if dim == 0 {
                return Err(SsfError::Configuration(format!(
                    "component '{}' has an empty state",
                    name
                )));
            }
            let innovation_dim = model.innovation_dim();
            blocks.push(Block {
                name,
                pos,
                dim,
                innovation_pos,
                innovation_dim,
                model,
            });
            pos += dim;
            innovation_pos += innovation_dim;
        }

        let time_invariant = blocks.iter().all(|b| b.model.is_time_invariant());
        let diffuse_dim = blocks.iter().map(|b| b.model.diffuse_dim()).sum();
        Ok(CompositeSsf {
            blocks,
            dim: pos,
            innovation_dim: innovation_pos,
            diffuse_dim,
            noise: self.noise,
            time_invariant,
        })
    }
}

pub struct CompositeSsf {
    blocks: Vec<Block>,
    dim: usize,
    innovation_dim: usize,
    diffuse_dim: usize,
    noise: f64,
    time_invariant: bool,
}

impl CompositeSsf {
    pub fn builder() -> CompositeBuilder {
        CompositeBuilder::new()
    }

    /// `(pos, dim)` of the named component.
    pub fn component(&self, name: &str) -> Option<(usize, usize)> {
        self.blocks
            .iter()
            .find(|b| b.name == name)
            .map(|b| (b.pos, b.dim))
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.name.as_str())
    }

    pub fn component_count(&self) -> usize {
        self.blocks.len()
    }

    /// Contribution `Z_i x_i` of the named component to the signal.
    pub fn component_signal(&self, name: &str, pos: usize, state: &DVector<f64>) -> Option<f64> {
        let b = self.blocks.iter().find(|b| b.name == name)?;
        Some(b.model.zx(pos, &state.rows(b.pos, b.dim)))
    }

    /// Signal contribution of every component, in insertion order.
    pub fn decompose(&self, pos: usize, state: &DVector<f64>) -> Vec<(String, f64)> {
        self.blocks
            .iter()
            .map(|b| (b.name.clone(), b.model.zx(pos, &state.rows(b.pos, b.dim))))
            .collect()
    }
}

impl StateSpaceModel for CompositeSsf {
    fn dim(&self) -> usize {
        self.dim
    }

    fn is_time_invariant(&self) -> bool {
        self.time_invariant
    }

    fn diffuse_dim(&self) -> usize {
        self.diffuse_dim
    }

    fn a0(&self, a: &mut DVectorViewMut<'_, f64>) {
        for b in &self.blocks {
            b.model.a0(&mut a.rows_mut(b.pos, b.dim));
        }
    }

    fn p0(&self, p: &mut DMatrixViewMut<'_, f64>) {
        for b in &self.blocks {
            b.model.p0(&mut p.view_mut((b.pos, b.pos), (b.dim, b.dim)));
        }
    }

    fn pinf0(&self, pinf: &mut DMatrixViewMut<'_, f64>) {
        for b in &self.blocks {
            b.model.pinf0(&mut pinf.view_mut((b.pos, b.pos), (b.dim, b.dim)));
        }
    }

    fn t(&self, pos: usize, tm: &mut DMatrixViewMut<'_, f64>) {
        for b in &self.blocks {
            b.model.t(pos, &mut tm.view_mut((b.pos, b.pos), (b.dim, b.dim)));
        }
    }

    fn tx(&self, pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        for b in &self.blocks {
            b.model.tx(pos, &mut x.rows_mut(b.pos, b.dim));
        }
    }

    fn xt(&self, pos: usize, x: &mut DVectorViewMut<'_, f64>) {
        for b in &self.blocks {
            b.model.xt(pos, &mut x.rows_mut(b.pos, b.dim));
        }
    }

    fn innovation_dim(&self) -> usize {
        self.innovation_dim
    }

    fn s(&self, pos: usize, s: &mut DMatrixViewMut<'_, f64>) {
        for b in self.blocks.iter().filter(|b| b.innovation_dim > 0) {
            b.model.s(
                pos,
                &mut s.view_mut((b.pos, b.innovation_pos), (b.dim, b.innovation_dim)),
            );
        }
    }

    fn add_v(&self, pos: usize, p: &mut DMatrixViewMut<'_, f64>) {
        for b in &self.blocks {
            b.model.add_v(pos, &mut p.view_mut((b.pos, b.pos), (b.dim, b.dim)));
        }
    }

    fn z(&self, pos: usize, z: &mut DVectorViewMut<'_, f64>) {
        for b in &self.blocks {
            b.model.z(pos, &mut z.rows_mut(b.pos, b.dim));
        }
    }

    fn zx(&self, pos: usize, x: &DVectorView<'_, f64>) -> f64 {
        self.blocks
            .iter()
            .map(|b| b.model.zx(pos, &x.rows(b.pos, b.dim)))
            .sum()
    }

    fn h(&self, pos: usize) -> f64 {
        self.noise + self.blocks.iter().map(|b| b.model.h(pos)).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoregressive::SurveyErrorSsf;
    use crate::kalman::{kalman_loglike, FilterOptions};
    use crate::model::assert_consistent_ops;
    use crate::structural::{Cycle, LocalLevel, LocalLinearTrend, Noise, Seasonal};

    #[test]
    fn test_block_layout() {
        let model = CompositeBuilder::new()
            .add("trend", LocalLinearTrend::new(0.1, 0.01, 0.0).unwrap())
            .add("seasonal", Seasonal::new(4, 0.05).unwrap())
            .add("irregular", Noise::new(1.0).unwrap())
            .build()
            .unwrap();
        assert_eq!(model.dim(), 6);
        assert_eq!(model.innovation_dim(), 4);
        assert_eq!(model.diffuse_dim(), 5);
        assert_eq!(model.component("trend"), Some((0, 2)));
        assert_eq!(model.component("seasonal"), Some((2, 3)));
        assert_eq!(model.component("irregular"), Some((5, 1)));
        assert_eq!(model.component("cycle"), None);
        assert_eq!(model.component_count(), 3);
        assert_eq!(
            model.component_names().collect::<Vec<_>>(),
            vec!["trend", "seasonal", "irregular"]
        );
        assert_consistent_ops(&model, 0);

        let init = model.initial();
        assert!(init.validate().is_ok());
        assert!((init.p0[(5, 5)] - 1.0).abs() < 1e-15);
        assert!((init.pinf0[(4, 4)] - 1.0).abs() < 1e-15);

        let z = model.loading(0);
        assert_eq!(z.as_slice(), &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_measurement_noise_adds_up() {
        let model = CompositeBuilder::new()
            .add("level", LocalLevel::new(0.5, 0.25).unwrap())
            .add("cycle", Cycle::new(0.9, 0.4, 1.0).unwrap())
            .measurement_noise(1.5)
            .build()
            .unwrap();
        assert!((model.h(0) - 1.75).abs() < 1e-15);
    }

    #[test]
    fn test_time_varying_component() {
        let model = CompositeBuilder::new()
            .add("level", LocalLevel::new(0.5, 0.0).unwrap())
            .add("survey", SurveyErrorSsf::new(&[0.4], 1.0, vec![1.0, 2.0]).unwrap())
            .build()
            .unwrap();
        assert!(!model.is_time_invariant());
        assert_consistent_ops(&model, 1);
    }

    #[test]
    fn test_build_errors() {
        assert!(matches!(CompositeBuilder::new().build(), Err(e) if e.is_configuration()));
        let dup = CompositeBuilder::new()
            .add("level", LocalLevel::new(1.0, 0.0).unwrap())
            .add("level", Noise::new(1.0).unwrap())
            .build();
        assert!(dup.is_err());
        let bad_noise = CompositeBuilder::new()
            .add("level", LocalLevel::new(1.0, 0.0).unwrap())
            .measurement_noise(-1.0)
            .build();
        assert!(bad_noise.is_err());
    }

    #[test]
    fn test_decompose_sums_to_signal() {
        let model = CompositeSsf::builder()
            .add("level", LocalLevel::new(1.0, 0.0).unwrap())
            .add("seasonal", Seasonal::new(4, 0.1).unwrap())
            .build()
            .unwrap();
        let x = DVector::from_vec(vec![2.0, 0.5, -0.3, 0.1]);
        let parts = model.decompose(0, &x);
        let total: f64 = parts.iter().map(|(_, v)| v).sum();
        assert!((total - model.zx(0, &x.rows(0, 4))).abs() < 1e-15);
        assert!((model.component_signal("seasonal", 0, &x).unwrap() - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_diffuse_length_level_plus_seasonal() {
        let model = CompositeBuilder::new()
            .add("level", LocalLevel::new(0.2, 0.0).unwrap())
            .add("seasonal", Seasonal::new(4, 0.1).unwrap())
            .measurement_noise(0.5)
            .build()
            .unwrap();
        let y = [1.3, 0.2, -0.8, 2.1, 1.7, 0.1, -1.2, 2.4, 1.5, 0.4];
        let res = kalman_loglike(&model, &y, &FilterOptions::default()).unwrap();
        assert_eq!(res.diffuse_dimension_eliminated, 4);
        assert_eq!(res.end_diffuse_position, 4);
        assert_eq!(res.n_obs, y.len() - 4);
    }
}
