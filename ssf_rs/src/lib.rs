//! Diffuse Kalman filtering and smoothing for linear Gaussian state-space models.
//!
//! Models implement [`StateSpaceModel`]; ARIMA-derived, structural and
//! autoregressive blocks can be combined with [`CompositeBuilder`]. Runs
//! are driven by [`kalman_filter`] / [`kalman_loglike`] and their
//! square-root, fast and regression-augmented variants, and by the
//! smoothers in [`smoother`].

pub mod error;
pub mod types;
pub mod params;
pub mod polynomial;
pub mod model;
pub mod initialization;
pub mod state_space;
pub mod structural;
pub mod autoregressive;
pub mod composite;
pub mod likelihood;
pub mod kalman;
pub mod augmented;
pub mod square_root;
pub mod chandrasekhar;
pub mod smoother;
pub mod forecast;
pub mod batch;
#[cfg(feature = "python")]
mod python;

pub use augmented::{augmented_filter, RegressionEstimate, RegressionVariable};
pub use autoregressive::{ArSsf, SurveyErrorSsf};
pub use chandrasekhar::chandrasekhar_filter;
pub use composite::{CompositeBuilder, CompositeSsf};
pub use error::{Result, SsfError};
pub use initialization::Initialization;
pub use kalman::{kalman_filter, kalman_loglike, FilterOptions, FilteringResults, KalmanFilterOutput, StepKind};
pub use likelihood::LikelihoodResult;
pub use model::StateSpaceModel;
pub use params::ArimaParams;
pub use smoother::{fast_smooth, smooth, smooth_filtered, SmoothingResults};
pub use square_root::square_root_filter;
pub use state_space::ArimaSsf;
pub use structural::{Cycle, LocalLevel, LocalLinearTrend, Noise, Seasonal};
pub use types::{ArimaOrder, MISSING};
