//! Relative pose optimization for frame-to-frame tracking.
//!
//! - Residual construction for point and line reprojection errors
//! - Gauss-Newton and Levenberg-Marquardt pose solvers
//! - MAD-based outlier rejection between solver passes

pub mod outliers;
pub mod residuals;
pub mod solver;

pub use outliers::{mad_scale, OutlierFilter, OutlierStats};
pub use residuals::{NormalEquations, ResidualModel};
pub use solver::{covariance_eigenvalues, invert_hessian, MotionEstimator, MotionPrior, SolverResult};
