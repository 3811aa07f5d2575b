//! Land-surface data assimilation toolbox for GNSS-reflectometry observations
//!
//! This crate provides the estimation engine of a GNSS-R soil moisture assimilation
//! system: a coupled water-balance/vegetation process model, a physics-based forward
//! operator mapping land-surface state to bistatic reflectivity, and a stochastic
//! Ensemble Kalman Filter (EnKF) that fuses the two. The crate is designed around the
//! filter: everything upstream of it (satellite data acquisition, NetCDF parsing,
//! run planning) is assumed to have been reduced to simple daily records before it
//! reaches this code, and everything downstream consumes plain CSV series. The crate
//! does not read or write any remote dataset and should not be thought of as a
//! retrieval pipeline.
//!
//! Primarily built off of two crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the linear algebra tools for the filter.
//! - [`rand`](https://crates.io/crates/rand) / [`rand_distr`](https://crates.io/crates/rand_distr):
//!   Provide the seeded random draws for ensemble generation and noise injection.
//!
//! The primary reference for the filter formulation is Evensen, _The Ensemble Kalman
//! Filter: theoretical formulation and practical implementation_ (2003). Variables are
//! generally named for the quantity they represent rather than the symbol used in the
//! literature; this rule is sometimes relaxed inside a given function where the local
//! math is clearer with short names.
//!
//! # State definition
//!
//! The land-surface state vector is two dimensional:
//!
//! $$
//! x = [\theta, W]
//! $$
//!
//! Where:
//! - $\theta$ is volumetric soil moisture (SM, m³/m³), bounded to $[0, \theta_{sat}]$.
//! - $W$ is vegetation water content (VWC, kg/m²), bounded to $[0, W_{max}]$.
//!
//! Both bounds are configuration constants of the process model and are re-applied to
//! every ensemble member after every mutation of the ensemble.
//!
//! # Filter equations
//!
//! The stochastic (perturbed-observation) EnKF represents the state distribution with
//! an ensemble of $N$ samples. The forecast step propagates each member through the
//! nonlinear process model $f$ and adds an independent process-noise draw:
//!
//! $$
//! x_i^f = f(x_i^a, u_k) + w_i, \qquad w_i \sim \mathcal{N}(0, Q)
//! $$
//!
//! The analysis step maps each member to observation space through the nonlinear
//! forward operator $h$, estimates the cross- and innovation-covariances from the
//! ensemble anomalies $A_x$, $A_z$ with the unbiased $N-1$ denominator,
//!
//! $$
//! C_{xz} = \frac{A_x^T A_z}{N-1}, \qquad
//! C_{zz} = \frac{A_z^T A_z}{N-1} + R, \qquad
//! K = C_{xz} C_{zz}^{-1}
//! $$
//!
//! and updates each member with an independently perturbed copy of the observation:
//!
//! $$
//! x_i^a = x_i^f + K \left( z + v_i - h(x_i^f) \right), \qquad v_i \sim \mathcal{N}(0, R)
//! $$
//!
//! Perturbing the observation per member is what keeps the posterior ensemble spread
//! statistically consistent; updating all members with a single shared observation
//! collapses the ensemble variance.

pub mod enkf;
pub mod linalg;
pub mod observation;
pub mod process;
pub mod sim;

use nalgebra::{DMatrix, DVector, Vector2};
use std::fmt::{self, Display};
use thiserror::Error;

/// Errors raised by the filter boundary API.
///
/// The core has no transient failure modes: every variant is a hard, synchronous
/// failure of the call that raised it, and the ensemble is left exactly as it was
/// before the call.
#[derive(Debug, Error)]
pub enum FilterError {
    /// `forecast` or `analysis` was invoked before `initialize`.
    #[error("filter has not been initialized; call initialize() first")]
    NotInitialized,
    /// A vector or matrix at a call boundary does not match the filter dimensions.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// A covariance supplied as a full matrix is not square.
    #[error("covariance matrix must be square, got {rows}x{cols}")]
    NonSquareCovariance { rows: usize, cols: usize },
    /// The innovation covariance stayed singular through the regularization ramp.
    #[error("innovation covariance is singular and could not be regularized")]
    DegenerateInnovation,
}

/// Basic structure for holding the two-dimensional land-surface state.
///
/// The state pairs volumetric soil moisture with vegetation water content. Canonical
/// vector order is `[soil_moisture, vegetation_water]`; the ensemble in the filter
/// stores one such vector per row.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LandState {
    /// Volumetric soil moisture in m³/m³
    pub soil_moisture: f64,
    /// Vegetation water content in kg/m²
    pub vegetation_water: f64,
}

impl Display for LandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LandState {{ sm: {:.4} m3/m3, vwc: {:.3} kg/m2 }}",
            self.soil_moisture, self.vegetation_water
        )
    }
}

impl LandState {
    /// Create a new state from explicit soil moisture and vegetation water content.
    pub fn new(soil_moisture: f64, vegetation_water: f64) -> LandState {
        LandState {
            soil_moisture,
            vegetation_water,
        }
    }
    /// Create a state from a canonical state vector (order: SM, VWC).
    pub fn new_from_vector(state: Vector2<f64>) -> LandState {
        LandState {
            soil_moisture: state[0],
            vegetation_water: state[1],
        }
    }
    /// Convert the state to a canonical vector, nalgebra style.
    pub fn to_vector(&self) -> Vector2<f64> {
        Vector2::new(self.soil_moisture, self.vegetation_water)
    }
    /// Convert the state to a canonical vector, native `Vec<f64>` style.
    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.soil_moisture, self.vegetation_water]
    }
}

/// Explicit physical bounds for each state dimension.
///
/// The filter clips every ensemble member back into the declared intervals after
/// every mutation (initial sampling, forecast noise, analysis increment). Dimensions
/// with `None` are never touched, so the same filter works for states that are only
/// partially bounded. The process model declares its own bounds via
/// [`process::ProcessModel::bounds`]; supplying the structure at filter construction
/// keeps the filter decoupled from any concrete model type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateBounds {
    intervals: Vec<Option<(f64, f64)>>,
}

impl StateBounds {
    /// Create bounds from per-dimension optional `(lower, upper)` intervals.
    pub fn new(intervals: Vec<Option<(f64, f64)>>) -> StateBounds {
        StateBounds { intervals }
    }
    /// Create a bounds structure that declares no bound for any of `dim` dimensions.
    pub fn unbounded(dim: usize) -> StateBounds {
        StateBounds {
            intervals: vec![None; dim],
        }
    }
    /// Number of state dimensions covered by this structure.
    pub fn dim(&self) -> usize {
        self.intervals.len()
    }
    /// The declared interval for one dimension, if any.
    pub fn interval(&self, dim: usize) -> Option<(f64, f64)> {
        self.intervals.get(dim).copied().flatten()
    }
    /// Clip a single state vector in place on every declared dimension.
    pub fn clip_vector(&self, state: &mut DVector<f64>) {
        for (j, interval) in self.intervals.iter().enumerate() {
            if let Some((lower, upper)) = interval {
                if j < state.len() {
                    state[j] = clip(state[j], *lower, *upper);
                }
            }
        }
    }
    /// Clip an ensemble (members as rows) in place on every declared dimension.
    pub fn clip_ensemble(&self, ensemble: &mut DMatrix<f64>) {
        for (j, interval) in self.intervals.iter().enumerate() {
            if let Some((lower, upper)) = interval {
                if j < ensemble.ncols() {
                    for i in 0..ensemble.nrows() {
                        ensemble[(i, j)] = clip(ensemble[(i, j)], *lower, *upper);
                    }
                }
            }
        }
    }
}

/// Clip a value to the interval `[lower, upper]`, applying the lower bound first.
///
/// This mirrors NumPy's `clip` rather than `f64::clamp`: when the bounds are
/// inverted (`upper < lower`) the result is `upper` instead of a panic. The process
/// model relies on this for runoff and evapotranspiration under negative
/// precipitation or PET, which propagate unchanged by design.
///
/// # Example
/// ```rust
/// use gnssr_enkf::clip;
/// assert_eq!(clip(0.7, 0.0, 1.0), 0.7);
/// assert_eq!(clip(-0.2, 0.0, 1.0), 0.0);
/// assert_eq!(clip(0.5, 0.0, -1.0), -1.0); // inverted bounds resolve to the upper bound
/// ```
pub fn clip(value: f64, lower: f64, upper: f64) -> f64 {
    value.max(lower).min(upper)
}
