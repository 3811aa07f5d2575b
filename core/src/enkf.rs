//! Stochastic (perturbed-observation) Ensemble Kalman Filter
//!
//! This module contains the sequential estimation engine. The filter owns an
//! ensemble of state samples, a process model that propagates it, an observation
//! model that maps it to observation space, and a seeded random generator that
//! supplies every stochastic draw. The two model seams are the [`TransitionModel`]
//! and [`ForwardModel`] traits, so the filter is generic over the state dimension
//! and over what is being observed; the land-surface instantiation lives in
//! [`crate::process`] and [`crate::observation`].
//!
//! The implementation follows the stochastic EnKF of Evensen (2003): sample
//! covariances with the unbiased N−1 denominator, a Kalman gain obtained from a
//! regularized SPD solve of the innovation covariance, and per-member observation
//! perturbations to keep the posterior spread consistent.
//!
//! Every filter instance owns its own `StdRng`, seeded at construction. Parameter
//! sweeps that run many filters side by side must give each instance its own seed;
//! nothing in this module touches a global random stream.

use crate::linalg::{robust_spd_solve, sampling_square_root, symmetrize};
use crate::observation::ObservationModel;
use crate::process::ProcessModel;
use crate::{FilterError, StateBounds};

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use std::fmt::{self, Debug};

/// State-transition seam consumed by the forecast step.
///
/// `run` must be shape preserving: an `N x D` ensemble of state rows in, the same
/// shape out, each member propagated independently.
pub trait TransitionModel {
    /// Per-step forcing consumed opaquely by the model.
    type Forcing;

    fn run(&self, ensemble: &DMatrix<f64>, forcing: &Self::Forcing) -> DMatrix<f64>;
}

/// Observation-operator seam consumed by the analysis step.
///
/// `run` maps an `N x D` ensemble to an `N x M` matrix of predicted observations,
/// with `M = dimension()`.
pub trait ForwardModel {
    /// Per-observation parameters consumed opaquely by the model.
    type Params;

    fn dimension(&self) -> usize;
    fn run(&self, ensemble: &DMatrix<f64>, params: &Self::Params) -> DMatrix<f64>;
}

/// A noise covariance accepted either as a full matrix or as a diagonal of
/// variances promoted to a diagonal matrix.
#[derive(Clone, Debug)]
pub enum NoiseCovariance {
    /// Per-dimension variances; promoted to `diag(variances)`.
    Diagonal(DVector<f64>),
    /// Full covariance matrix.
    Full(DMatrix<f64>),
}

impl NoiseCovariance {
    /// Diagonal covariance from a list of per-dimension variances.
    pub fn diagonal(variances: Vec<f64>) -> NoiseCovariance {
        NoiseCovariance::Diagonal(DVector::from_vec(variances))
    }
    /// One-dimensional covariance for a scalar observation.
    pub fn scalar(variance: f64) -> NoiseCovariance {
        NoiseCovariance::Diagonal(DVector::from_element(1, variance))
    }
    /// Full covariance matrix.
    pub fn full(matrix: DMatrix<f64>) -> NoiseCovariance {
        NoiseCovariance::Full(matrix)
    }
    /// Promote to a full matrix, checking squareness and the expected dimension.
    fn to_matrix(&self, expected_dim: usize) -> Result<DMatrix<f64>, FilterError> {
        let matrix = match self {
            NoiseCovariance::Diagonal(variances) => DMatrix::from_diagonal(variances),
            NoiseCovariance::Full(matrix) => {
                if !matrix.is_square() {
                    return Err(FilterError::NonSquareCovariance {
                        rows: matrix.nrows(),
                        cols: matrix.ncols(),
                    });
                }
                matrix.clone()
            }
        };
        if matrix.nrows() != expected_dim {
            return Err(FilterError::DimensionMismatch {
                expected: expected_dim,
                actual: matrix.nrows(),
            });
        }
        Ok(matrix)
    }
}

/// Stochastic Ensemble Kalman Filter over an `N x D` ensemble of state rows.
///
/// Lifecycle: constructed UNINITIALIZED; [`initialize`](Self::initialize) samples
/// the ensemble from the prior and is the only transition to READY;
/// [`forecast`](Self::forecast) and [`analysis`](Self::analysis) then mutate the
/// ensemble in place any number of times. There is no terminal state and no
/// teardown; the ensemble lives exactly as long as the filter.
pub struct EnsembleKalmanFilter<P, O>
where
    P: TransitionModel,
    O: ForwardModel,
{
    process_model: P,
    observation_model: O,
    ensemble_size: usize,
    bounds: StateBounds,
    rng: StdRng,
    ensemble: Option<DMatrix<f64>>,
    state_estimate: Option<DVector<f64>>,
}

impl<P, O> Debug for EnsembleKalmanFilter<P, O>
where
    P: TransitionModel,
    O: ForwardModel,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsembleKalmanFilter")
            .field("ensemble_size", &self.ensemble_size)
            .field("initialized", &self.ensemble.is_some())
            .field("state_estimate", &self.state_estimate)
            .finish()
    }
}

impl<P, O> EnsembleKalmanFilter<P, O>
where
    P: TransitionModel,
    O: ForwardModel,
{
    /// Create an uninitialized filter.
    ///
    /// # Arguments
    /// * `process_model` - Transition model consumed by `forecast`.
    /// * `observation_model` - Forward operator consumed by `analysis`.
    /// * `ensemble_size` - Number of members N; fixed for the filter lifetime.
    /// * `bounds` - Explicit physical bounds; only declared dimensions are clipped.
    /// * `seed` - Seed for the filter-owned random generator. Runs with the same
    ///   seed reproduce exactly; concurrent filters must use distinct seeds.
    pub fn new(
        process_model: P,
        observation_model: O,
        ensemble_size: usize,
        bounds: StateBounds,
        seed: u64,
    ) -> Self {
        assert!(
            ensemble_size >= 2,
            "ensemble covariance needs at least two members"
        );
        EnsembleKalmanFilter {
            process_model,
            observation_model,
            ensemble_size,
            bounds,
            rng: StdRng::seed_from_u64(seed),
            ensemble: None,
            state_estimate: None,
        }
    }
    /// Number of ensemble members.
    pub fn ensemble_size(&self) -> usize {
        self.ensemble_size
    }
    /// Current state estimate (ensemble mean), `None` before initialization.
    pub fn state_estimate(&self) -> Option<&DVector<f64>> {
        self.state_estimate.as_ref()
    }
    /// Read access to the ensemble (members as rows), `None` before initialization.
    pub fn ensemble(&self) -> Option<&DMatrix<f64>> {
        self.ensemble.as_ref()
    }
    /// Per-dimension ensemble standard deviation (N−1 denominator).
    pub fn ensemble_spread(&self) -> Option<DVector<f64>> {
        let ensemble = self.ensemble.as_ref()?;
        let mean = ensemble_mean(ensemble);
        let n = ensemble.nrows();
        let mut variance = DVector::zeros(ensemble.ncols());
        for i in 0..n {
            for j in 0..ensemble.ncols() {
                let diff = ensemble[(i, j)] - mean[j];
                variance[j] += diff * diff;
            }
        }
        Some(variance.map(|v: f64| (v / (n as f64 - 1.0)).sqrt()))
    }
    /// Sample the initial ensemble from a multivariate normal prior.
    ///
    /// The covariance may be a diagonal of variances or a full matrix. Each member
    /// is drawn as `mean + S z` with `S` the sampling square root of the covariance
    /// and `z` a vector of independent standard normals; declared physical bounds
    /// are applied immediately after sampling, and the state estimate is set to the
    /// ensemble mean.
    pub fn initialize(
        &mut self,
        mean: &DVector<f64>,
        covariance: &NoiseCovariance,
    ) -> Result<(), FilterError> {
        let dim = mean.len();
        let cov = covariance.to_matrix(dim)?;
        let factor = sampling_square_root(&cov);

        let mut ensemble = DMatrix::zeros(self.ensemble_size, dim);
        for i in 0..self.ensemble_size {
            let draw = standard_normal_vector(&mut self.rng, dim);
            let member = mean + &factor * draw;
            for j in 0..dim {
                ensemble[(i, j)] = member[j];
            }
        }
        self.bounds.clip_ensemble(&mut ensemble);
        self.state_estimate = Some(ensemble_mean(&ensemble));
        self.ensemble = Some(ensemble);
        Ok(())
    }
    /// Propagate the ensemble one step and inject process noise.
    ///
    /// The whole ensemble goes through the transition model in one batched call;
    /// each member then receives an independent `N(0, Q)` draw. Bounds are
    /// re-applied and the state estimate updated. Mutates in place; on error the
    /// ensemble is left untouched.
    pub fn forecast(
        &mut self,
        forcing: &P::Forcing,
        process_noise: &NoiseCovariance,
    ) -> Result<(), FilterError> {
        let ensemble = self.ensemble.as_ref().ok_or(FilterError::NotInitialized)?;
        let dim = ensemble.ncols();
        let q = process_noise.to_matrix(dim)?;

        let mut propagated = self.process_model.run(ensemble, forcing);
        if propagated.shape() != ensemble.shape() {
            return Err(FilterError::DimensionMismatch {
                expected: dim,
                actual: propagated.ncols(),
            });
        }

        let factor = sampling_square_root(&q);
        for i in 0..self.ensemble_size {
            let noise = &factor * standard_normal_vector(&mut self.rng, dim);
            for j in 0..dim {
                propagated[(i, j)] += noise[j];
            }
        }
        self.bounds.clip_ensemble(&mut propagated);
        self.state_estimate = Some(ensemble_mean(&propagated));
        self.ensemble = Some(propagated);
        Ok(())
    }
    /// Update the ensemble with an observation (perturbed-observation analysis).
    ///
    /// Predicted observations come from the forward operator in one batched call.
    /// Cross- and innovation-covariances are estimated from the ensemble anomalies
    /// with the unbiased N−1 denominator, the Kalman gain is obtained from the
    /// regularized solve `Czz Kᵀ = Cxzᵀ`, and every member is updated with an
    /// independently perturbed copy of the observation. Updating all members with
    /// the single shared observation would collapse the ensemble variance, which is
    /// why the perturbations are not optional.
    ///
    /// All quantities are computed before the ensemble is touched: a degenerate
    /// innovation covariance fails the call and leaves the filter state unchanged.
    pub fn analysis(
        &mut self,
        observation: &DVector<f64>,
        observation_noise: &NoiseCovariance,
        params: &O::Params,
    ) -> Result<(), FilterError> {
        let ensemble = self.ensemble.as_ref().ok_or(FilterError::NotInitialized)?;
        let n = self.ensemble_size;
        let dim = ensemble.ncols();
        let obs_dim = self.observation_model.dimension();
        if observation.len() != obs_dim {
            return Err(FilterError::DimensionMismatch {
                expected: obs_dim,
                actual: observation.len(),
            });
        }
        let r = observation_noise.to_matrix(obs_dim)?;

        let predicted = self.observation_model.run(ensemble, params);
        if predicted.nrows() != n || predicted.ncols() != obs_dim {
            return Err(FilterError::DimensionMismatch {
                expected: obs_dim,
                actual: predicted.ncols(),
            });
        }

        let state_anomalies = anomalies(ensemble);
        let obs_anomalies = anomalies(&predicted);
        let denominator = n as f64 - 1.0;
        let cross_covariance = state_anomalies.transpose() * &obs_anomalies / denominator;
        let innovation_covariance =
            symmetrize(&(obs_anomalies.transpose() * &obs_anomalies / denominator + &r));

        // K = Cxz Czz^{-1}, obtained as the solution of Czz Kᵀ = Cxzᵀ.
        let gain_t = robust_spd_solve(&innovation_covariance, &cross_covariance.transpose())?;
        let gain = gain_t.transpose();

        let r_factor = sampling_square_root(&r);
        let mut updated = ensemble.clone();
        for i in 0..n {
            let perturbation = &r_factor * standard_normal_vector(&mut self.rng, obs_dim);
            let perturbed_observation = observation + perturbation;
            let innovation = perturbed_observation - predicted.row(i).transpose();
            let increment = &gain * innovation;
            for j in 0..dim {
                updated[(i, j)] += increment[j];
            }
        }
        self.bounds.clip_ensemble(&mut updated);
        self.state_estimate = Some(ensemble_mean(&updated));
        self.ensemble = Some(updated);
        Ok(())
    }
}

impl EnsembleKalmanFilter<ProcessModel, ObservationModel> {
    /// Convenience constructor for the land-surface instantiation: queries the
    /// process model for its declared `[SM, VWC]` bounds.
    pub fn for_land_surface(
        process_model: ProcessModel,
        observation_model: ObservationModel,
        ensemble_size: usize,
        seed: u64,
    ) -> Self {
        let bounds = process_model.bounds();
        Self::new(process_model, observation_model, ensemble_size, bounds, seed)
    }
}

/// Column means of an ensemble (members as rows).
fn ensemble_mean(ensemble: &DMatrix<f64>) -> DVector<f64> {
    let n = ensemble.nrows();
    let mut mean = DVector::zeros(ensemble.ncols());
    for i in 0..n {
        for j in 0..ensemble.ncols() {
            mean[j] += ensemble[(i, j)];
        }
    }
    mean / n as f64
}

/// Member-minus-mean anomaly matrix, same shape as the ensemble.
fn anomalies(ensemble: &DMatrix<f64>) -> DMatrix<f64> {
    let mean = ensemble_mean(ensemble);
    let mut result = ensemble.clone();
    for i in 0..ensemble.nrows() {
        for j in 0..ensemble.ncols() {
            result[(i, j)] -= mean[j];
        }
    }
    result
}

/// A vector of independent standard-normal draws from the filter-owned generator.
fn standard_normal_vector(rng: &mut StdRng, dim: usize) -> DVector<f64> {
    DVector::from_fn(dim, |_, _| StandardNormal.sample(&mut *rng))
}
