//! GNSS-R forward operator: land-surface state to bistatic reflectivity
//!
//! This module maps the `[SM, VWC]` state to the reflectivity observable of a
//! GNSS-reflectometry receiver (reflected-to-direct power ratio at the specular
//! point). The chain is the classical physics cascade:
//!
//! 1. A refractive dielectric mixing model (after Mironov et al., 2009) converts
//!    soil moisture and soil texture into a bulk complex permittivity. Free liquid
//!    water follows a single-pole Debye relaxation; bound water and the dry solid
//!    phase use fixed complex constants.
//! 2. Fresnel interface formulas give the co-polarized reflection coefficients at
//!    the incidence angle; the circular cross-polarized reflectivity used by GNSS-R
//!    is $\gamma = \frac{1}{2}\left|R_{vv} - R_{hh}\right|^2$.
//! 3. Surface roughness attenuates coherent reflection by
//!    $\exp\left[-(2 k \sigma)^2 \cos^2\theta\right]$ with $k$ the carrier wavenumber
//!    and $\sigma$ the surface rms height.
//! 4. The vegetation canopy attenuates two-way by $\exp(-2 b W / \cos\theta)$ where
//!    $b W$ is the vegetation optical depth.
//!
//! The operator is pure and shape preserving: a batch of states produces a batch of
//! predicted reflectivities, one per ensemble member. Outputs are clamped to
//! `[0, 1]`.

use crate::enkf::ForwardModel;
use crate::{LandState, clip};

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Speed of light in vacuum, m/s
const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Complex permittivity of free liquid water from a single-pole Debye model.
///
/// The static permittivity and relaxation time are cubic polynomials of the water
/// temperature in °C; the high-frequency limit is fixed at 4.9.
pub fn debye_permittivity(frequency_hz: f64, temperature_k: f64) -> Complex64 {
    let t_c = temperature_k - 273.15;
    let epsilon_static = 87.9 - 0.404 * t_c + 9.33e-4 * t_c * t_c;
    let epsilon_infinity = 4.9;
    let relaxation_time =
        1.1109e-10 - 3.824e-12 * t_c + 6.938e-14 * t_c.powi(2) - 5.096e-16 * t_c.powi(3);
    let omega = 2.0 * PI * frequency_hz;
    epsilon_infinity
        + (epsilon_static - epsilon_infinity) / Complex64::new(1.0, omega * relaxation_time)
}

/// Per-observation forward-model parameters.
///
/// These vary from overpass to overpass (geometry, surface condition) and are
/// supplied with each observation rather than fixed at model construction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ObservationParams {
    /// Incidence angle at the specular point, degrees
    pub incidence_angle_deg: f64,
    /// Surface rms height, meters
    pub surface_rms_height_m: f64,
    /// Vegetation attenuation coefficient b (VWC to optical depth), m²/kg
    pub vegetation_b: f64,
    /// Soil temperature, Kelvin
    pub soil_temperature_k: f64,
}

impl Default for ObservationParams {
    fn default() -> Self {
        ObservationParams {
            incidence_angle_deg: 40.0,
            surface_rms_height_m: 0.01,
            vegetation_b: 0.12,
            soil_temperature_k: 295.0,
        }
    }
}

/// Site-constant configuration of the forward operator.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// Sand mass fraction of the soil, 0-1
    pub sand_fraction: f64,
    /// Clay mass fraction of the soil, 0-1
    pub clay_fraction: f64,
    /// Soil bulk density, g/cm³
    pub bulk_density: f64,
    /// Soil particle density, g/cm³
    pub particle_density: f64,
    /// Carrier frequency, Hz (GPS L1 by default)
    pub frequency_hz: f64,
    /// Fraction of the clay-scaled porosity held as bound water
    pub bound_water_factor: f64,
}

impl ObservationConfig {
    /// Create a configuration for a site from its soil texture, using defaults for
    /// the remaining physical constants.
    pub fn new(sand_fraction: f64, clay_fraction: f64) -> ObservationConfig {
        ObservationConfig {
            sand_fraction,
            clay_fraction,
            ..Default::default()
        }
    }
}

impl Default for ObservationConfig {
    fn default() -> Self {
        ObservationConfig {
            sand_fraction: 0.45,
            clay_fraction: 0.25,
            bulk_density: 1.3,
            particle_density: 2.65,
            frequency_hz: 1.57542e9,
            bound_water_factor: 0.3,
        }
    }
}

/// Physics-based observation operator mapping `[SM, VWC]` to GNSS-R reflectivity.
#[derive(Clone, Debug)]
pub struct ObservationModel {
    config: ObservationConfig,
    /// Soil porosity derived from bulk and particle density, used to split bound
    /// from free water
    porosity: f64,
}

impl Default for ObservationModel {
    fn default() -> Self {
        Self::new(ObservationConfig::default())
    }
}

impl ObservationModel {
    /// Create an observation model from a site configuration.
    pub fn new(config: ObservationConfig) -> ObservationModel {
        let porosity = 1.0 - config.bulk_density / config.particle_density;
        ObservationModel { config, porosity }
    }
    /// Read access to the model configuration.
    pub fn config(&self) -> &ObservationConfig {
        &self.config
    }
    /// Derived soil porosity.
    pub fn porosity(&self) -> f64 {
        self.porosity
    }
    /// Bulk complex soil permittivity from the refractive mixing model.
    ///
    /// Soil moisture is clipped a hair away from zero and from the porosity for
    /// numerical stability of the fractional powers.
    pub fn dielectric_constant(&self, soil_moisture: f64, soil_temperature_k: f64) -> Complex64 {
        let c = &self.config;
        let sm = clip(soil_moisture, 1e-6, self.porosity - 1e-6);

        let epsilon_solid = Complex64::new(4.7, -0.62 * c.clay_fraction);
        let epsilon_bound = Complex64::new(7.0, -0.8);
        let epsilon_free = debye_permittivity(c.frequency_hz, soil_temperature_k);

        let theta_bound = (c.bound_water_factor * c.clay_fraction * self.porosity).min(sm);
        let theta_free = (sm - theta_bound).max(0.0);

        let g = 0.65;
        let phi = self.porosity.max(1e-6);
        let bound_ratio = clip(theta_bound / phi, 0.0, 1.0);
        let free_ratio = clip(theta_free / phi, 0.0, 1.0);

        let mix = 1.0
            + (1.0 - phi).powf(g) * (epsilon_solid.sqrt() - 1.0)
            + bound_ratio.powf(g) * (epsilon_bound.sqrt() - 1.0)
            + free_ratio.powf(g) * (epsilon_free.sqrt() - 1.0);
        mix * mix
    }
    /// Cross-polarized power reflectivity from the Fresnel interface formulas.
    fn fresnel_cross_pol(epsilon: Complex64, incidence_angle_rad: f64) -> f64 {
        let cos_theta = incidence_angle_rad.cos();
        let sin_theta_sq = incidence_angle_rad.sin().powi(2);
        let sqrt_term = (epsilon - sin_theta_sq).sqrt();

        let r_hh = (cos_theta - sqrt_term) / (cos_theta + sqrt_term);
        let r_vv = (epsilon * cos_theta - sqrt_term) / (epsilon * cos_theta + sqrt_term);
        0.5 * (r_vv - r_hh).norm_sqr()
    }
    /// Predict the reflectivity of a single state.
    ///
    /// # Example
    /// ```rust
    /// use gnssr_enkf::LandState;
    /// use gnssr_enkf::observation::{ObservationModel, ObservationParams};
    ///
    /// let model = ObservationModel::default();
    /// let reflectivity = model.predict(&LandState::new(0.25, 1.0), &ObservationParams::default());
    /// assert!(reflectivity > 0.0 && reflectivity < 1.0);
    /// ```
    pub fn predict(&self, state: &LandState, params: &ObservationParams) -> f64 {
        let epsilon = self.dielectric_constant(state.soil_moisture, params.soil_temperature_k);
        let theta = params.incidence_angle_deg.to_radians();
        let gamma_smooth = Self::fresnel_cross_pol(epsilon, theta);

        let wavelength = SPEED_OF_LIGHT / self.config.frequency_hz;
        let wavenumber = 2.0 * PI / wavelength;
        let h = (2.0 * wavenumber * params.surface_rms_height_m).powi(2) * theta.cos().powi(2);
        let roughness_factor = (-h).exp();

        let optical_depth = params.vegetation_b * state.vegetation_water;
        let vegetation_factor = (-2.0 * optical_depth / theta.cos()).exp();

        clip(gamma_smooth * roughness_factor * vegetation_factor, 0.0, 1.0)
    }
    /// Predict reflectivities for a whole ensemble in one batched call.
    ///
    /// Members are rows of the `N x 2` matrix; the output has one entry per member.
    pub fn run(&self, ensemble: &DMatrix<f64>, params: &ObservationParams) -> DVector<f64> {
        assert_eq!(
            ensemble.ncols(),
            2,
            "observation model expects [SM, VWC] state rows"
        );
        DVector::from_fn(ensemble.nrows(), |i, _| {
            let state = LandState::new(ensemble[(i, 0)], ensemble[(i, 1)]);
            self.predict(&state, params)
        })
    }
}

impl ForwardModel for ObservationModel {
    type Params = ObservationParams;

    fn dimension(&self) -> usize {
        1
    }
    fn run(&self, ensemble: &DMatrix<f64>, params: &ObservationParams) -> DMatrix<f64> {
        let predicted = ObservationModel::run(self, ensemble, params);
        DMatrix::from_column_slice(ensemble.nrows(), 1, predicted.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_debye_permittivity_at_room_temperature() {
        let epsilon = debye_permittivity(1.57542e9, 293.15);
        // L-band liquid water: large real part, lossy (negative imaginary part
        // with the e^{+jwt} sign convention used here)
        assert!(epsilon.re > 40.0 && epsilon.re < 85.0);
        assert!(epsilon.im < 0.0);
    }
    #[test]
    fn test_dielectric_increases_with_moisture() {
        let model = ObservationModel::default();
        let dry = model.dielectric_constant(0.05, 295.0);
        let wet = model.dielectric_constant(0.40, 295.0);
        assert!(wet.re > dry.re);
        assert!(dry.re > 1.0); // denser than vacuum even when dry
    }
    #[test]
    fn test_dielectric_stable_at_extremes() {
        let model = ObservationModel::default();
        for sm in [0.0, 1e-9, model.porosity(), 1.0] {
            let epsilon = model.dielectric_constant(sm, 295.0);
            assert!(epsilon.re.is_finite());
            assert!(epsilon.im.is_finite());
        }
    }
    #[test]
    fn test_reflectivity_bounded_on_state_envelope() {
        let model = ObservationModel::default();
        let params = ObservationParams::default();
        for sm in [0.0, 1e-4, 0.25, 0.449, 0.45] {
            for vwc in [0.0, 1.0, 2.5] {
                let reflectivity = model.predict(&LandState::new(sm, vwc), &params);
                assert!(
                    (0.0..=1.0).contains(&reflectivity),
                    "reflectivity {} out of range at sm={}, vwc={}",
                    reflectivity,
                    sm,
                    vwc
                );
            }
        }
    }
    #[test]
    fn test_reflectivity_increases_with_moisture() {
        let model = ObservationModel::default();
        let params = ObservationParams::default();
        let dry = model.predict(&LandState::new(0.08, 0.5), &params);
        let wet = model.predict(&LandState::new(0.40, 0.5), &params);
        assert!(wet > dry);
    }
    #[test]
    fn test_vegetation_attenuates() {
        let model = ObservationModel::default();
        let params = ObservationParams::default();
        let bare = model.predict(&LandState::new(0.25, 0.0), &params);
        let vegetated = model.predict(&LandState::new(0.25, 2.0), &params);
        assert!(vegetated < bare);
    }
    #[test]
    fn test_roughness_attenuates() {
        let model = ObservationModel::default();
        let smooth = ObservationParams {
            surface_rms_height_m: 0.005,
            ..Default::default()
        };
        let rough = ObservationParams {
            surface_rms_height_m: 0.03,
            ..Default::default()
        };
        let state = LandState::new(0.25, 1.0);
        assert!(model.predict(&state, &rough) < model.predict(&state, &smooth));
    }
    #[test]
    fn test_run_matches_per_member_predict() {
        let model = ObservationModel::default();
        let params = ObservationParams::default();
        let ensemble = DMatrix::from_row_slice(3, 2, &[0.1, 0.2, 0.25, 1.0, 0.4, 2.2]);
        let predicted = model.run(&ensemble, &params);
        for i in 0..3 {
            let state = LandState::new(ensemble[(i, 0)], ensemble[(i, 1)]);
            assert_approx_eq!(predicted[i], model.predict(&state, &params), 1e-15);
        }
    }
    #[test]
    fn test_porosity_from_densities() {
        let model = ObservationModel::default();
        assert_approx_eq!(model.porosity(), 1.0 - 1.3 / 2.65, 1e-12);
    }
}
