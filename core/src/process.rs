//! Coupled water-balance and vegetation-phenology process model
//!
//! This module implements the nonlinear state-transition function used by the
//! ensemble filter. The model advances the `[SM, VWC]` state one discrete time step
//! (daily by default) given scalar meteorological forcing. It is a deliberately
//! parsimonious bucket model: soil moisture follows a single-layer water balance
//! with saturation-excess runoff and moisture-limited evapotranspiration, and
//! vegetation water content follows a logistic growth/senescence equation gated by
//! temperature, season, and moisture stress.
//!
//! # Water balance
//!
//! With moisture stress $\beta(\theta) = \mathrm{clip}\left(\frac{\theta - \theta_{wilt}}{\theta_{field} - \theta_{wilt}}, 0, 1\right)$:
//!
//! $$
//! \begin{aligned}
//! Q_{runoff} &= \mathrm{clip}(P \cdot \beta^p,\ 0,\ P) \\\\
//! ET &= \mathrm{clip}(\beta \cdot PET,\ 0,\ PET) \\\\
//! \theta^+ &= \mathrm{clip}\left(\theta + \frac{\Delta t}{1000\, d_{rz}} (P - Q_{runoff} - ET),\ 0,\ \theta_{sat}\right)
//! \end{aligned}
//! $$
//!
//! # Vegetation phenology
//!
//! Growth is limited by temperature (linear ramp between $T_{base}$ and $T_{opt}$),
//! season (Gaussian proxy centered on the peak day-of-year), and moisture stress
//! evaluated at the *pre-update* soil moisture:
//!
//! $$
//! W^+ = \mathrm{clip}\left(W + \Delta t \left[ r_{max}\, g_T\, g_{doy}\, \beta
//! \left(1 - \frac{W}{W_{max}}\right) - k_{sen} W \right],\ 0,\ W_{max}\right)
//! $$
//!
//! The model is a pure function of (state, forcing, configuration) and carries no
//! per-step memory. Forcing signs are not validated: negative precipitation or PET
//! propagate unchanged through the clip chain (see [`crate::clip`]).

use crate::enkf::TransitionModel;
use crate::{LandState, StateBounds, clip};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Meteorological inputs required by the process model for a single step.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ForcingRecord {
    /// Precipitation in mm per time step
    pub precipitation: f64,
    /// Potential evapotranspiration in mm per time step
    pub pet: f64,
    /// Air temperature in degrees Celsius
    pub temperature: f64,
    /// Day of year (1-366)
    pub day_of_year: f64,
}

/// Configuration constants of the water-balance/phenology model.
///
/// Defaults describe a generic temperate cropland site; field studies should
/// replace at least the soil hydraulic thresholds and the phenology window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Model time step in days
    pub delta_t_days: f64,
    /// Root-zone depth in meters
    pub root_zone_depth_m: f64,
    /// Wilting-point soil moisture in m³/m³
    pub sm_wilt: f64,
    /// Field-capacity soil moisture in m³/m³
    pub sm_field: f64,
    /// Saturation soil moisture in m³/m³ (upper physical bound on SM)
    pub sm_sat: f64,
    /// Saturation-excess runoff exponent
    pub runoff_exponent: f64,
    /// Maximum vegetation growth rate in kg/m² per day
    pub r_max: f64,
    /// Maximum vegetation water content in kg/m² (upper physical bound on VWC)
    pub vwc_max: f64,
    /// First-order senescence rate in 1/day
    pub k_sen: f64,
    /// Base temperature for growth in °C
    pub t_base: f64,
    /// Optimal temperature for growth in °C
    pub t_opt: f64,
    /// Day of year of peak growing season
    pub season_peak_doy: f64,
    /// Width of the seasonal Gaussian window in days
    pub season_width: f64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            delta_t_days: 1.0,
            root_zone_depth_m: 0.3,
            sm_wilt: 0.1,
            sm_field: 0.35,
            sm_sat: 0.45,
            runoff_exponent: 3.0,
            r_max: 0.25,
            vwc_max: 2.5,
            k_sen: 0.015,
            t_base: 5.0,
            t_opt: 30.0,
            season_peak_doy: 200.0,
            season_width: 60.0,
        }
    }
}

/// Nonlinear water-balance and vegetation-phenology transition model.
#[derive(Clone, Debug, Default)]
pub struct ProcessModel {
    config: ProcessConfig,
}

impl ProcessModel {
    /// Create a process model from an explicit configuration.
    pub fn new(config: ProcessConfig) -> ProcessModel {
        ProcessModel { config }
    }
    /// Read access to the model configuration.
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }
    /// The physical bounds this model declares for the `[SM, VWC]` state.
    ///
    /// The filter queries these once at construction and re-applies them to every
    /// ensemble member after every mutation.
    pub fn bounds(&self) -> StateBounds {
        StateBounds::new(vec![
            Some((0.0, self.config.sm_sat)),
            Some((0.0, self.config.vwc_max)),
        ])
    }
    /// Moisture-stress factor β ∈ [0, 1] between wilting point and field capacity.
    pub fn moisture_stress(&self, soil_moisture: f64) -> f64 {
        let stress = (soil_moisture - self.config.sm_wilt)
            / (self.config.sm_field - self.config.sm_wilt);
        clip(stress, 0.0, 1.0)
    }
    /// Linear temperature limiter between the base and optimal temperature.
    fn temperature_limiter(&self, temperature: f64) -> f64 {
        if temperature <= self.config.t_base {
            return 0.0;
        }
        let scale = (temperature - self.config.t_base)
            / (self.config.t_opt - self.config.t_base).max(1e-6);
        clip(scale, 0.0, 1.0)
    }
    /// Gaussian seasonal limiter centered on the configured peak day of year.
    fn season_limiter(&self, day_of_year: f64) -> f64 {
        let relative = (day_of_year - self.config.season_peak_doy) / self.config.season_width;
        (-relative * relative).exp()
    }
    /// Advance a single state one time step.
    ///
    /// # Arguments
    /// * `state` - Current `[SM, VWC]` state.
    /// * `forcing` - Meteorological forcing for the step.
    ///
    /// # Returns
    /// * The updated state, clipped to the declared physical bounds.
    ///
    /// # Example
    /// ```rust
    /// use gnssr_enkf::LandState;
    /// use gnssr_enkf::process::{ForcingRecord, ProcessModel};
    ///
    /// let model = ProcessModel::default();
    /// let forcing = ForcingRecord {
    ///     precipitation: 5.0,
    ///     pet: 3.0,
    ///     temperature: 22.0,
    ///     day_of_year: 180.0,
    /// };
    /// let next = model.step(&LandState::new(0.25, 1.0), &forcing);
    /// assert!(next.soil_moisture >= 0.0 && next.soil_moisture <= 0.45);
    /// ```
    pub fn step(&self, state: &LandState, forcing: &ForcingRecord) -> LandState {
        let c = &self.config;
        // Stress is evaluated once at the pre-update soil moisture and reused for
        // runoff, ET, and the vegetation growth limiter.
        let beta = self.moisture_stress(state.soil_moisture);

        let runoff = clip(
            forcing.precipitation * beta.powf(c.runoff_exponent),
            0.0,
            forcing.precipitation,
        );
        let et = clip(beta * forcing.pet, 0.0, forcing.pet);
        let sm_increment = c.delta_t_days / (c.root_zone_depth_m * 1000.0)
            * (forcing.precipitation - runoff - et);
        let sm_new = clip(state.soil_moisture + sm_increment, 0.0, c.sm_sat);

        let growth_limiters = self.temperature_limiter(forcing.temperature)
            * self.season_limiter(forcing.day_of_year)
            * beta;
        let growth = c.r_max * growth_limiters * (1.0 - state.vegetation_water / c.vwc_max);
        let senescence = c.k_sen * state.vegetation_water;
        let vwc_new = clip(
            state.vegetation_water + c.delta_t_days * (growth - senescence),
            0.0,
            c.vwc_max,
        );

        LandState::new(sm_new, vwc_new)
    }
    /// Advance a whole ensemble one time step in a single batched call.
    ///
    /// Members are rows of the `N x 2` matrix; each member is propagated
    /// independently (no cross-member coupling) and the output preserves the input
    /// shape.
    pub fn run(&self, ensemble: &DMatrix<f64>, forcing: &ForcingRecord) -> DMatrix<f64> {
        assert_eq!(
            ensemble.ncols(),
            2,
            "process model expects [SM, VWC] state rows"
        );
        let mut propagated = DMatrix::zeros(ensemble.nrows(), ensemble.ncols());
        for i in 0..ensemble.nrows() {
            let state = LandState::new(ensemble[(i, 0)], ensemble[(i, 1)]);
            let next = self.step(&state, forcing);
            propagated[(i, 0)] = next.soil_moisture;
            propagated[(i, 1)] = next.vegetation_water;
        }
        propagated
    }
}

impl TransitionModel for ProcessModel {
    type Forcing = ForcingRecord;

    fn run(&self, ensemble: &DMatrix<f64>, forcing: &ForcingRecord) -> DMatrix<f64> {
        ProcessModel::run(self, ensemble, forcing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn calm_forcing() -> ForcingRecord {
        ForcingRecord {
            precipitation: 0.0,
            pet: 0.0,
            temperature: 20.0,
            day_of_year: 150.0,
        }
    }

    #[test]
    fn test_moisture_stress_ramp() {
        let model = ProcessModel::default();
        assert_eq!(model.moisture_stress(0.05), 0.0); // below wilting point
        assert_eq!(model.moisture_stress(0.40), 1.0); // above field capacity
        assert_approx_eq!(model.moisture_stress(0.225), 0.5, 1e-12);
    }
    #[test]
    fn test_temperature_limiter_edges() {
        let model = ProcessModel::default();
        assert_eq!(model.temperature_limiter(5.0), 0.0);
        assert_eq!(model.temperature_limiter(-3.0), 0.0);
        assert_eq!(model.temperature_limiter(35.0), 1.0);
        assert_approx_eq!(model.temperature_limiter(17.5), 0.5, 1e-12);
    }
    #[test]
    fn test_season_limiter_peak() {
        let model = ProcessModel::default();
        assert_approx_eq!(model.season_limiter(200.0), 1.0, 1e-12);
        assert!(model.season_limiter(20.0) < 0.01);
    }
    #[test]
    fn test_step_without_water_forcing_keeps_sm() {
        let model = ProcessModel::default();
        let next = model.step(&LandState::new(0.25, 1.0), &calm_forcing());
        assert_approx_eq!(next.soil_moisture, 0.25, 1e-12);
    }
    #[test]
    fn test_step_vwc_matches_closed_form() {
        let model = ProcessModel::default();
        let state = LandState::new(0.25, 1.0);
        let next = model.step(&state, &calm_forcing());
        // Closed form at the defaults: g_T = 15/25, g_doy = exp(-(50/60)^2), beta = 0.6
        let g_t: f64 = 0.6;
        let g_doy = (-(50.0_f64 / 60.0).powi(2)).exp();
        let growth = 0.25 * g_t * g_doy * 0.6 * (1.0 - 1.0 / 2.5);
        let expected = 1.0 + growth - 0.015 * 1.0;
        assert_approx_eq!(next.vegetation_water, expected, 1e-12);
    }
    #[test]
    fn test_step_rain_on_dry_soil_infiltrates() {
        let model = ProcessModel::default();
        // Below the wilting point beta = 0, so there is no runoff and no ET: the
        // full rainfall depth infiltrates.
        let forcing = ForcingRecord {
            precipitation: 9.0,
            pet: 4.0,
            temperature: 20.0,
            day_of_year: 150.0,
        };
        let next = model.step(&LandState::new(0.05, 0.5), &forcing);
        assert_approx_eq!(next.soil_moisture, 0.05 + 9.0 / 300.0, 1e-12);
    }
    #[test]
    fn test_step_saturated_soil_sheds_rain() {
        let model = ProcessModel::default();
        // At field capacity beta = 1: runoff equals the full rainfall and ET runs
        // at the potential rate.
        let forcing = ForcingRecord {
            precipitation: 10.0,
            pet: 3.0,
            temperature: 20.0,
            day_of_year: 150.0,
        };
        let next = model.step(&LandState::new(0.35, 0.5), &forcing);
        assert_approx_eq!(next.soil_moisture, 0.35 - 3.0 / 300.0, 1e-12);
    }
    #[test]
    fn test_negative_precipitation_propagates() {
        let model = ProcessModel::default();
        // Negative precipitation is documented pass-through behavior: the inverted
        // clip bounds resolve runoff to the (negative) precipitation itself, so the
        // water balance sees P - Q = 0.
        let forcing = ForcingRecord {
            precipitation: -5.0,
            pet: 0.0,
            temperature: 20.0,
            day_of_year: 150.0,
        };
        let next = model.step(&LandState::new(0.25, 1.0), &forcing);
        assert_approx_eq!(next.soil_moisture, 0.25, 1e-12);
    }
    #[test]
    fn test_state_stays_in_bounds() {
        let model = ProcessModel::default();
        let wet = ForcingRecord {
            precipitation: 500.0,
            pet: 0.0,
            temperature: 25.0,
            day_of_year: 200.0,
        };
        let next = model.step(&LandState::new(0.44, 2.49), &wet);
        assert!(next.soil_moisture <= model.config().sm_sat);
        assert!(next.vegetation_water <= model.config().vwc_max);
        let dry = ForcingRecord {
            precipitation: 0.0,
            pet: 50.0,
            temperature: 25.0,
            day_of_year: 200.0,
        };
        let next = model.step(&LandState::new(0.11, 0.01), &dry);
        assert!(next.soil_moisture >= 0.0);
        assert!(next.vegetation_water >= 0.0);
    }
    #[test]
    fn test_run_matches_per_member_step() {
        let model = ProcessModel::default();
        let forcing = ForcingRecord {
            precipitation: 4.0,
            pet: 2.5,
            temperature: 18.0,
            day_of_year: 170.0,
        };
        let ensemble = DMatrix::from_row_slice(3, 2, &[0.15, 0.4, 0.25, 1.0, 0.35, 2.0]);
        let propagated = model.run(&ensemble, &forcing);
        for i in 0..3 {
            let state = LandState::new(ensemble[(i, 0)], ensemble[(i, 1)]);
            let expected = model.step(&state, &forcing);
            assert_approx_eq!(propagated[(i, 0)], expected.soil_moisture, 1e-15);
            assert_approx_eq!(propagated[(i, 1)], expected.vegetation_water, 1e-15);
        }
    }
    #[test]
    fn test_declared_bounds() {
        let model = ProcessModel::default();
        let bounds = model.bounds();
        assert_eq!(bounds.interval(0), Some((0.0, 0.45)));
        assert_eq!(bounds.interval(1), Some((0.0, 2.5)));
    }
}
