pub mod auc;
pub mod one_compartment;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use crate::error::{DosingError, DosingResult};

pub use auc::{auc24, auc24_from_clearance};
pub use one_compartment::{
    estimate_rate_constant, half_life, predict_steady_state_levels, profile, OneCompartmentModel,
    ProfilePoint,
};

/// Lower and upper bounds applied to population clearance (L/hr).
pub const CL_MIN: f64 = 0.1;
pub const CL_MAX: f64 = 15.0;
/// Lower and upper bounds applied to elimination rate constants (1/hr).
pub const KE_MIN: f64 = 0.005;
pub const KE_MAX: f64 = 0.4;

pub trait PKModel {
    fn steady_state_levels(&self, regimen: &DosingRegimen) -> PredictedLevels;
    fn concentration_at(&self, time: f64, regimen: &DosingRegimen) -> f64;
    fn parameters(&self) -> &PkParameters;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatientCovariates {
    pub weight_kg: f64,
    pub crcl_ml_min: f64,
}

impl PatientCovariates {
    pub fn new(weight_kg: f64, crcl_ml_min: f64) -> DosingResult<Self> {
        if !(weight_kg > 0.0) {
            return Err(DosingError::Validation("Weight must be positive".to_string()));
        }
        if !(crcl_ml_min >= 0.0) {
            return Err(DosingError::Validation("CrCl must not be negative".to_string()));
        }
        Ok(Self { weight_kg, crcl_ml_min })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterSource {
    Population,
    Individual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PkParameters {
    pub vd_l: f64,
    pub cl_l_hr: f64,
    pub ke_per_hr: f64,
    pub half_life_hr: f64,
    pub source: ParameterSource,
}

impl PkParameters {
    pub fn is_individual(&self) -> bool {
        self.source == ParameterSource::Individual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DosingRegimen {
    pub dose_mg: f64,
    pub interval_hr: f64,
    pub infusion_hr: f64,
}

impl DosingRegimen {
    pub fn new(dose_mg: f64, interval_hr: f64, infusion_hr: f64) -> DosingResult<Self> {
        if !(dose_mg > 0.0) {
            return Err(DosingError::InvalidRegimen("Dose must be positive".to_string()));
        }
        if !(interval_hr > 0.0) {
            return Err(DosingError::InvalidRegimen("Dosing interval must be positive".to_string()));
        }
        if !(infusion_hr > 0.0) {
            return Err(DosingError::InvalidRegimen("Infusion duration must be positive".to_string()));
        }
        if infusion_hr >= interval_hr {
            return Err(DosingError::InvalidRegimen(
                format!("Infusion duration ({} hr) must be shorter than the interval ({} hr)", infusion_hr, interval_hr)
            ));
        }
        Ok(Self { dose_mg, interval_hr, infusion_hr })
    }

    pub fn daily_dose_mg(&self) -> f64 {
        self.dose_mg * 24.0 / self.interval_hr
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictedLevels {
    pub peak: f64,
    pub trough: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auc: Option<f64>,
}

impl PredictedLevels {
    pub fn with_auc(mut self, auc: f64) -> Self {
        self.auc = Some(auc);
        self
    }

    /// Zero peak and trough is the forward model's "inputs out of domain" result.
    pub fn is_degenerate(&self) -> bool {
        self.peak == 0.0 && self.trough == 0.0
    }
}

/// A measured concentration with its draw time in hours after the start of
/// the dose. Negative times are pre-dose draws.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasuredSample {
    pub concentration: f64,
    pub time_hr: f64,
}

impl MeasuredSample {
    pub fn new(concentration: f64, time_hr: f64) -> Self {
        Self { concentration, time_hr }
    }

    /// Plain signed difference of wall-clock times; no wrap past midnight.
    pub fn from_clock_times(dose_start: NaiveTime, drawn_at: NaiveTime, concentration: f64) -> Self {
        let minutes = drawn_at.signed_duration_since(dose_start).num_minutes();
        Self::new(concentration, minutes as f64 / 60.0)
    }
}
