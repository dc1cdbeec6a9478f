use super::population::population_parameters;
use crate::config::DrugProfile;
use crate::error::{DosingError, DosingResult};
use crate::models::{
    estimate_rate_constant, half_life, one_compartment::log_linear_slope, predict_steady_state_levels,
    DosingRegimen, MeasuredSample, ParameterSource, PatientCovariates, PkParameters, PredictedLevels, CL_MIN,
};
use log::{debug, warn};
use serde::Serialize;

/// Samples closer together than this give an unreliable slope (hours).
pub const MIN_SAMPLE_SEPARATION_HR: f64 = 1.0;

const NEAR_ZERO: f64 = 1e-9;
/// Troughs at or below this (mg/L) are too small to scale clearance from.
const MIN_RATIO_TROUGH: f64 = 0.1;

/// Patient-specific parameters with the steady-state levels they imply for
/// the regimen the samples were drawn under.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndividualEstimate {
    pub params: PkParameters,
    pub cmax: f64,
    pub cmin: f64,
    pub ke_clamped: bool,
}

impl IndividualEstimate {
    pub fn levels(&self) -> PredictedLevels {
        PredictedLevels {
            peak: self.cmax,
            trough: self.cmin,
            auc: None,
        }
    }
}

/// A pre-dose draw belongs to the tail of the previous interval, which at
/// steady state matches the same point of the current one.
fn steady_state_time(sample: &MeasuredSample, tau: f64, label: &str) -> DosingResult<f64> {
    if !sample.time_hr.is_finite() {
        return Err(DosingError::Timing(format!("{} sample time is not a number", label)));
    }
    if sample.time_hr >= 0.0 {
        return Ok(sample.time_hr);
    }
    if sample.time_hr <= -tau {
        return Err(DosingError::Timing(format!(
            "{} sample drawn {:.1} hr before the dose, more than one interval ({} hr)",
            label, -sample.time_hr, tau
        )));
    }
    Ok(sample.time_hr + tau)
}

fn check_concentration(sample: &MeasuredSample, label: &str) -> DosingResult<()> {
    if !(sample.concentration > 0.0) || !sample.concentration.is_finite() {
        return Err(DosingError::InvalidSample(format!(
            "{} concentration must be positive (got {} mg/L)",
            label, sample.concentration
        )));
    }
    Ok(())
}

/// Two-level individualization at steady state.
///
/// The samples may be given in either order; the earlier one is used as the
/// start of the elimination slope. The peak sample is back-extrapolated to
/// the end of the infusion, or when it was drawn during the infusion the
/// trough is treated as the end-of-interval level and extrapolated back. Any step that would divide by zero or
/// produce a non-positive parameter fails instead of substituting a default.
pub fn from_two_levels(
    regimen: &DosingRegimen,
    peak: &MeasuredSample,
    trough: &MeasuredSample,
) -> DosingResult<IndividualEstimate> {
    check_concentration(peak, "Peak")?;
    check_concentration(trough, "Trough")?;

    let tau = regimen.interval_hr;
    let infusion = regimen.infusion_hr;
    let t_peak = steady_state_time(peak, tau, "Peak")?;
    let t_trough = steady_state_time(trough, tau, "Trough")?;

    let ((t1, c1), (t2, c2)) = if t_peak <= t_trough {
        ((t_peak, peak.concentration), (t_trough, trough.concentration))
    } else {
        ((t_trough, trough.concentration), (t_peak, peak.concentration))
    };

    if t2 - t1 < MIN_SAMPLE_SEPARATION_HR {
        return Err(DosingError::Timing(format!(
            "Samples are {:.2} hr apart; at least {} hr is needed",
            t2 - t1,
            MIN_SAMPLE_SEPARATION_HR
        )));
    }

    let slope = log_linear_slope(c1, t1, c2, t2)?;
    if slope <= 0.0 {
        return Err(DosingError::InvalidSample(format!(
            "Later level ({} mg/L) is not lower than the earlier one ({} mg/L)",
            c2, c1
        )));
    }
    let ke = estimate_rate_constant(c1, t1, c2, t2)?;
    let ke_clamped = ke != slope;
    if ke_clamped {
        warn!("Individual ke {:.4} /hr is outside the plausible band; using {:.4} /hr", slope, ke);
    }

    let cmax = if t_peak >= infusion {
        peak.concentration * (ke * (t_peak - infusion)).exp()
    } else {
        debug!("Peak drawn during the infusion; extrapolating Cmax from the trough");
        trough.concentration / (-ke * (tau - infusion)).exp()
    };
    let cmin = cmax * (-ke * (tau - infusion)).exp();

    let term_inf = 1.0 - (-ke * infusion).exp();
    let term_tau = 1.0 - (-ke * tau).exp();
    let denom = cmax * ke * infusion * term_tau;
    if !denom.is_finite() || denom.abs() < NEAR_ZERO {
        return Err(DosingError::DegenerateParameters(
            "Volume of distribution cannot be solved: denominator is zero".to_string()
        ));
    }

    let vd = regimen.dose_mg * term_inf / denom;
    if !(vd > 0.0) || !vd.is_finite() {
        return Err(DosingError::DegenerateParameters(format!("Volume of distribution is {} L", vd)));
    }

    let cl = ke * vd;
    if !(cl > 0.0) || !cl.is_finite() {
        return Err(DosingError::DegenerateParameters(format!("Clearance is {} L/hr", cl)));
    }

    debug!(
        "Individual PK: ke {:.4} /hr, Vd {:.1} L, CL {:.2} L/hr, Cmax {:.1}, Cmin {:.1}",
        ke, vd, cl, cmax, cmin
    );

    Ok(IndividualEstimate {
        params: PkParameters {
            vd_l: vd,
            cl_l_hr: cl,
            ke_per_hr: ke,
            half_life_hr: half_life(ke),
            source: ParameterSource::Individual,
        },
        cmax,
        cmin,
        ke_clamped,
    })
}

/// Scales population clearance by how far a single measured trough is from
/// the population prediction. Volume stays at the population value.
///
/// Fails with `DegenerateParameters` when either trough is too low for the
/// ratio to mean anything.
pub fn from_trough_only(
    profile: &DrugProfile,
    patient: &PatientCovariates,
    regimen: &DosingRegimen,
    measured_trough: f64,
) -> DosingResult<IndividualEstimate> {
    if !(measured_trough > 0.0) || !measured_trough.is_finite() {
        return Err(DosingError::InvalidSample(format!(
            "Trough concentration must be positive (got {} mg/L)",
            measured_trough
        )));
    }

    let population = population_parameters(profile, patient);
    let predicted = predict_steady_state_levels(
        regimen.dose_mg,
        regimen.interval_hr,
        regimen.infusion_hr,
        population.ke_per_hr,
        population.vd_l,
    );

    if !(predicted.trough > MIN_RATIO_TROUGH && measured_trough > MIN_RATIO_TROUGH) {
        return Err(DosingError::DegenerateParameters(format!(
            "Cannot scale clearance from trough ratio (predicted {:.3}, measured {:.3} mg/L)",
            predicted.trough, measured_trough
        )));
    }

    // trough varies inversely with clearance
    let ratio = (measured_trough / predicted.trough).clamp(0.2, 5.0);
    let cl = (population.cl_l_hr / ratio).max(CL_MIN);

    let vd = population.vd_l;
    let ke = cl / vd;
    if !(ke > 0.0) || !ke.is_finite() {
        return Err(DosingError::DegenerateParameters(format!("Elimination rate constant is {} /hr", ke)));
    }

    let cmin = measured_trough;
    let cmax = cmin / (-ke * (regimen.interval_hr - regimen.infusion_hr)).exp();

    debug!(
        "Trough-adjusted PK: predicted trough {:.1}, measured {:.1}, CL {:.2} L/hr, ke {:.4} /hr",
        predicted.trough, measured_trough, cl, ke
    );

    Ok(IndividualEstimate {
        params: PkParameters {
            vd_l: vd,
            cl_l_hr: cl,
            ke_per_hr: ke,
            half_life_hr: half_life(ke),
            source: ParameterSource::Individual,
        },
        cmax,
        cmin,
        ke_clamped: false,
    })
}
