//! Entry points used by the command line and any other front end.

use crate::assessment::{assess_levels, LevelAssessment, ObservedLevels, StatusCategory};
use crate::config::{Config, Drug, RegimenTargets};
use crate::dosing::{DoseSolver, OptimizerTargets, RegimenOptimizer, RegimenSelection};
use crate::error::{DosingError, DosingResult};
use crate::estimation::{from_trough_only, from_two_levels, population_parameters, IndividualEstimate};
use crate::models::{
    auc24, auc24_from_clearance, predict_steady_state_levels, DosingRegimen, MeasuredSample,
    PatientCovariates, PkParameters, PredictedLevels,
};
use crate::validation::{
    check_measured_level, check_prediction, check_regimen, check_results, check_sample_timing, ValidationReport,
};
use log::{info, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialTarget {
    Peak(f64),
    Auc(f64),
}

#[derive(Debug, Clone, Serialize)]
pub struct InitialDose {
    pub regimen: DosingRegimen,
    pub params: PkParameters,
    pub levels: PredictedLevels,
    pub validation: ValidationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndividualizedDose {
    pub params: PkParameters,
    pub current_levels: PredictedLevels,
    pub recommendation: RegimenSelection,
    pub validation: ValidationReport,
}

impl IndividualizedDose {
    pub fn recommended_regimen(&self) -> DosingRegimen {
        self.recommendation.regimen()
    }

    pub fn recommended_levels(&self) -> PredictedLevels {
        self.recommendation.levels()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeakAdjustment {
    pub params: PkParameters,
    pub current_levels: PredictedLevels,
    pub regimen: DosingRegimen,
    pub levels: PredictedLevels,
    pub validation: ValidationReport,
}

/// Builds optimizer targets from a regimen's configured ranges.
pub fn optimizer_targets(target_auc24: f64, targets: &RegimenTargets) -> DosingResult<OptimizerTargets> {
    let auc_range = targets.auc.ok_or_else(|| {
        DosingError::Validation("Regimen has no AUC target range".to_string())
    })?;
    let trough_range = targets.trough.ok_or_else(|| {
        DosingError::Validation("Regimen has no trough target range".to_string())
    })?;
    if !(target_auc24 > 0.0) {
        return Err(DosingError::Validation("Target AUC24 must be positive".to_string()));
    }
    Ok(OptimizerTargets { target_auc24, auc_range, trough_range })
}

/// Population-based starting regimen for a chosen interval.
pub fn compute_initial_dose(
    config: &Config,
    drug: Drug,
    patient: &PatientCovariates,
    target: InitialTarget,
    interval_hr: f64,
    infusion_hr: f64,
) -> DosingResult<InitialDose> {
    let drug_config = config.drug(drug)?;
    let params = population_parameters(&drug_config.profile, patient);
    let solver = DoseSolver::new(&drug_config.profile, patient.weight_kg);

    let dose = match target {
        InitialTarget::Peak(peak) => {
            solver.solve_for_target_peak(peak, interval_hr, infusion_hr, params.ke_per_hr, params.vd_l)
        }
        InitialTarget::Auc(auc) => solver.solve_for_target_auc(auc, params.cl_l_hr, interval_hr),
    };
    let regimen = DosingRegimen::new(dose, interval_hr, infusion_hr)?;

    let mut levels = predict_steady_state_levels(dose, interval_hr, infusion_hr, params.ke_per_hr, params.vd_l);
    if drug == Drug::Vancomycin {
        levels = levels.with_auc(auc24(levels.peak, levels.trough, params.ke_per_hr, interval_hr, infusion_hr));
    }

    let mut validation = check_regimen(drug, &regimen, patient);
    validation.merge(check_results(drug, &drug_config.profile, patient, &params, &levels));

    info!(
        "Initial {} regimen: {} mg q{}h over {} hr (peak {:.1}, trough {:.1})",
        drug, regimen.dose_mg, regimen.interval_hr, regimen.infusion_hr, levels.peak, levels.trough
    );

    Ok(InitialDose { regimen, params, levels, validation })
}

fn current_levels(drug: Drug, regimen: &DosingRegimen, estimate: &IndividualEstimate) -> PredictedLevels {
    let levels = estimate.levels();
    if drug == Drug::Vancomycin {
        levels.with_auc(auc24_from_clearance(regimen.dose_mg, estimate.params.cl_l_hr, regimen.interval_hr))
    } else {
        levels
    }
}

fn recommend_from_estimate(
    config: &Config,
    drug: Drug,
    patient: &PatientCovariates,
    current: &DosingRegimen,
    estimate: &IndividualEstimate,
    targets: &OptimizerTargets,
    candidate_intervals: &[f64],
    mut validation: ValidationReport,
) -> DosingResult<IndividualizedDose> {
    let drug_config = config.drug(drug)?;
    let solver = DoseSolver::new(&drug_config.profile, patient.weight_kg);
    let optimizer = RegimenOptimizer::new(&config.scoring, solver);

    let recommendation = optimizer.select(
        &estimate.params,
        targets,
        candidate_intervals,
        current.infusion_hr,
        patient.crcl_ml_min,
    )?;

    let current_levels = current_levels(drug, current, estimate);
    validation.merge(check_results(drug, &drug_config.profile, patient, &estimate.params, &current_levels));
    if estimate.ke_clamped {
        validation.warnings.push(format!(
            "Individual elimination rate was outside the plausible range and was limited to {:.3} /hr",
            estimate.params.ke_per_hr
        ));
    }

    Ok(IndividualizedDose {
        params: estimate.params,
        current_levels,
        recommendation,
        validation,
    })
}

/// Individualizes from a peak and a trough drawn under `current`, then
/// searches the candidate intervals for the best regimen.
pub fn compute_individualized_dose(
    config: &Config,
    drug: Drug,
    patient: &PatientCovariates,
    current: &DosingRegimen,
    peak: &MeasuredSample,
    trough: &MeasuredSample,
    targets: &OptimizerTargets,
    candidate_intervals: &[f64],
) -> DosingResult<IndividualizedDose> {
    let estimate = from_two_levels(current, peak, trough)?;

    let mut validation = check_sample_timing(peak.time_hr, trough.time_hr, current.interval_hr);
    validation.merge(check_measured_level(drug, peak.concentration));
    validation.merge(check_measured_level(drug, trough.concentration));

    recommend_from_estimate(config, drug, patient, current, &estimate, targets, candidate_intervals, validation)
}

/// Like [`compute_individualized_dose`] but from a single steady-state trough.
pub fn compute_trough_adjusted_dose(
    config: &Config,
    drug: Drug,
    patient: &PatientCovariates,
    current: &DosingRegimen,
    measured_trough: f64,
    targets: &OptimizerTargets,
    candidate_intervals: &[f64],
) -> DosingResult<IndividualizedDose> {
    let drug_config = config.drug(drug)?;
    let estimate = from_trough_only(&drug_config.profile, patient, current, measured_trough)?;
    let validation = check_measured_level(drug, measured_trough);

    recommend_from_estimate(config, drug, patient, current, &estimate, targets, candidate_intervals, validation)
}

/// Conventional aminoglycoside adjustment: individualize from two levels and
/// re-solve for a desired peak at a desired interval.
pub fn compute_adjusted_peak_dose(
    config: &Config,
    drug: Drug,
    patient: &PatientCovariates,
    current: &DosingRegimen,
    peak: &MeasuredSample,
    trough: &MeasuredSample,
    desired_peak: f64,
    desired_interval_hr: f64,
) -> DosingResult<PeakAdjustment> {
    let drug_config = config.drug(drug)?;
    let estimate = from_two_levels(current, peak, trough)?;
    let params = estimate.params;

    let solver = DoseSolver::new(&drug_config.profile, patient.weight_kg);
    let dose = solver.solve_for_target_peak(
        desired_peak,
        desired_interval_hr,
        current.infusion_hr,
        params.ke_per_hr,
        params.vd_l,
    );
    let regimen = DosingRegimen::new(dose, desired_interval_hr, current.infusion_hr)?;
    let levels =
        predict_steady_state_levels(dose, desired_interval_hr, current.infusion_hr, params.ke_per_hr, params.vd_l);

    let current_levels = current_levels(drug, current, &estimate);
    let mut validation = check_sample_timing(peak.time_hr, trough.time_hr, current.interval_hr);
    validation.merge(check_regimen(drug, &regimen, patient));
    validation.merge(check_results(drug, &drug_config.profile, patient, &params, &current_levels));
    validation.merge(check_prediction(&levels));

    info!(
        "Adjusted {} regimen: {} mg q{}h (peak {:.1}, trough {:.1})",
        drug, regimen.dose_mg, regimen.interval_hr, levels.peak, levels.trough
    );

    Ok(PeakAdjustment {
        params,
        current_levels,
        regimen,
        levels,
        validation,
    })
}

/// Population regimen offered when measured levels could not be used.
#[derive(Debug, Clone, Serialize)]
pub struct PopulationFallback {
    pub reason: String,
    pub initial: InitialDose,
}

/// Turns an individualization failure into a population-based regimen at the
/// current interval. Any other error is handed back unchanged.
pub fn fall_back_to_population(
    config: &Config,
    drug: Drug,
    patient: &PatientCovariates,
    current: &DosingRegimen,
    target: InitialTarget,
    error: DosingError,
) -> DosingResult<PopulationFallback> {
    if !error.is_individualization_failure() {
        return Err(error);
    }
    warn!("Could not individualize ({}); using population estimate", error);

    let mut initial = compute_initial_dose(config, drug, patient, target, current.interval_hr, current.infusion_hr)?;
    initial.validation.warnings.insert(
        0,
        format!("Could not individualize from measured levels ({}); regimen uses population estimates", error),
    );
    Ok(PopulationFallback { reason: error.to_string(), initial })
}

pub fn assess(levels: &ObservedLevels, targets: &RegimenTargets) -> (Vec<LevelAssessment>, StatusCategory) {
    assess_levels(levels, targets)
}
