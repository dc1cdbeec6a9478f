//! Non-blocking plausibility checks on inputs and results.
//!
//! Nothing here stops a calculation; the report is handed to whoever presents
//! the result.

use crate::config::{Drug, DrugProfile};
use crate::models::{DosingRegimen, PatientCovariates, PkParameters, PredictedLevels};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// Sample times are hours from the start of the dose; a negative trough time
/// is a pre-dose draw.
pub fn check_sample_timing(peak_time: f64, trough_time: f64, interval: f64) -> ValidationReport {
    let mut report = ValidationReport::default();

    if peak_time < 0.0 {
        report.error("Peak sample cannot be drawn before the dose");
    }
    if (peak_time - trough_time).abs() < 1.0 {
        report.error("Peak and trough samples are too close together for accurate calculations");
    }

    if peak_time > 0.0 && peak_time < 1.0 {
        report.warn("Peak sample drawn too early (before end of distribution phase)");
    }
    if peak_time > 4.0 {
        report.warn("Peak sample drawn later than typical (standard is 30min-1hr after end of infusion)");
    }

    let trough_in_interval = if trough_time < 0.0 { trough_time + interval } else { trough_time };
    if trough_in_interval < interval - 2.0 {
        report.warn("Trough sample drawn earlier than ideal (standard is within 30min of next dose)");
    }
    if trough_in_interval > interval + 2.0 {
        report.warn("Trough sample drawn after scheduled next dose time");
    }

    report
}

pub fn check_regimen(drug: Drug, regimen: &DosingRegimen, patient: &PatientCovariates) -> ValidationReport {
    let mut report = ValidationReport::default();
    let dose = regimen.dose_mg;
    let weight = patient.weight_kg;
    let crcl = patient.crcl_ml_min;

    let (adult_floor, mg_per_kg_ceiling) = match drug {
        Drug::Gentamicin => (80.0, 8.0),
        Drug::Amikacin => (300.0, 25.0),
        Drug::Vancomycin => (250.0, 20.0),
    };

    if dose < adult_floor && weight > 40.0 {
        report.warn("Dose may be too low for adult patient");
    } else if dose > mg_per_kg_ceiling * weight {
        report.warn(format!(
            "Dose ({} mg) exceeds {} mg/kg (patient weight: {} kg)",
            dose, mg_per_kg_ceiling, weight
        ));
    }
    if drug == Drug::Vancomycin && dose > 2000.0 && crcl < 50.0 {
        report.warn("Dose may be too high for patient with reduced renal function");
    }

    let short_interval = if drug.is_aminoglycoside() { 24.0 } else { 12.0 };
    if regimen.interval_hr < short_interval && crcl < 30.0 {
        report.warn(format!(
            "Short interval ({}h) with CrCl of {:.1} mL/min increases toxicity risk",
            regimen.interval_hr, crcl
        ));
    }

    report
}

pub fn check_measured_level(drug: Drug, level: f64) -> ValidationReport {
    let mut report = ValidationReport::default();
    match drug {
        Drug::Vancomycin => {
            if level > 40.0 {
                report.warn("Level is unusually high. Verify sample timing and measurement");
            } else if level < 3.0 {
                report.warn("Level is unusually low. Verify sample timing and measurement");
            }
        }
        Drug::Gentamicin if level > 20.0 => {
            report.warn("Level is unusually high for gentamicin. Verify sample timing and measurement");
        }
        Drug::Amikacin if level > 60.0 => {
            report.warn("Level is unusually high for amikacin. Verify sample timing and measurement");
        }
        _ => {}
    }
    report
}

/// A zeroed prediction means the model inputs were outside its domain, not
/// that the drug is absent.
pub fn check_prediction(levels: &PredictedLevels) -> ValidationReport {
    let mut report = ValidationReport::default();
    if levels.is_degenerate() {
        report.warn("Predicted levels are 0 because the model inputs are invalid; no prediction is available");
    }
    report
}

pub fn check_results(
    drug: Drug,
    profile: &DrugProfile,
    patient: &PatientCovariates,
    params: &PkParameters,
    levels: &PredictedLevels,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    let ke = params.ke_per_hr;
    if ke < 0.01 {
        report.warn(format!("Elimination rate constant is unusually low (ke = {:.4})", ke));
    } else if ke > 0.3 {
        report.warn(format!("Elimination rate constant is unusually high (ke = {:.4})", ke));
    }

    let t_half = params.half_life_hr;
    let (short_half_life, long_half_life) = if drug.is_aminoglycoside() { (1.0, 50.0) } else { (4.0, 150.0) };
    if t_half < short_half_life {
        report.warn(format!("Half-life is unusually short (t½ = {:.1}h)", t_half));
    } else if t_half > long_half_life {
        report.warn(format!("Half-life is extremely long (t½ = {:.1}h). Verify renal function.", t_half));
    }

    let expected_vd = profile.vd_per_kg * patient.weight_kg;
    if params.vd_l < expected_vd * 0.5 || params.vd_l > expected_vd * 2.0 {
        report.warn(format!(
            "Volume of distribution ({:.1}L) differs significantly from population estimate ({:.1}L)",
            params.vd_l, expected_vd
        ));
    }

    if levels.is_degenerate() {
        report.merge(check_prediction(levels));
        return report;
    }

    match drug {
        Drug::Vancomycin => {
            if levels.peak > 80.0 {
                report.warn(format!("Calculated peak ({:.1} mg/L) is unusually high", levels.peak));
            } else if levels.peak < 10.0 {
                report.warn(format!("Calculated peak ({:.1} mg/L) is unusually low", levels.peak));
            }
            if levels.trough > 30.0 {
                report.warn(format!(
                    "Calculated trough ({:.1} mg/L) is unusually high. Risk of nephrotoxicity.",
                    levels.trough
                ));
            }
            if let Some(auc) = levels.auc {
                if auc > 800.0 {
                    report.warn(format!("Calculated AUC ({:.0} mg·hr/L) is very high. Risk of nephrotoxicity.", auc));
                } else if auc < 200.0 {
                    report.warn(format!(
                        "Calculated AUC ({:.0} mg·hr/L) is very low. Risk of therapeutic failure.",
                        auc
                    ));
                }
            }
        }
        Drug::Gentamicin | Drug::Amikacin => {
            let (peak_ceiling, trough_ceiling) = if drug == Drug::Gentamicin { (20.0, 4.0) } else { (60.0, 10.0) };
            if levels.peak > peak_ceiling {
                report.warn(format!("Calculated peak ({:.1} mg/L) is unusually high", levels.peak));
            }
            if levels.trough > trough_ceiling {
                report.warn(format!("Calculated trough ({:.1} mg/L) is high. Risk of toxicity.", levels.trough));
            }
        }
    }

    report
}
