/// Upper bound on reported AUC24 (mg*hr/L).
pub const AUC_CEILING: f64 = 1500.0;

/// AUC over 24 hours from steady-state peak and trough: a linear trapezoid
/// for the infusion phase and a log trapezoid for the elimination phase,
/// scaled from one interval to 24 hours.
///
/// Returns 0 when the inputs cannot produce a finite area.
pub fn auc24(peak: f64, trough: f64, ke: f64, tau: f64, infusion: f64) -> f64 {
    if !(ke > 0.0 && tau > 0.0 && infusion > 0.0) || !peak.is_finite() || !trough.is_finite() {
        return 0.0;
    }

    // back-extrapolated to the start of the infusion
    let c0 = if peak > 0.0 { peak * (ke * infusion).exp() } else { 0.0 };
    let auc_infusion = infusion * (c0 + peak) / 2.0;

    let auc_elimination = if peak > trough && trough > 0.0 {
        (peak - trough) / ke
    } else {
        (tau - infusion) * (peak + trough) / 2.0
    };

    let auc = (auc_infusion + auc_elimination) * (24.0 / tau);
    if !auc.is_finite() {
        return 0.0;
    }
    auc.clamp(0.0, AUC_CEILING)
}

/// AUC24 as daily dose over clearance.
pub fn auc24_from_clearance(dose: f64, cl: f64, tau: f64) -> f64 {
    if !(cl > 0.0 && tau > 0.0 && dose >= 0.0) {
        return 0.0;
    }
    let auc = dose / cl * (24.0 / tau);
    if auc.is_finite() { auc } else { 0.0 }
}
