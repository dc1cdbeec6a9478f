use super::{DosingRegimen, PKModel, PkParameters, PredictedLevels, KE_MAX, KE_MIN};
use crate::error::{DosingError, DosingResult};
use log::debug;
use serde::Serialize;
use std::f64::consts::LN_2;

/// Ceilings applied to forward predictions (mg/L).
pub const PEAK_CEILING: f64 = 100.0;
pub const TROUGH_CEILING: f64 = 50.0;

const NEAR_ZERO: f64 = 1e-9;

/// Steady-state peak (end of infusion) and trough (end of interval) for a
/// constant-rate infusion repeated every `tau` hours.
///
/// Inputs outside the model's domain give a zero peak and trough instead of
/// an error; callers treat that as "no prediction available".
pub fn predict_steady_state_levels(dose: f64, tau: f64, infusion: f64, ke: f64, vd: f64) -> PredictedLevels {
    if !(dose > 0.0 && tau > 0.0 && infusion > 0.0 && ke > 0.0 && vd > 0.0) {
        return PredictedLevels::default();
    }

    let term_inf = 1.0 - (-ke * infusion).exp();
    let term_tau = 1.0 - (-ke * tau).exp();
    let denom = vd * ke * infusion * term_tau;

    if term_tau.abs() < NEAR_ZERO
        || term_inf.abs() < NEAR_ZERO
        || !denom.is_finite()
        || denom.abs() < NEAR_ZERO
    {
        return PredictedLevels::default();
    }

    let peak = dose * term_inf / denom;
    if !peak.is_finite() {
        return PredictedLevels::default();
    }
    let peak = peak.clamp(0.0, PEAK_CEILING);

    let trough = peak * (-ke * (tau - infusion)).exp();
    if !trough.is_finite() {
        return PredictedLevels::default();
    }

    PredictedLevels {
        peak,
        trough: trough.clamp(0.0, TROUGH_CEILING),
        auc: None,
    }
}

/// Unclamped log-linear slope between two concentrations of one declining
/// exponential. Positive when the later level is lower.
pub fn log_linear_slope(level_early: f64, t_early: f64, level_late: f64, t_late: f64) -> DosingResult<f64> {
    if !(level_early > 0.0) || !(level_late > 0.0) {
        return Err(DosingError::InvalidSample(
            format!("Concentrations must be positive (got {} and {} mg/L)", level_early, level_late)
        ));
    }
    if !(t_early < t_late) {
        return Err(DosingError::InvalidSample(
            format!("Sample times must be increasing (got {} and {} hr)", t_early, t_late)
        ));
    }

    Ok((level_early.ln() - level_late.ln()) / (t_late - t_early))
}

/// Elimination rate constant from two timed levels, held to
/// [`KE_MIN`, `KE_MAX`].
pub fn estimate_rate_constant(level_early: f64, t_early: f64, level_late: f64, t_late: f64) -> DosingResult<f64> {
    let slope = log_linear_slope(level_early, t_early, level_late, t_late)?;
    let ke = slope.clamp(KE_MIN, KE_MAX);
    debug!("Two-point ke: slope {:.5} /hr, clamped {:.5} /hr", slope, ke);
    Ok(ke)
}

pub fn half_life(ke: f64) -> f64 {
    if ke > 0.0 {
        LN_2 / ke
    } else {
        f64::INFINITY
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProfilePoint {
    #[serde(rename = "TIME")]
    pub time_hr: f64,
    #[serde(rename = "CONCENTRATION")]
    pub concentration: f64,
}

#[derive(Debug, Clone)]
pub struct OneCompartmentModel {
    params: PkParameters,
}

impl OneCompartmentModel {
    pub fn new(params: PkParameters) -> Self {
        Self { params }
    }

    fn concentration_in_interval(&self, t: f64, regimen: &DosingRegimen, levels: &PredictedLevels) -> f64 {
        let concentration = if t <= regimen.infusion_hr {
            // Rising limb drawn as a straight line from trough to peak
            levels.trough + (levels.peak - levels.trough) * (t / regimen.infusion_hr)
        } else {
            levels.peak * (-self.params.ke_per_hr * (t - regimen.infusion_hr)).exp()
        };
        concentration.max(0.0)
    }
}

impl PKModel for OneCompartmentModel {
    fn steady_state_levels(&self, regimen: &DosingRegimen) -> PredictedLevels {
        predict_steady_state_levels(
            regimen.dose_mg,
            regimen.interval_hr,
            regimen.infusion_hr,
            self.params.ke_per_hr,
            self.params.vd_l,
        )
    }

    fn concentration_at(&self, time: f64, regimen: &DosingRegimen) -> f64 {
        let levels = self.steady_state_levels(regimen);
        let t = time.rem_euclid(regimen.interval_hr);
        self.concentration_in_interval(t, regimen, &levels)
    }

    fn parameters(&self) -> &PkParameters {
        &self.params
    }
}

/// Steady-state concentration-time curve over one and a half intervals.
pub fn profile<M: PKModel>(model: &M, regimen: &DosingRegimen, n_points: usize) -> Vec<ProfilePoint> {
    if n_points < 2 {
        return Vec::new();
    }

    let span = regimen.interval_hr * 1.5;
    let step = span / (n_points - 1) as f64;

    (0..n_points)
        .map(|i| {
            let time_hr = i as f64 * step;
            ProfilePoint {
                time_hr,
                concentration: model.concentration_at(time_hr, regimen),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParameterSource;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::Uniform;

    fn params(ke: f64, vd: f64) -> PkParameters {
        PkParameters {
            vd_l: vd,
            cl_l_hr: ke * vd,
            ke_per_hr: ke,
            half_life_hr: half_life(ke),
            source: ParameterSource::Population,
        }
    }

    #[test]
    fn test_steady_state_levels() {
        let ke: f64 = 0.1;
        let vd = 50.0;
        let levels = predict_steady_state_levels(1000.0, 12.0, 1.0, ke, vd);

        let term_inf = 1.0 - (-ke).exp();
        let term_tau = 1.0 - (-ke * 12.0).exp();
        let expected_peak = 1000.0 * term_inf / (vd * ke * term_tau);
        assert_relative_eq!(levels.peak, expected_peak, epsilon = 1e-9);
        assert_relative_eq!(levels.trough, expected_peak * (-ke * 11.0).exp(), epsilon = 1e-9);
        assert!(levels.auc.is_none());
    }

    #[test]
    fn test_degenerate_inputs_give_zero_levels() {
        assert!(predict_steady_state_levels(1000.0, 12.0, 0.0, 0.1, 50.0).is_degenerate());
        assert!(predict_steady_state_levels(1000.0, 0.0, 1.0, 0.1, 50.0).is_degenerate());
        assert!(predict_steady_state_levels(1000.0, 12.0, 1.0, 0.0, 50.0).is_degenerate());
        assert!(predict_steady_state_levels(1000.0, 12.0, 1.0, 0.1, 0.0).is_degenerate());
        assert!(predict_steady_state_levels(1000.0, 12.0, 1.0, f64::NAN, 50.0).is_degenerate());
        assert!(predict_steady_state_levels(1000.0, 12.0, 1.0, 1e-12, 50.0).is_degenerate());
    }

    #[test]
    fn test_levels_are_capped() {
        let levels = predict_steady_state_levels(100_000.0, 12.0, 1.0, 0.1, 10.0);
        assert_eq!(levels.peak, PEAK_CEILING);
        assert!(levels.trough <= TROUGH_CEILING);
    }

    #[test]
    fn test_trough_capped_below_peak_ceiling() {
        // slow elimination keeps the trough close to an uncapped peak
        let (ke, vd): (f64, f64) = (0.01, 50.0);
        let dose = crate::dosing::dose_for_target_peak(80.0, 12.0, 1.0, ke, vd);
        let levels = predict_steady_state_levels(dose, 12.0, 1.0, ke, vd);

        assert_relative_eq!(levels.peak, 80.0, max_relative = 1e-9);
        assert!(80.0 * (-ke * 11.0).exp() > TROUGH_CEILING);
        assert_eq!(levels.trough, TROUGH_CEILING);
    }

    #[test]
    fn test_dose_increases_levels() {
        let mut rng = StdRng::seed_from_u64(7);
        let ke_dist = Uniform::new(0.01, 0.3);
        let vd_dist = Uniform::new(10.0, 80.0);

        for _ in 0..200 {
            let ke = rng.sample(ke_dist);
            let vd = rng.sample(vd_dist);
            let low = predict_steady_state_levels(100.0, 12.0, 1.0, ke, vd);
            let high = predict_steady_state_levels(150.0, 12.0, 1.0, ke, vd);
            assert!(high.peak > low.peak, "ke={} vd={}", ke, vd);
            assert!(high.trough > low.trough, "ke={} vd={}", ke, vd);
        }
    }

    #[test]
    fn test_estimate_rate_constant() {
        let ke = estimate_rate_constant(30.0, 1.0, 12.0, 11.0).unwrap();
        assert_relative_eq!(ke, (30.0f64 / 12.0).ln() / 10.0, epsilon = 1e-12);
        assert_relative_eq!(ke, 0.0916, epsilon = 1e-4);
        assert_relative_eq!(half_life(ke), 7.57, epsilon = 0.01);
    }

    #[test]
    fn test_rate_constant_matches_exponential_decay() {
        let mut rng = StdRng::seed_from_u64(11);
        let ke_dist = Uniform::new(0.01, 0.3);
        let dt_dist = Uniform::new(1.0, 20.0);

        for _ in 0..100 {
            let ke_true: f64 = rng.sample(ke_dist);
            let dt = rng.sample(dt_dist);
            let c1 = 25.0;
            let c2 = c1 * (-ke_true * dt).exp();
            let ke = estimate_rate_constant(c1, 2.0, c2, 2.0 + dt).unwrap();
            assert_relative_eq!(ke, ke_true, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_equal_levels_clamp_to_floor() {
        let ke = estimate_rate_constant(10.0, 1.0, 10.0, 9.0).unwrap();
        assert_eq!(ke, KE_MIN);

        let steep = estimate_rate_constant(50.0, 1.0, 0.1, 2.0).unwrap();
        assert_eq!(steep, KE_MAX);
    }

    #[test]
    fn test_invalid_samples() {
        assert!(matches!(estimate_rate_constant(0.0, 1.0, 5.0, 8.0), Err(DosingError::InvalidSample(_))));
        assert!(matches!(estimate_rate_constant(10.0, 1.0, -1.0, 8.0), Err(DosingError::InvalidSample(_))));
        assert!(matches!(estimate_rate_constant(10.0, 8.0, 5.0, 8.0), Err(DosingError::InvalidSample(_))));
        assert!(matches!(estimate_rate_constant(10.0, 9.0, 5.0, 8.0), Err(DosingError::InvalidSample(_))));
    }

    #[test]
    fn test_half_life() {
        assert_relative_eq!(half_life(0.0693), 10.0, epsilon = 0.01);
        assert!(half_life(0.0).is_infinite());
    }

    #[test]
    fn test_profile_follows_steady_state_curve() {
        let model = OneCompartmentModel::new(params(0.1, 50.0));
        let regimen = DosingRegimen::new(1000.0, 12.0, 1.0).unwrap();
        let levels = model.steady_state_levels(&regimen);

        let points = profile(&model, &regimen, 151);
        assert_eq!(points.len(), 151);
        assert_relative_eq!(points[0].concentration, levels.trough, epsilon = 1e-9);
        assert_relative_eq!(points[150].time_hr, 18.0, epsilon = 1e-9);

        assert_relative_eq!(model.concentration_at(1.0, &regimen), levels.peak, epsilon = 1e-9);
        assert_relative_eq!(model.concentration_at(13.0, &regimen), levels.peak, epsilon = 1e-9);
        assert!(points.iter().all(|p| p.concentration >= 0.0));
        assert!(profile(&model, &regimen, 1).is_empty());
    }
}
