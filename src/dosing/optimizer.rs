use super::DoseSolver;
use crate::config::{ScoringWeights, TargetRange};
use crate::error::{DosingError, DosingResult};
use crate::models::{auc24, predict_steady_state_levels, DosingRegimen, PkParameters, PredictedLevels};
use log::{debug, info, warn};
use serde::Serialize;

const INTERVAL_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OptimizerTargets {
    pub target_auc24: f64,
    pub auc_range: TargetRange,
    pub trough_range: TargetRange,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CandidateScore {
    pub regimen: DosingRegimen,
    pub levels: PredictedLevels,
    pub auc_score: f64,
    pub trough_score: f64,
    pub renal_score: f64,
    pub practicality_score: f64,
    pub penalty: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimenSelection {
    pub best: CandidateScore,
    pub candidates: Vec<CandidateScore>,
}

impl RegimenSelection {
    pub fn regimen(&self) -> DosingRegimen {
        self.best.regimen
    }

    pub fn levels(&self) -> PredictedLevels {
        self.best.levels
    }
}

/// Searches a fixed list of dosing intervals for the regimen that best meets
/// AUC and trough targets for the given renal function.
pub struct RegimenOptimizer<'a> {
    weights: &'a ScoringWeights,
    solver: DoseSolver<'a>,
}

impl<'a> RegimenOptimizer<'a> {
    pub fn new(weights: &'a ScoringWeights, solver: DoseSolver<'a>) -> Self {
        Self { weights, solver }
    }

    /// Drops intervals too short for the patient's renal function. Never
    /// returns an empty list for a non-empty input.
    pub fn filter_intervals(&self, crcl: f64, candidates: &[f64]) -> Vec<f64> {
        let min_interval = self.weights
            .renal_interval_floors
            .iter()
            .filter(|floor| crcl < floor.crcl_below)
            .min_by(|a, b| a.crcl_below.total_cmp(&b.crcl_below))
            .map(|floor| floor.min_interval_hr)
            .unwrap_or(0.0);

        let filtered: Vec<f64> = candidates
            .iter()
            .copied()
            .filter(|&tau| tau + INTERVAL_EPSILON >= min_interval)
            .collect();

        if filtered.is_empty() {
            warn!(
                "No candidate interval is at least {} hr for CrCl {:.0}; considering all intervals",
                min_interval, crcl
            );
            return candidates.to_vec();
        }
        filtered
    }

    pub fn select(
        &self,
        params: &PkParameters,
        targets: &OptimizerTargets,
        candidates: &[f64],
        infusion: f64,
        crcl: f64,
    ) -> DosingResult<RegimenSelection> {
        if candidates.is_empty() {
            return Err(DosingError::InvalidRegimen("No candidate intervals supplied".to_string()));
        }

        let scored: Vec<CandidateScore> = self
            .filter_intervals(crcl, candidates)
            .into_iter()
            .filter_map(|tau| self.evaluate(params, targets, tau, infusion, crcl))
            .collect();

        let mut best: Option<&CandidateScore> = None;
        for candidate in &scored {
            // strict comparison keeps the earliest candidate on ties
            if best.map_or(true, |b| candidate.total > b.total) {
                best = Some(candidate);
            }
        }

        let best = *best.ok_or_else(|| DosingError::InvalidRegimen(
            format!("Infusion of {} hr does not fit any candidate interval", infusion)
        ))?;

        info!(
            "Selected {} mg q{}h (score {:.2}, AUC24 {:.0}, trough {:.1})",
            best.regimen.dose_mg,
            best.regimen.interval_hr,
            best.total,
            best.levels.auc.unwrap_or(0.0),
            best.levels.trough
        );

        Ok(RegimenSelection { best, candidates: scored })
    }

    fn evaluate(
        &self,
        params: &PkParameters,
        targets: &OptimizerTargets,
        tau: f64,
        infusion: f64,
        crcl: f64,
    ) -> Option<CandidateScore> {
        let dose = self.solver.solve_for_target_auc(targets.target_auc24, params.cl_l_hr, tau);
        let regimen = match DosingRegimen::new(dose, tau, infusion) {
            Ok(regimen) => regimen,
            Err(e) => {
                debug!("Skipping q{}h: {}", tau, e);
                return None;
            }
        };

        let levels = predict_steady_state_levels(dose, tau, infusion, params.ke_per_hr, params.vd_l);
        let auc = auc24(levels.peak, levels.trough, params.ke_per_hr, tau, infusion);
        let levels = levels.with_auc(auc);

        let auc_score = self.auc_score(auc, &targets.auc_range);
        let trough_score = self.trough_score(levels.trough, &targets.trough_range);
        let renal_score = self.renal_score(crcl, tau);
        let practicality_score = self.practicality_score(tau);
        let penalty = self.penalty(auc, levels.trough, targets);

        let w = self.weights;
        let total = w.auc_weight * auc_score
            + w.trough_weight * trough_score
            + w.renal_weight * renal_score
            + w.practicality_weight * practicality_score
            - penalty;

        debug!(
            "q{}h: {} mg, AUC24 {:.0}, trough {:.1} -> auc {:.2} trough {:.2} renal {:.1} \
             practical {:.1} penalty {:.0} total {:.2}",
            tau, dose, auc, levels.trough, auc_score, trough_score, renal_score, practicality_score, penalty, total
        );

        Some(CandidateScore {
            regimen,
            levels,
            auc_score,
            trough_score,
            renal_score,
            practicality_score,
            penalty,
            total,
        })
    }

    /// 0-10, full marks at the middle of the AUC range.
    pub fn auc_score(&self, auc: f64, range: &TargetRange) -> f64 {
        let mid = range.midpoint();
        if mid <= 0.0 {
            return 0.0;
        }
        (10.0 - 20.0 * (auc - mid).abs() / mid).clamp(0.0, 10.0)
    }

    /// 0-10. Above-range troughs lose points faster than below-range ones.
    pub fn trough_score(&self, trough: f64, range: &TargetRange) -> f64 {
        let score = if range.contains(trough) {
            let width = range.width();
            if width > 0.0 {
                10.0 - 5.0 * (2.0 * (trough - range.midpoint()).abs() / width)
            } else {
                10.0
            }
        } else if trough < range.min {
            let deficit = (range.min - trough) / range.min;
            8.0 - 15.0 * deficit
        } else {
            let excess = if range.max > 0.0 { (trough - range.max) / range.max } else { trough };
            7.0 - 15.0 * excess
        };
        score.clamp(0.0, 10.0)
    }

    pub fn renal_score(&self, crcl: f64, tau: f64) -> f64 {
        let band = self.weights
            .renal_bands
            .iter()
            .find(|band| band.crcl_below.map_or(true, |limit| crcl < limit));

        band.and_then(|band| {
            band.scores
                .iter()
                .filter(|entry| entry.interval_hr <= tau + INTERVAL_EPSILON)
                .max_by(|a, b| a.interval_hr.total_cmp(&b.interval_hr))
                .map(|entry| entry.score)
        })
        .unwrap_or(0.0)
    }

    pub fn practicality_score(&self, tau: f64) -> f64 {
        let w = self.weights;
        let listed = |intervals: &[f64]| intervals.iter().any(|&i| (i - tau).abs() < INTERVAL_EPSILON);
        if listed(w.standard_intervals_hr.as_slice()) {
            w.standard_interval_score
        } else if listed(w.common_intervals_hr.as_slice()) {
            w.common_interval_score
        } else {
            w.other_interval_score
        }
    }

    fn penalty(&self, auc: f64, trough: f64, targets: &OptimizerTargets) -> f64 {
        let w = self.weights;
        let mut penalty = 0.0;

        let target = targets.target_auc24;
        if auc < w.auc_penalty_low_fraction * target || auc > w.auc_penalty_high_fraction * target {
            penalty += w.auc_penalty;
        }

        let range = &targets.trough_range;
        if trough < w.trough_penalty_low_fraction * range.min || trough > w.trough_penalty_high_fraction * range.max {
            penalty += w.trough_penalty;
        }

        penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Drug, DrugProfile};
    use crate::models::{half_life, ParameterSource};
    use approx::assert_relative_eq;

    const INTERVALS: [f64; 7] = [6.0, 8.0, 12.0, 24.0, 36.0, 48.0, 72.0];

    fn vancomycin() -> DrugProfile {
        Config::default().drug(Drug::Vancomycin).unwrap().profile.clone()
    }

    fn params(cl: f64, vd: f64) -> PkParameters {
        let ke = cl / vd;
        PkParameters {
            vd_l: vd,
            cl_l_hr: cl,
            ke_per_hr: ke,
            half_life_hr: half_life(ke),
            source: ParameterSource::Population,
        }
    }

    fn targets() -> OptimizerTargets {
        OptimizerTargets {
            target_auc24: 500.0,
            auc_range: TargetRange::new(400.0, 600.0),
            trough_range: TargetRange::new(10.0, 15.0),
        }
    }

    #[test]
    fn test_filter_intervals_by_renal_function() {
        let weights = ScoringWeights::default();
        let profile = vancomycin();
        let optimizer = RegimenOptimizer::new(&weights, DoseSolver::new(&profile, 70.0));

        assert_eq!(optimizer.filter_intervals(10.0, &INTERVALS), vec![24.0, 36.0, 48.0, 72.0]);
        assert_eq!(optimizer.filter_intervals(25.0, &INTERVALS), vec![12.0, 24.0, 36.0, 48.0, 72.0]);
        assert_eq!(optimizer.filter_intervals(45.0, &INTERVALS), vec![8.0, 12.0, 24.0, 36.0, 48.0, 72.0]);
        assert_eq!(optimizer.filter_intervals(90.0, &INTERVALS), INTERVALS.to_vec());
        // nothing long enough: keep everything
        assert_eq!(optimizer.filter_intervals(10.0, &[6.0, 8.0]), vec![6.0, 8.0]);
    }

    #[test]
    fn test_auc_score() {
        let weights = ScoringWeights::default();
        let profile = vancomycin();
        let optimizer = RegimenOptimizer::new(&weights, DoseSolver::new(&profile, 70.0));
        let range = TargetRange::new(400.0, 600.0);

        assert_relative_eq!(optimizer.auc_score(500.0, &range), 10.0);
        assert_relative_eq!(optimizer.auc_score(450.0, &range), 8.0);
        assert_relative_eq!(optimizer.auc_score(1000.0, &range), 0.0);
    }

    #[test]
    fn test_trough_score_penalizes_high_more_than_low() {
        let weights = ScoringWeights::default();
        let profile = vancomycin();
        let optimizer = RegimenOptimizer::new(&weights, DoseSolver::new(&profile, 70.0));
        let range = TargetRange::new(10.0, 15.0);

        assert_relative_eq!(optimizer.trough_score(12.5, &range), 10.0);
        assert_relative_eq!(optimizer.trough_score(15.0, &range), 5.0);
        assert_relative_eq!(optimizer.trough_score(9.0, &range), 8.0 - 1.5, epsilon = 1e-9);
        assert_relative_eq!(optimizer.trough_score(16.5, &range), 7.0 - 1.5, epsilon = 1e-9);
        assert!(optimizer.trough_score(9.0, &range) > optimizer.trough_score(16.5, &range));
        assert_eq!(optimizer.trough_score(40.0, &range), 0.0);
    }

    #[test]
    fn test_renal_and_practicality_scores() {
        let weights = ScoringWeights::default();
        let profile = vancomycin();
        let optimizer = RegimenOptimizer::new(&weights, DoseSolver::new(&profile, 70.0));

        assert_eq!(optimizer.renal_score(10.0, 72.0), 5.0);
        assert_eq!(optimizer.renal_score(10.0, 8.0), 0.0);
        assert_eq!(optimizer.renal_score(90.0, 8.0), 5.0);
        assert_eq!(optimizer.renal_score(90.0, 48.0), 0.0);
        assert_eq!(optimizer.renal_score(45.0, 12.0), 5.0);

        assert_eq!(optimizer.practicality_score(12.0), 5.0);
        assert_eq!(optimizer.practicality_score(36.0), 3.0);
        assert_eq!(optimizer.practicality_score(72.0), 1.0);
    }

    #[test]
    fn test_normal_renal_function_prefers_short_standard_interval() {
        let weights = ScoringWeights::default();
        let profile = vancomycin();
        let optimizer = RegimenOptimizer::new(&weights, DoseSolver::new(&profile, 70.0));
        let pk = params(80.0 * 0.048, 49.0);

        let selection = optimizer.select(&pk, &targets(), &INTERVALS, 1.0, 80.0).unwrap();
        let regimen = selection.regimen();
        assert!(regimen.interval_hr == 8.0 || regimen.interval_hr == 12.0, "q{}h", regimen.interval_hr);
        assert_eq!(regimen.dose_mg % 250.0, 0.0);
        assert_eq!(selection.candidates.len(), INTERVALS.len());
        assert!(selection.levels().auc.is_some());
        assert!(selection.candidates.iter().all(|c| c.total <= selection.best.total));
    }

    #[test]
    fn test_poor_renal_function_uses_long_intervals_only() {
        let weights = ScoringWeights::default();
        let profile = vancomycin();
        let optimizer = RegimenOptimizer::new(&weights, DoseSolver::new(&profile, 70.0));
        let pk = params(10.0 * 0.048, 49.0);

        let selection = optimizer.select(&pk, &targets(), &INTERVALS, 1.0, 10.0).unwrap();
        assert!(selection.regimen().interval_hr >= 24.0);
        assert!(selection.candidates.iter().all(|c| c.regimen.interval_hr >= 24.0));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let weights = ScoringWeights::default();
        let profile = vancomycin();
        let optimizer = RegimenOptimizer::new(&weights, DoseSolver::new(&profile, 70.0));
        let pk = params(3.0, 55.0);

        let first = optimizer.select(&pk, &targets(), &INTERVALS, 1.5, 50.0).unwrap();
        for _ in 0..10 {
            let again = optimizer.select(&pk, &targets(), &INTERVALS, 1.5, 50.0).unwrap();
            assert_eq!(again.regimen(), first.regimen());
            assert_eq!(again.best.total, first.best.total);
        }
    }

    #[test]
    fn test_ties_keep_first_interval() {
        let mut weights = ScoringWeights::default();
        weights.auc_weight = 0.0;
        weights.trough_weight = 0.0;
        weights.renal_weight = 0.0;
        weights.practicality_weight = 0.0;
        weights.auc_penalty = 0.0;
        weights.trough_penalty = 0.0;
        let profile = vancomycin();
        let optimizer = RegimenOptimizer::new(&weights, DoseSolver::new(&profile, 70.0));

        let selection = optimizer.select(&params(4.0, 50.0), &targets(), &[24.0, 12.0, 8.0], 1.0, 90.0).unwrap();
        assert_eq!(selection.regimen().interval_hr, 24.0);
    }

    #[test]
    fn test_rejects_unusable_candidates() {
        let weights = ScoringWeights::default();
        let profile = vancomycin();
        let optimizer = RegimenOptimizer::new(&weights, DoseSolver::new(&profile, 70.0));
        let pk = params(4.0, 50.0);

        assert!(optimizer.select(&pk, &targets(), &[], 1.0, 90.0).is_err());
        assert!(optimizer.select(&pk, &targets(), &[6.0, 8.0], 10.0, 90.0).is_err());
    }
}
