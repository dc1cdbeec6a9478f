use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use crate::error::{DosingError, DosingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Drug {
    Gentamicin,
    Amikacin,
    Vancomycin,
}

impl Drug {
    pub fn is_aminoglycoside(&self) -> bool {
        matches!(self, Drug::Gentamicin | Drug::Amikacin)
    }
}

impl fmt::Display for Drug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Drug::Gentamicin => "gentamicin",
            Drug::Amikacin => "amikacin",
            Drug::Vancomycin => "vancomycin",
        };
        f.write_str(name)
    }
}

impl FromStr for Drug {
    type Err = DosingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gentamicin" => Ok(Drug::Gentamicin),
            "amikacin" => Ok(Drug::Amikacin),
            "vancomycin" => Ok(Drug::Vancomycin),
            _ => Err(DosingError::UnknownDrug(s.to_string())),
        }
    }
}

/// Population constants for one drug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugProfile {
    pub vd_per_kg: f64,              // L/kg
    pub clearance_factor: f64,       // L/hr per mL/min of CrCl
    pub rounding_increment_mg: f64,
    pub fallback_dose_mg_per_kg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub min: f64,
    pub max: f64,
}

impl TargetRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

impl fmt::Display for TargetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min <= 0.0 {
            write!(f, "<{}", self.max)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegimenTargets {
    pub peak: Option<TargetRange>,
    pub trough: Option<TargetRange>,
    pub auc: Option<TargetRange>,
}

impl RegimenTargets {
    /// Extended-interval dosing aims for a peak of at least ten times the MIC.
    pub fn with_mic(&self, mic: f64) -> Self {
        let mut adjusted = self.clone();
        if let Some(peak) = adjusted.peak.as_mut() {
            let mic_peak = 10.0 * mic;
            if mic_peak > peak.min {
                peak.min = mic_peak;
                peak.max = peak.max.max(mic_peak);
            }
        }
        adjusted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimenConfig {
    pub display_name: String,
    pub default_interval_hr: f64,
    pub targets: RegimenTargets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugConfig {
    pub profile: DrugProfile,
    pub regimens: BTreeMap<String, RegimenConfig>,
}

impl DrugConfig {
    pub fn regimen(&self, drug: Drug, name: &str) -> DosingResult<&RegimenConfig> {
        self.regimens
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, regimen)| regimen)
            .ok_or_else(|| DosingError::UnknownRegimen {
                drug: drug.to_string(),
                regimen: name.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntervalScore {
    pub interval_hr: f64,
    pub score: f64,
}

/// Interval scores for patients whose CrCl is below `crcl_below`
/// (`None` closes the table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenalBand {
    pub crcl_below: Option<f64>,
    pub scores: Vec<IntervalScore>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RenalIntervalFloor {
    pub crcl_below: f64,
    pub min_interval_hr: f64,
}

/// Regimen-scoring constants. All of them are empirical and kept here so they
/// can be recalibrated without touching the optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub auc_weight: f64,
    pub trough_weight: f64,
    pub renal_weight: f64,
    pub practicality_weight: f64,
    pub auc_penalty_low_fraction: f64,
    pub auc_penalty_high_fraction: f64,
    pub auc_penalty: f64,
    pub trough_penalty_low_fraction: f64,
    pub trough_penalty_high_fraction: f64,
    pub trough_penalty: f64,
    pub standard_intervals_hr: Vec<f64>,
    pub common_intervals_hr: Vec<f64>,
    pub standard_interval_score: f64,
    pub common_interval_score: f64,
    pub other_interval_score: f64,
    pub renal_interval_floors: Vec<RenalIntervalFloor>,
    pub renal_bands: Vec<RenalBand>,
}

fn band(crcl_below: Option<f64>, scores: &[(f64, f64)]) -> RenalBand {
    RenalBand {
        crcl_below,
        scores: scores
            .iter()
            .map(|&(interval_hr, score)| IntervalScore { interval_hr, score })
            .collect(),
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            auc_weight: 0.7,
            trough_weight: 1.3,
            renal_weight: 1.0,
            practicality_weight: 1.0,
            auc_penalty_low_fraction: 0.7,
            auc_penalty_high_fraction: 1.3,
            auc_penalty: 10.0,
            trough_penalty_low_fraction: 0.5,
            trough_penalty_high_fraction: 1.5,
            trough_penalty: 15.0,
            standard_intervals_hr: vec![8.0, 12.0, 24.0],
            common_intervals_hr: vec![6.0, 36.0],
            standard_interval_score: 5.0,
            common_interval_score: 3.0,
            other_interval_score: 1.0,
            renal_interval_floors: vec![
                RenalIntervalFloor { crcl_below: 20.0, min_interval_hr: 24.0 },
                RenalIntervalFloor { crcl_below: 30.0, min_interval_hr: 12.0 },
                RenalIntervalFloor { crcl_below: 60.0, min_interval_hr: 8.0 },
            ],
            renal_bands: vec![
                band(Some(20.0), &[(6.0, 0.0), (8.0, 0.0), (12.0, 0.0), (24.0, 3.0), (36.0, 4.0), (48.0, 5.0)]),
                band(Some(30.0), &[(6.0, 0.0), (8.0, 0.0), (12.0, 2.0), (24.0, 5.0), (36.0, 4.0), (48.0, 3.0)]),
                band(Some(60.0), &[(6.0, 1.0), (8.0, 3.0), (12.0, 5.0), (24.0, 4.0), (36.0, 2.0), (48.0, 1.0)]),
                band(None, &[(6.0, 4.0), (8.0, 5.0), (12.0, 5.0), (24.0, 3.0), (36.0, 1.0), (48.0, 0.0)]),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub drugs: BTreeMap<Drug, DrugConfig>,
    pub candidate_intervals_hr: Vec<f64>,
    #[serde(default)]
    pub scoring: ScoringWeights,
}

fn regimen(display_name: &str, default_interval_hr: f64, targets: RegimenTargets) -> RegimenConfig {
    RegimenConfig {
        display_name: display_name.to_string(),
        default_interval_hr,
        targets,
    }
}

fn targets(peak: Option<(f64, f64)>, trough: (f64, f64), auc: Option<(f64, f64)>) -> RegimenTargets {
    RegimenTargets {
        peak: peak.map(|(min, max)| TargetRange::new(min, max)),
        trough: Some(TargetRange::new(trough.0, trough.1)),
        auc: auc.map(|(min, max)| TargetRange::new(min, max)),
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut drugs = BTreeMap::new();

        let mut gentamicin = BTreeMap::new();
        gentamicin.insert(
            "MDD".to_string(),
            regimen("Traditional (Multiple Daily - MDD)", 8.0, targets(Some((5.0, 10.0)), (0.0, 2.0), None)),
        );
        gentamicin.insert(
            "SDD".to_string(),
            regimen("Extended Interval (Once Daily - SDD)", 24.0, targets(Some((15.0, 30.0)), (0.0, 1.0), None)),
        );
        gentamicin.insert(
            "Synergy".to_string(),
            regimen("Synergy (e.g., Endocarditis)", 12.0, targets(Some((3.0, 5.0)), (0.0, 1.0), None)),
        );
        gentamicin.insert(
            "Hemodialysis".to_string(),
            regimen("Hemodialysis", 48.0, targets(None, (0.0, 2.0), None)),
        );
        drugs.insert(Drug::Gentamicin, DrugConfig {
            profile: DrugProfile {
                vd_per_kg: 0.26,
                clearance_factor: 0.05,
                rounding_increment_mg: 20.0,
                fallback_dose_mg_per_kg: 5.0,
            },
            regimens: gentamicin,
        });

        let mut amikacin = BTreeMap::new();
        amikacin.insert(
            "MDD".to_string(),
            regimen("Traditional (Multiple Daily - MDD)", 8.0, targets(Some((20.0, 30.0)), (0.0, 10.0), None)),
        );
        amikacin.insert(
            "SDD".to_string(),
            regimen("Extended Interval (Once Daily - SDD)", 24.0, targets(Some((50.0, 70.0)), (0.0, 5.0), None)),
        );
        drugs.insert(Drug::Amikacin, DrugConfig {
            profile: DrugProfile {
                vd_per_kg: 0.3,
                clearance_factor: 0.06,
                rounding_increment_mg: 50.0,
                fallback_dose_mg_per_kg: 5.0,
            },
            regimens: amikacin,
        });

        let mut vancomycin = BTreeMap::new();
        vancomycin.insert(
            "empiric".to_string(),
            regimen("Empiric Therapy", 12.0, targets(Some((20.0, 30.0)), (10.0, 15.0), Some((400.0, 600.0)))),
        );
        vancomycin.insert(
            "definitive".to_string(),
            regimen("Definitive Therapy", 12.0, targets(Some((25.0, 40.0)), (15.0, 20.0), Some((400.0, 600.0)))),
        );
        drugs.insert(Drug::Vancomycin, DrugConfig {
            profile: DrugProfile {
                vd_per_kg: 0.7,
                // 0.8 of CrCl, mL/min -> L/hr
                clearance_factor: 0.8 * 60.0 / 1000.0,
                rounding_increment_mg: 250.0,
                fallback_dose_mg_per_kg: 15.0,
            },
            regimens: vancomycin,
        });

        Self {
            drugs,
            candidate_intervals_hr: vec![6.0, 8.0, 12.0, 24.0, 36.0, 48.0, 72.0],
            scoring: ScoringWeights::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> DosingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn drug(&self, drug: Drug) -> DosingResult<&DrugConfig> {
        self.drugs
            .get(&drug)
            .ok_or_else(|| DosingError::UnknownDrug(drug.to_string()))
    }

    pub fn validate(&self) -> DosingResult<()> {
        if self.drugs.is_empty() {
            return Err(DosingError::InvalidConfig(
                "At least one drug must be configured".to_string()
            ));
        }

        for (drug, drug_config) in &self.drugs {
            Self::validate_profile(*drug, &drug_config.profile)?;

            for (name, regimen) in &drug_config.regimens {
                if regimen.default_interval_hr <= 0.0 {
                    return Err(DosingError::InvalidConfig(
                        format!("{} {}: default interval must be positive", drug, name)
                    ));
                }
                let ranges = [
                    ("peak", regimen.targets.peak),
                    ("trough", regimen.targets.trough),
                    ("AUC", regimen.targets.auc),
                ];
                for (label, range) in ranges {
                    if let Some(range) = range {
                        if range.min < 0.0 || range.max < range.min {
                            return Err(DosingError::InvalidConfig(
                                format!(
                                    "{} {}: {} target range {}-{} is not ordered",
                                    drug, name, label, range.min, range.max
                                )
                            ));
                        }
                    }
                }
            }
        }

        if self.candidate_intervals_hr.is_empty() {
            return Err(DosingError::InvalidConfig(
                "At least one candidate interval must be specified".to_string()
            ));
        }
        if self.candidate_intervals_hr.iter().any(|&tau| tau <= 0.0) {
            return Err(DosingError::InvalidConfig(
                "Candidate intervals must be positive".to_string()
            ));
        }

        let weights = &self.scoring;
        if [weights.auc_weight, weights.trough_weight, weights.renal_weight, weights.practicality_weight]
            .iter()
            .any(|&w| w < 0.0)
        {
            return Err(DosingError::InvalidConfig(
                "Scoring weights must not be negative".to_string()
            ));
        }
        if weights.renal_bands.last().map_or(true, |b| b.crcl_below.is_some()) {
            return Err(DosingError::InvalidConfig(
                "The last renal band must have no upper CrCl bound".to_string()
            ));
        }

        Ok(())
    }

    fn validate_profile(drug: Drug, profile: &DrugProfile) -> DosingResult<()> {
        let fields = [
            ("vd_per_kg", profile.vd_per_kg),
            ("clearance_factor", profile.clearance_factor),
            ("rounding_increment_mg", profile.rounding_increment_mg),
            ("fallback_dose_mg_per_kg", profile.fallback_dose_mg_per_kg),
        ];
        for (name, value) in fields {
            if value <= 0.0 {
                return Err(DosingError::InvalidConfig(
                    format!("{}: {} must be positive", drug, name)
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.drugs.len(), 3);
        assert_eq!(config.candidate_intervals_hr.len(), 7);
    }

    #[test]
    fn test_regimen_lookup_ignores_case() {
        let config = Config::default();
        let vanco = config.drug(Drug::Vancomycin).unwrap();
        let empiric = vanco.regimen(Drug::Vancomycin, "EMPIRIC").unwrap();
        assert_eq!(empiric.targets.trough, Some(TargetRange::new(10.0, 15.0)));

        let missing = vanco.regimen(Drug::Vancomycin, "SDD");
        assert!(matches!(missing, Err(DosingError::UnknownRegimen { .. })));
    }

    #[test]
    fn test_mic_raises_peak_target_without_mutating_table() {
        let config = Config::default();
        let sdd = config.drug(Drug::Gentamicin).unwrap()
            .regimen(Drug::Gentamicin, "SDD").unwrap();

        let adjusted = sdd.targets.with_mic(2.0);
        assert_eq!(adjusted.peak.unwrap().min, 20.0);
        assert_eq!(sdd.targets.peak.unwrap().min, 15.0);

        let unchanged = sdd.targets.with_mic(1.0);
        assert_eq!(unchanged.peak.unwrap().min, 15.0);
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.drug(Drug::Amikacin).unwrap().profile.rounding_increment_mg, 50.0);
    }

    #[test]
    fn test_rejects_non_positive_profile() {
        let mut config = Config::default();
        config.drugs.get_mut(&Drug::Gentamicin).unwrap().profile.vd_per_kg = 0.0;
        assert!(matches!(config.validate(), Err(DosingError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_inverted_target_range() {
        let mut config = Config::default();
        config.drugs.get_mut(&Drug::Vancomycin).unwrap()
            .regimens.get_mut("empiric").unwrap()
            .targets.trough = Some(TargetRange::new(15.0, 10.0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_drug_parsing() {
        assert_eq!("Vancomycin".parse::<Drug>().unwrap(), Drug::Vancomycin);
        assert!("tobramycin".parse::<Drug>().is_err());
        assert!(Drug::Amikacin.is_aminoglycoside());
    }

    #[test]
    fn test_target_range_helpers() {
        let range = TargetRange::new(10.0, 15.0);
        assert!(range.contains(10.0));
        assert!(!range.contains(15.1));
        assert_eq!(range.midpoint(), 12.5);
        assert_eq!(range.width(), 5.0);
        assert_eq!(TargetRange::new(0.0, 2.0).to_string(), "<2");
    }
}
