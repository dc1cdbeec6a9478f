use crate::config::{RegimenTargets, TargetRange};
use crate::models::PredictedLevels;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trough at or beyond this multiple of its upper target is toxic rather
/// than merely high.
pub const TOXIC_TROUGH_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelKind {
    Peak,
    Trough,
    Auc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Below,
    Within,
    Above,
}

/// Ordered worst first, so the aggregate status is the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    Toxic,
    High,
    Subtherapeutic,
    Therapeutic,
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StatusCategory::Toxic => "potentially toxic",
            StatusCategory::High => "high",
            StatusCategory::Subtherapeutic => "subtherapeutic",
            StatusCategory::Therapeutic => "therapeutic",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelAssessment {
    pub label: LevelKind,
    pub value: f64,
    pub target: TargetRange,
    pub classification: Classification,
}

/// Levels to assess. Any may be missing, e.g. a trough-only draw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedLevels {
    pub peak: Option<f64>,
    pub trough: Option<f64>,
    pub auc: Option<f64>,
}

impl From<PredictedLevels> for ObservedLevels {
    fn from(levels: PredictedLevels) -> Self {
        Self {
            peak: Some(levels.peak),
            trough: Some(levels.trough),
            auc: levels.auc,
        }
    }
}

pub fn classify_value(value: f64, range: &TargetRange) -> Classification {
    if value < range.min {
        Classification::Below
    } else if value > range.max {
        Classification::Above
    } else {
        Classification::Within
    }
}

fn status_for(assessment: &LevelAssessment) -> StatusCategory {
    match (assessment.label, assessment.classification) {
        (_, Classification::Within) => StatusCategory::Therapeutic,
        (LevelKind::Trough, Classification::Above) => {
            if assessment.value >= TOXIC_TROUGH_FACTOR * assessment.target.max {
                StatusCategory::Toxic
            } else {
                StatusCategory::High
            }
        }
        (_, Classification::Above) => StatusCategory::High,
        (_, Classification::Below) => StatusCategory::Subtherapeutic,
    }
}

/// Classifies every level that has both a value and a target, and reduces
/// them to the worst status. A high trough outranks a low peak or AUC.
pub fn assess_levels(levels: &ObservedLevels, targets: &RegimenTargets) -> (Vec<LevelAssessment>, StatusCategory) {
    let pairs = [
        (LevelKind::Peak, levels.peak, targets.peak),
        (LevelKind::Trough, levels.trough, targets.trough),
        (LevelKind::Auc, levels.auc, targets.auc),
    ];

    let assessments: Vec<LevelAssessment> = pairs
        .into_iter()
        .filter_map(|(label, value, target)| {
            let value = value?;
            let target = target?;
            Some(LevelAssessment {
                label,
                value,
                target,
                classification: classify_value(value, &target),
            })
        })
        .collect();

    let status = assessments
        .iter()
        .map(status_for)
        .min()
        .unwrap_or(StatusCategory::Therapeutic);

    (assessments, status)
}
