use crate::error::DosingResult;
use crate::models::ProfilePoint;
use log::info;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

pub const RECOMMENDATION_FILE: &str = "recommendation.json";
pub const PROFILE_FILE: &str = "profile.csv";

/// Writes the recommendation as JSON and, when present, the concentration
/// profile as CSV into `output_dir`, creating it if needed.
pub fn save_results<T: Serialize, P: AsRef<Path>>(
    report: &T,
    profile: &[ProfilePoint],
    output_dir: P,
) -> DosingResult<()> {
    let output_path = output_dir.as_ref();
    std::fs::create_dir_all(output_path)?;

    save_recommendation(report, output_path.join(RECOMMENDATION_FILE))?;
    if !profile.is_empty() {
        save_profile(profile, output_path.join(PROFILE_FILE))?;
    }

    info!("Results saved to {:?}", output_path);
    Ok(())
}

pub fn save_recommendation<T: Serialize, P: AsRef<Path>>(report: &T, path: P) -> DosingResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

pub fn save_profile<P: AsRef<Path>>(points: &[ProfilePoint], path: P) -> DosingResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for point in points {
        writer.serialize(point)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{profile, DosingRegimen, OneCompartmentModel, ParameterSource, PkParameters};
    use tempfile::tempdir;

    fn points() -> Vec<ProfilePoint> {
        let model = OneCompartmentModel::new(PkParameters {
            vd_l: 49.0,
            cl_l_hr: 3.84,
            ke_per_hr: 3.84 / 49.0,
            half_life_hr: 8.84,
            source: ParameterSource::Population,
        });
        let regimen = DosingRegimen::new(1000.0, 12.0, 1.0).unwrap();
        profile(&model, &regimen, 19)
    }

    #[test]
    fn test_save_results_writes_both_files() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("run");
        let report = serde_json::json!({ "dose_mg": 1000.0, "interval_hr": 12.0 });

        save_results(&report, &points(), &out).unwrap();

        let json = std::fs::read_to_string(out.join(RECOMMENDATION_FILE)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["interval_hr"], 12.0);

        let mut reader = csv::Reader::from_path(out.join(PROFILE_FILE)).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "TIME");
        assert_eq!(&headers[1], "CONCENTRATION");
        assert_eq!(reader.records().count(), 19);
    }

    #[test]
    fn test_empty_profile_is_skipped() {
        let dir = tempdir().unwrap();
        save_results(&serde_json::json!({}), &[], dir.path()).unwrap();

        assert!(dir.path().join(RECOMMENDATION_FILE).exists());
        assert!(!dir.path().join(PROFILE_FILE).exists());
    }
}
