use crate::config::DrugProfile;
use crate::models::{half_life, ParameterSource, PatientCovariates, PkParameters, CL_MAX, CL_MIN, KE_MAX, KE_MIN};
use log::{debug, warn};

/// Population estimate from weight and renal function. Clearance and ke are
/// held inside their plausible bands rather than rejected.
pub fn population_parameters(profile: &DrugProfile, patient: &PatientCovariates) -> PkParameters {
    let vd = profile.vd_per_kg * patient.weight_kg;

    let raw_cl = patient.crcl_ml_min * profile.clearance_factor;
    let cl = raw_cl.clamp(CL_MIN, CL_MAX);
    if cl != raw_cl {
        warn!("Population clearance {:.2} L/hr held to {:.2} L/hr", raw_cl, cl);
    }

    let raw_ke = if vd > 0.0 { cl / vd } else { 0.01 };
    let ke = raw_ke.clamp(KE_MIN, KE_MAX);
    if ke != raw_ke {
        warn!("Population ke {:.4} /hr held to {:.4} /hr", raw_ke, ke);
    }

    debug!("Population PK: Vd {:.1} L, CL {:.2} L/hr, ke {:.4} /hr", vd, cl, ke);

    PkParameters {
        vd_l: vd,
        cl_l_hr: cl,
        ke_per_hr: ke,
        half_life_hr: half_life(ke),
        source: ParameterSource::Population,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Drug};
    use approx::assert_relative_eq;

    fn profile(drug: Drug) -> DrugProfile {
        Config::default().drug(drug).unwrap().profile.clone()
    }

    #[test]
    fn test_vancomycin_population_parameters() {
        let patient = PatientCovariates::new(70.0, 80.0).unwrap();
        let params = population_parameters(&profile(Drug::Vancomycin), &patient);

        assert_relative_eq!(params.vd_l, 49.0, epsilon = 1e-9);
        assert_relative_eq!(params.cl_l_hr, 80.0 * 0.8 * 60.0 / 1000.0, epsilon = 1e-9);
        assert_relative_eq!(params.ke_per_hr, params.cl_l_hr / 49.0, epsilon = 1e-12);
        assert_relative_eq!(params.half_life_hr, std::f64::consts::LN_2 / params.ke_per_hr, epsilon = 1e-9);
        assert_eq!(params.source, ParameterSource::Population);
    }

    #[test]
    fn test_gentamicin_population_parameters() {
        let patient = PatientCovariates::new(70.0, 80.0).unwrap();
        let params = population_parameters(&profile(Drug::Gentamicin), &patient);

        assert_relative_eq!(params.vd_l, 18.2, epsilon = 1e-9);
        assert_relative_eq!(params.cl_l_hr, 4.0, epsilon = 1e-9);
        assert_relative_eq!(params.ke_per_hr, 4.0 / 18.2, epsilon = 1e-12);
    }

    #[test]
    fn test_clearance_and_ke_are_clamped() {
        let anuric = PatientCovariates::new(70.0, 0.0).unwrap();
        let params = population_parameters(&profile(Drug::Vancomycin), &anuric);
        assert_eq!(params.cl_l_hr, CL_MIN);
        assert_eq!(params.ke_per_hr, KE_MIN);

        let child = PatientCovariates::new(10.0, 150.0).unwrap();
        let params = population_parameters(&profile(Drug::Gentamicin), &child);
        assert_eq!(params.ke_per_hr, KE_MAX);

        let huge = PatientCovariates::new(70.0, 1000.0).unwrap();
        let params = population_parameters(&profile(Drug::Amikacin), &huge);
        assert_eq!(params.cl_l_hr, CL_MAX);
    }
}
