use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveTime;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use serde_json::json;
use std::path::PathBuf;

use tdm_dosing::assessment::{assess_levels, ObservedLevels};
use tdm_dosing::config::{Config, Drug, RegimenConfig, RegimenTargets};
use tdm_dosing::models::{
    profile, DosingRegimen, MeasuredSample, OneCompartmentModel, PatientCovariates, PkParameters, ProfilePoint,
};
use tdm_dosing::output::save_results;
use tdm_dosing::recommend::{
    compute_adjusted_peak_dose, compute_individualized_dose, compute_initial_dose,
    compute_trough_adjusted_dose, fall_back_to_population, optimizer_targets, InitialTarget,
};
use tdm_dosing::DosingError;

const PROFILE_POINTS: usize = 61;
const DEFAULT_TARGET_AUC: f64 = 500.0;

#[derive(Parser)]
#[command(name = "tdm_dosing")]
#[command(about = "Aminoglycoside and vancomycin dosing from population estimates and measured levels")]
struct Cli {
    /// Drug configuration file (JSON); built-in tables when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for recommendation.json and profile.csv
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Population-based starting regimen
    Initial(InitialArgs),
    /// Individualized regimen from measured levels
    Adjust(AdjustArgs),
    /// Classify levels against the regimen's targets
    Assess(AssessArgs),
}

#[derive(Args)]
struct DrugArgs {
    #[arg(long)]
    drug: Drug,

    /// Regimen name, e.g. MDD, SDD, empiric
    #[arg(long)]
    regimen: String,
}

#[derive(Args)]
struct PatientArgs {
    /// Body weight (kg)
    #[arg(long)]
    weight: f64,

    /// Creatinine clearance (mL/min)
    #[arg(long)]
    crcl: f64,
}

#[derive(Args)]
struct InitialArgs {
    #[command(flatten)]
    drug: DrugArgs,

    #[command(flatten)]
    patient: PatientArgs,

    /// Dosing interval (hr); the regimen's default when omitted
    #[arg(long)]
    interval: Option<f64>,

    /// Infusion duration (hr)
    #[arg(long, default_value = "1.0")]
    infusion: f64,

    /// Target AUC24 for vancomycin (mg·hr/L)
    #[arg(long)]
    target_auc: Option<f64>,

    /// Target peak for aminoglycosides (mg/L); the regimen's minimum when omitted
    #[arg(long)]
    target_peak: Option<f64>,

    /// Organism MIC (mg/L), raises the peak target to ten times the MIC
    #[arg(long)]
    mic: Option<f64>,
}

#[derive(Args)]
struct AdjustArgs {
    #[command(flatten)]
    drug: DrugArgs,

    #[command(flatten)]
    patient: PatientArgs,

    /// Current dose (mg)
    #[arg(long)]
    dose: f64,

    /// Current interval (hr)
    #[arg(long)]
    interval: f64,

    /// Current infusion duration (hr)
    #[arg(long, default_value = "1.0")]
    infusion: f64,

    /// Measured level as CONCENTRATION@HOURS_FROM_DOSE_START or
    /// CONCENTRATION@HH:MM (needs --dose-time); give the peak first
    #[arg(long = "level", value_parser = parse_level, allow_hyphen_values = true, required = true)]
    levels: Vec<LevelArg>,

    /// Clock time the current dose was started (HH:MM)
    #[arg(long, value_parser = parse_clock)]
    dose_time: Option<NaiveTime>,

    /// Target AUC24 for vancomycin (mg·hr/L)
    #[arg(long)]
    target_auc: Option<f64>,

    /// Desired peak for aminoglycosides (mg/L)
    #[arg(long)]
    desired_peak: Option<f64>,

    /// Desired interval for aminoglycosides (hr); the current one when omitted
    #[arg(long)]
    desired_interval: Option<f64>,

    #[arg(long)]
    mic: Option<f64>,
}

#[derive(Args)]
struct AssessArgs {
    #[command(flatten)]
    drug: DrugArgs,

    #[arg(long)]
    peak: Option<f64>,

    #[arg(long)]
    trough: Option<f64>,

    #[arg(long)]
    auc: Option<f64>,

    #[arg(long)]
    mic: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
enum SampleTime {
    Hours(f64),
    Clock(NaiveTime),
}

#[derive(Debug, Clone, Copy)]
struct LevelArg {
    concentration: f64,
    at: SampleTime,
}

fn parse_clock(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| format!("bad clock time '{}': {}", raw, e))
}

fn parse_level(raw: &str) -> Result<LevelArg, String> {
    let (concentration, time) = raw
        .split_once('@')
        .ok_or_else(|| format!("expected CONCENTRATION@TIME, got '{}'", raw))?;
    let concentration: f64 = concentration
        .trim()
        .parse()
        .map_err(|e| format!("bad concentration '{}': {}", concentration, e))?;
    let at = if time.contains(':') {
        SampleTime::Clock(parse_clock(time)?)
    } else {
        SampleTime::Hours(time.trim().parse().map_err(|e| format!("bad time '{}': {}", time, e))?)
    };
    Ok(LevelArg { concentration, at })
}

fn resolve_levels(levels: &[LevelArg], dose_time: Option<NaiveTime>) -> Result<Vec<MeasuredSample>> {
    levels
        .iter()
        .map(|level| match (level.at, dose_time) {
            (SampleTime::Hours(hours), _) => Ok(MeasuredSample::new(level.concentration, hours)),
            (SampleTime::Clock(drawn_at), Some(dose_start)) => {
                Ok(MeasuredSample::from_clock_times(dose_start, drawn_at, level.concentration))
            }
            (SampleTime::Clock(_), None) => bail!("Levels given as clock times need --dose-time"),
        })
        .collect()
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            let config = Config::from_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))?;
            info!("Loaded configuration from {:?}", path);
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

fn regimen_config<'c>(config: &'c Config, args: &DrugArgs) -> Result<&'c RegimenConfig> {
    Ok(config.drug(args.drug)?.regimen(args.drug, &args.regimen)?)
}

fn patient(args: &PatientArgs) -> Result<PatientCovariates> {
    PatientCovariates::new(args.weight, args.crcl).context("Invalid patient covariates")
}

fn concentration_profile(params: PkParameters, regimen: &DosingRegimen) -> Vec<ProfilePoint> {
    profile(&OneCompartmentModel::new(params), regimen, PROFILE_POINTS)
}

fn run_initial(config: &Config, args: &InitialArgs) -> Result<(serde_json::Value, Vec<ProfilePoint>)> {
    let drug = args.drug.drug;
    let regimen_config = regimen_config(config, &args.drug)?;
    let targets = match args.mic {
        Some(mic) => regimen_config.targets.with_mic(mic),
        None => regimen_config.targets.clone(),
    };
    let patient = patient(&args.patient)?;
    let interval = args.interval.unwrap_or(regimen_config.default_interval_hr);

    let target = if drug.is_aminoglycoside() {
        let peak = args
            .target_peak
            .or(targets.peak.map(|range| range.min))
            .ok_or_else(|| anyhow!("Regimen '{}' has no peak target; pass --target-peak", args.drug.regimen))?;
        InitialTarget::Peak(peak)
    } else {
        InitialTarget::Auc(args.target_auc.unwrap_or(DEFAULT_TARGET_AUC))
    };

    let initial = compute_initial_dose(config, drug, &patient, target, interval, args.infusion)?;
    let (assessments, status) = assess_levels(&ObservedLevels::from(initial.levels), &targets);
    let points = concentration_profile(initial.params, &initial.regimen);

    let report = json!({
        "drug": drug,
        "regimen": regimen_config.display_name,
        "target": target,
        "initial": initial,
        "assessment": assessments,
        "status": status.to_string(),
    });
    Ok((report, points))
}

#[allow(clippy::too_many_arguments)]
fn population_report(
    config: &Config,
    drug: Drug,
    regimen_config: &RegimenConfig,
    targets: &RegimenTargets,
    patient: &PatientCovariates,
    current: &DosingRegimen,
    target: InitialTarget,
    error: DosingError,
) -> Result<(serde_json::Value, Vec<ProfilePoint>)> {
    let fallback = fall_back_to_population(config, drug, patient, current, target, error)
        .context("Individualization from measured levels failed")?;
    for warning in &fallback.initial.validation.warnings {
        warn!("{}", warning);
    }
    let (assessments, status) = assess_levels(&ObservedLevels::from(fallback.initial.levels), targets);
    let points = concentration_profile(fallback.initial.params, &fallback.initial.regimen);

    let report = json!({
        "drug": drug,
        "regimen": regimen_config.display_name,
        "individualized": false,
        "population_fallback": fallback,
        "assessment": assessments,
        "status": status.to_string(),
    });
    Ok((report, points))
}

fn run_adjust(config: &Config, args: &AdjustArgs) -> Result<(serde_json::Value, Vec<ProfilePoint>)> {
    let drug = args.drug.drug;
    let regimen_config = regimen_config(config, &args.drug)?;
    let targets = match args.mic {
        Some(mic) => regimen_config.targets.with_mic(mic),
        None => regimen_config.targets.clone(),
    };
    let patient = patient(&args.patient)?;
    let current = DosingRegimen::new(args.dose, args.interval, args.infusion)?;
    let levels = resolve_levels(&args.levels, args.dose_time)?;

    if drug.is_aminoglycoside() {
        let [peak, trough] = levels.as_slice() else {
            bail!("Aminoglycoside adjustment needs exactly two levels (peak and trough)");
        };
        let desired_peak = args
            .desired_peak
            .or(targets.peak.map(|range| range.min))
            .ok_or_else(|| anyhow!("Regimen '{}' has no peak target; pass --desired-peak", args.drug.regimen))?;
        let desired_interval = args.desired_interval.unwrap_or(current.interval_hr);

        let adjusted = match compute_adjusted_peak_dose(
            config,
            drug,
            &patient,
            &current,
            peak,
            trough,
            desired_peak,
            desired_interval,
        ) {
            Ok(adjusted) => adjusted,
            Err(e) => {
                let target = InitialTarget::Peak(desired_peak);
                return population_report(config, drug, regimen_config, &targets, &patient, &current, target, e);
            }
        };
        let (assessments, status) = assess_levels(&ObservedLevels::from(adjusted.levels), &targets);
        let points = concentration_profile(adjusted.params, &adjusted.regimen);

        let report = json!({
            "drug": drug,
            "regimen": regimen_config.display_name,
            "individualized": true,
            "adjustment": adjusted,
            "assessment": assessments,
            "status": status.to_string(),
        });
        return Ok((report, points));
    }

    let target_auc = args.target_auc.unwrap_or(DEFAULT_TARGET_AUC);
    let optimizer_targets = optimizer_targets(target_auc, &targets)?;
    let outcome = match levels.as_slice() {
        [trough] => compute_trough_adjusted_dose(
            config,
            drug,
            &patient,
            &current,
            trough.concentration,
            &optimizer_targets,
            &config.candidate_intervals_hr,
        ),
        [peak, trough] => compute_individualized_dose(
            config,
            drug,
            &patient,
            &current,
            peak,
            trough,
            &optimizer_targets,
            &config.candidate_intervals_hr,
        ),
        _ => bail!("Expected one or two levels, got {}", levels.len()),
    };
    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            let target = InitialTarget::Auc(target_auc);
            return population_report(config, drug, regimen_config, &targets, &patient, &current, target, e);
        }
    };

    for warning in &result.validation.warnings {
        warn!("{}", warning);
    }
    let recommended = result.recommended_regimen();
    let (assessments, status) = assess_levels(&ObservedLevels::from(result.recommended_levels()), &targets);
    let points = concentration_profile(result.params, &recommended);

    info!(
        "Recommended {} mg q{}h (AUC24 {:.0}, trough {:.1})",
        recommended.dose_mg,
        recommended.interval_hr,
        result.recommended_levels().auc.unwrap_or(0.0),
        result.recommended_levels().trough
    );

    let report = json!({
        "drug": drug,
        "regimen": regimen_config.display_name,
        "target_auc24": target_auc,
        "individualized": true,
        "recommendation": result,
        "assessment": assessments,
        "status": status.to_string(),
    });
    Ok((report, points))
}

fn run_assess(config: &Config, args: &AssessArgs) -> Result<serde_json::Value> {
    let regimen_config = regimen_config(config, &args.drug)?;
    let targets = match args.mic {
        Some(mic) => regimen_config.targets.with_mic(mic),
        None => regimen_config.targets.clone(),
    };
    let levels = ObservedLevels {
        peak: args.peak,
        trough: args.trough,
        auc: args.auc,
    };
    if levels == ObservedLevels::default() {
        bail!("Nothing to assess; pass at least one of --peak, --trough, --auc");
    }

    let (assessments, status) = assess_levels(&levels, &targets);
    Ok(json!({
        "drug": args.drug.drug,
        "regimen": regimen_config.display_name,
        "assessment": assessments,
        "status": status.to_string(),
    }))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    env_logger::Builder::from_default_env().filter_level(level).init();

    let config = load_config(cli.config.as_ref())?;

    let (report, points) = match &cli.command {
        Command::Initial(args) => run_initial(&config, args)?,
        Command::Adjust(args) => run_adjust(&config, args)?,
        Command::Assess(args) => (run_assess(&config, args)?, Vec::new()),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(output) = &cli.output {
        save_results(&report, &points, output)
            .with_context(|| format!("Failed to write results to {:?}", output))?;
    }

    Ok(())
}
