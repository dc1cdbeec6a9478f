use thiserror::Error;

#[derive(Error, Debug)]
pub enum DosingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown drug: {0}")]
    UnknownDrug(String),

    #[error("Unknown regimen '{regimen}' for {drug}")]
    UnknownRegimen { drug: String, regimen: String },

    #[error("Invalid dosing regimen: {0}")]
    InvalidRegimen(String),

    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Sample timing error: {0}")]
    Timing(String),

    #[error("Degenerate PK parameters: {0}")]
    DegenerateParameters(String),

    #[error("Parameter validation error: {0}")]
    Validation(String),
}

impl DosingError {
    /// True for failures of the individualization path, where the caller may
    /// fall back to population parameters or request new samples.
    pub fn is_individualization_failure(&self) -> bool {
        matches!(
            self,
            DosingError::InvalidSample(_) | DosingError::Timing(_) | DosingError::DegenerateParameters(_)
        )
    }
}

pub type DosingResult<T> = Result<T, DosingError>;
