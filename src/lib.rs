pub mod assessment;
pub mod config;
pub mod dosing;
pub mod error;
pub mod estimation;
pub mod models;
pub mod output;
pub mod recommend;
pub mod validation;

pub use config::{Config, Drug};
pub use error::{DosingError, DosingResult};
pub use recommend::{
    assess, compute_adjusted_peak_dose, compute_individualized_dose, compute_initial_dose,
    compute_trough_adjusted_dose, InitialTarget,
};
