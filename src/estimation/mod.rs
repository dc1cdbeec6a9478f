pub mod individual;
pub mod population;

pub use individual::{from_trough_only, from_two_levels, IndividualEstimate};
pub use population::population_parameters;
