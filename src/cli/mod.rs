//! CLI command implementations

pub mod doctor;
pub mod engines;
pub mod run;
