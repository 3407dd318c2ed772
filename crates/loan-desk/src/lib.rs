//! Equipment loan workflow: applicants request equipment, buildings declare availability through
//! time-limited response tokens, and staff allocate the approved quantities across buildings.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
