mod startup;
pub mod tasks;

pub use startup::{build_core_pipeline, build_start_pipeline};
