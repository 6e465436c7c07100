//! TDF CLI support
//!
//! Simulation of a flaky detector against the fallback chain, and report
//! rendering for the `tdf` binary.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod report;
pub mod simulate;

pub use report::{presets_json, presets_text, SimulationReport};
pub use simulate::{resolve_config, run_simulation, SimulatedDetector, SimulationConfig, CORPUS};
