pub mod cli;
pub mod commands;
pub mod engine;
pub mod input;
pub mod logging;

pub use engine::{RunError, RunOptions, RunReport, run_once};
