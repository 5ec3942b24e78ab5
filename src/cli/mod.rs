//! Command line interface
//!
//! Argument parsing and the runner that turns parsed arguments into a sync run.

pub mod args;
pub mod runner;

pub use args::{Cli, Command, SyncArgs};
pub use runner::Runner;
