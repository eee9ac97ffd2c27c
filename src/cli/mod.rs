//! CLI module for the converge deployment tool.
//!
//! This module provides the command-line interface: argument parsing and
//! output formatting. Command execution lives in the binary.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
