//! CLI interface module
//!
//! This module contains the command-line interface components:
//! - [`types`] — clap command definitions for the Coordinator's RPC surface
//! - [`bootstrap`] — process wiring shared by `serve` and one-shot commands
//! - [`commands`] — per-command handlers
//! - [`display`] — terminal output formatting (tables, colors, detail views)

pub mod bootstrap;
pub mod commands;
pub mod display;
pub mod types;

pub use types::{Cli, Command, OverrideCommand, ReservationCommand};
