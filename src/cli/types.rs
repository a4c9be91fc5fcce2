//! CLI type definitions
//!
//! clap command structures for the platform driver's RPC surface (§4.F):
//! everything the Coordinator exposes, plus `serve` to run the daemon.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "platform-driver")]
#[command(about = "Equipment tree, poll scheduler, and reservation/override arbitration for a field-device platform driver", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a YAML config file, bypassing the default project-local paths
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the driver: start every poll scheduler and the reservation/
    /// override tick loop, blocking until interrupted
    Serve,

    /// Read the current value of every point matching a topic glob
    Get {
        /// Topic glob, e.g. "devices/ahu1/*"
        topic: String,
        /// Anchored regex the matched identifier must also satisfy
        #[arg(long, default_value = "")]
        regex: String,
    },

    /// Like `get`, but also reports each point's last-read timestamp
    Last {
        topic: String,
        #[arg(long, default_value = "")]
        regex: String,
    },

    /// Write a value to a point, subject to override/reservation locks
    Set {
        point_id: String,
        /// Value, parsed as JSON (bare numbers/strings/bools/null all work)
        value: String,
        /// Re-read the point after writing and report the actual value
        #[arg(long)]
        confirm: bool,
        /// Task id to present as the writer, for reservation-lock exemption
        #[arg(long)]
        task_id: Option<String>,
    },

    /// Revert a point to its default, subject to the same locks as `set`
    Revert {
        point_id: String,
        #[arg(long)]
        task_id: Option<String>,
    },

    /// Activate every node matching a topic glob
    Start { topic: String },

    /// Deactivate every node matching a topic glob
    Stop { topic: String },

    /// Enable every node matching a topic glob for polling/publication
    Enable { topic: String },

    /// Disable every node matching a topic glob for polling/publication
    Disable { topic: String },

    /// List the children of a topic (or its nearest existing ancestor)
    ListTopics {
        topic: String,
        /// Restrict to children whose `active` flag matches
        #[arg(long)]
        active: Option<bool>,
        /// Restrict to children whose `enabled` flag matches
        #[arg(long)]
        enabled: Option<bool>,
    },

    /// Reservation Manager commands
    #[command(subcommand)]
    Reservation(ReservationCommand),

    /// Override Manager commands
    #[command(subcommand)]
    Override(OverrideCommand),
}

#[derive(Subcommand)]
pub enum ReservationCommand {
    /// Request exclusive write access to one device over a time window
    New {
        agent_id: String,
        task_id: String,
        /// HIGH, LOW_PREEMPT, or LOW
        priority: String,
        /// Device or point identifier to reserve
        device: String,
        /// RFC 3339 start time
        start: String,
        /// RFC 3339 end time
        end: String,
    },

    /// Cancel a previously-made reservation
    Cancel { agent_id: String, task_id: String },
}

#[derive(Subcommand)]
pub enum OverrideCommand {
    /// Block writes to every point matching a glob for a duration. Use
    /// `**` rather than `*` to cover every device/point under a
    /// building or campus, since `*` alone does not cross a `/`
    Set {
        glob: String,
        /// Seconds until the override expires; omit for indefinite
        #[arg(long)]
        duration_secs: Option<f64>,
        /// Immediately revert every matching point to its driver default
        #[arg(long)]
        failsafe_revert: bool,
        /// Spread the failsafe revert across matching points rather than
        /// reverting them all at once
        #[arg(long)]
        staggered_revert: bool,
    },

    /// Clear an active override by its exact glob
    Clear { glob: String },

    /// List every active override
    List,
}
