//! CLI command handlers, grouped by the resource they operate on.

pub mod equipment;
pub mod overrides;
pub mod reservation;
pub mod serve;
