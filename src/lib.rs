//! Platform Driver: equipment tree, poll scheduler, and reservation/
//! override arbitration for a field-device platform driver.
//!
//! The crate is organized hexagonally:
//! - [`domain`] holds the pure types and ports (traits) the rest of the
//!   crate is built against.
//! - [`services`] implements the application logic (Equipment Tree, Poll
//!   Scheduler, Driver Agent, Reservation/Override Managers, Coordinator)
//!   purely in terms of those ports.
//! - [`infrastructure`] wires concrete adapters (SQLite, figment, tracing,
//!   the system clock) to the ports `services` depends on.
//! - [`cli`] is the command-line RPC surface over the Coordinator.

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::DomainError;
pub use infrastructure::database::DatabaseConnection;
pub use services::coordinator::Coordinator;
