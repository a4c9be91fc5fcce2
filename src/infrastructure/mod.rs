//! Infrastructure layer
//!
//! Adapters implementing the domain ports:
//! - `database` — SQLite `ConfigStore` (sqlx, WAL mode)
//! - `config` — layered YAML/env configuration loading (figment)
//! - `logging` — structured tracing setup, audit trail, secret scrubbing
//! - `clock` — system and fake time sources
//! - `drivers` — the `DriverInterface` registry and its in-memory fake
//! - `publisher` — outbound `Publisher` adapters

pub mod clock;
pub mod config;
pub mod database;
pub mod drivers;
pub mod logging;
pub mod publisher;

pub use clock::SystemClock;
pub use database::DatabaseConnection;
pub use publisher::TracingPublisher;
