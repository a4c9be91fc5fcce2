//! Domain models
//!
//! Pure entities and value types for the Equipment Tree, Poll Scheduler,
//! Reservation Manager, and Override Manager. No I/O lives here.

pub mod config;
pub mod node;
pub mod override_pattern;
pub mod poll_set;
pub mod reservation;
pub mod value;

pub use config::{
    AppConfig, CircuitBreakerConfig, DatabaseConfig, GroupConfig, LoggingConfig,
    PlatformDriverConfig, PublishDefaults, RateLimitConfig, RetryConfig,
};
pub use node::{DeviceRecord, Node, NodeConfig, NodeKind, RegistryPointRecord};
pub use override_pattern::OverridePattern;
pub use poll_set::{cycle_length_from_intervals, PollMember, PollSet, Slot, SlotEntry, SlotPlan};
pub use reservation::{
    DeviceRequest, Priority, Reservation, ReservationOutcome, Task, TaskState, TimeSlice,
};
pub use value::{ErrorInfo, PointMetaData, PointValue};
