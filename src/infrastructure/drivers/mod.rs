//! Device-protocol interface registry and the in-memory fake used for
//! tests and local demos.
//!
//! Concrete wire-protocol interfaces are out of scope (§1 Non-goals): a
//! real deployment plugs them in by registering a factory here, keyed by
//! the `driver_type` string declared in a device's remote config —
//! mirroring the interface-class cache kept by the original driver agent.

pub mod fake;

use crate::domain::ports::DriverInterface;
use std::collections::HashMap;
use std::sync::Arc;

type Factory = Box<dyn Fn(&str) -> Arc<dyn DriverInterface> + Send + Sync>;

/// Maps `driver_type` to a factory that builds a `DriverInterface` for a
/// given remote id. Factories are registered once at startup; lookups
/// happen whenever the Coordinator processes a device config event.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, Factory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver_type: impl Into<String>, factory: Factory) {
        self.factories.insert(driver_type.into(), factory);
    }

    pub fn build(&self, driver_type: &str, remote_id: &str) -> Option<Arc<dyn DriverInterface>> {
        self.factories.get(driver_type).map(|factory| factory(remote_id))
    }
}
