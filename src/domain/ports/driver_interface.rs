use crate::domain::errors::DomainError;
use crate::domain::models::{ErrorInfo, PointMetaData, PointValue};
use async_trait::async_trait;
use std::collections::HashMap;

/// One read result for a single point: its value plus any metadata the
/// interface can supply alongside it.
#[derive(Debug, Clone)]
pub struct PointReading {
    pub value: PointValue,
    pub meta_data: Option<PointMetaData>,
}

/// The fixed capability set every device-protocol interface implements
/// (§9). Interface selection is a registry lookup keyed by `driver_type`,
/// not dynamic class loading — see `infrastructure::drivers::DriverRegistry`.
///
/// A `DriverInterface` instance is owned by exactly one `DriverAgent`,
/// which is the only caller allowed to invoke it; the interface itself
/// need not be internally synchronized.
#[async_trait]
pub trait DriverInterface: Send + Sync {
    /// Stable identity used to decide whether two devices share a remote
    /// (`allow_duplicate_remotes`).
    fn unique_remote_id(&self) -> &str;

    async fn get_point(&self, point_id: &str) -> Result<PointReading, DomainError>;

    async fn set_point(&self, point_id: &str, value: &PointValue) -> Result<PointValue, DomainError>;

    async fn revert_point(&self, point_id: &str) -> Result<(), DomainError>;

    /// Batched read. Per-point failures are reported in the second map,
    /// never escalated to fail the whole batch.
    async fn get_multiple_points(
        &self,
        point_ids: &[String],
    ) -> (HashMap<String, PointReading>, HashMap<String, ErrorInfo>);

    /// Batched write. Per-point failures are reported in the returned map.
    async fn set_multiple_points(
        &self,
        pairs: &[(String, PointValue)],
    ) -> HashMap<String, ErrorInfo>;

    /// Write the configured heartbeat point, if the interface has one.
    /// A no-op for interfaces without heartbeat support.
    async fn heartbeat(&self) -> Result<(), DomainError> {
        Ok(())
    }
}
