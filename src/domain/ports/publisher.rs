use crate::domain::errors::DomainError;
use crate::domain::models::{ErrorInfo, PointValue};
use async_trait::async_trait;
use std::collections::HashMap;

/// Outbound message bus port (§6). Implementations publish onto whatever
/// topic namespace the deployment uses; the domain only knows the three
/// shapes it needs to send.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_point(&self, topic: &str, value: &PointValue) -> Result<(), DomainError>;

    async fn publish_depth_first(
        &self,
        topic: &str,
        values: &HashMap<String, PointValue>,
    ) -> Result<(), DomainError>;

    async fn publish_error(&self, topic: &str, error: &ErrorInfo) -> Result<(), DomainError>;
}
