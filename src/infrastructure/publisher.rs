//! `Publisher` adapter for deployments with no message-bus client wired in
//! (the bus client itself is out of scope, spec §1 Non-goals). Emits every
//! publish as a structured tracing event instead, so the publish matrix
//! (§4.B) is still observable end to end.

use crate::domain::errors::DomainError;
use crate::domain::models::{ErrorInfo, PointValue};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

#[async_trait]
impl crate::domain::ports::Publisher for TracingPublisher {
    async fn publish_point(&self, topic: &str, value: &PointValue) -> Result<(), DomainError> {
        info!(%topic, %value, "publish_point");
        Ok(())
    }

    async fn publish_depth_first(
        &self,
        topic: &str,
        values: &HashMap<String, PointValue>,
    ) -> Result<(), DomainError> {
        info!(%topic, count = values.len(), "publish_depth_first");
        Ok(())
    }

    async fn publish_error(&self, topic: &str, error: &ErrorInfo) -> Result<(), DomainError> {
        info!(%topic, error_type = %error.error_type, "publish_error");
        Ok(())
    }
}
