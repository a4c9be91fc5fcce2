use thiserror::Error;

/// Errors surfaced by the domain and service layers.
///
/// RPC-facing call sites never let a `DomainError` escape past the
/// Coordinator: it is converted into the structured reply shapes the
/// external interface expects before crossing the transport boundary.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("No equipment found for topic: {0}")]
    EquipmentNotFound(String),

    #[error("reservation lock held for device {device}: {detail}")]
    ReservationLock { device: String, detail: String },

    #[error("write blocked by override pattern {pattern}")]
    Override { pattern: String },

    #[error("remote error on point {point}: {detail}")]
    Remote { point: String, detail: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl DomainError {
    /// Structured `{type, value}` shape used by the legacy RPC replies.
    pub fn as_type_value(&self) -> (&'static str, String) {
        match self {
            Self::EquipmentNotFound(_) => ("ValueError", self.to_string()),
            Self::ReservationLock { .. } => ("ReservationLockError", self.to_string()),
            Self::Override { .. } => ("OverrideError", self.to_string()),
            Self::Remote { .. } => ("RemoteError", self.to_string()),
            Self::Configuration(_) => ("ConfigurationError", self.to_string()),
            Self::Transport(_) => ("TransportError", self.to_string()),
            Self::Unknown(_) => ("Unknown", self.to_string()),
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unknown(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unknown(err.to_string())
    }
}

impl From<anyhow::Error> for DomainError {
    fn from(err: anyhow::Error) -> Self {
        Self::Unknown(err.to_string())
    }
}
