use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A point's runtime value. Device-protocol interfaces deal in whatever
/// native type the wire protocol produces; once it crosses into the
/// Equipment Tree it is normalized to this representation.
pub type PointValue = JsonValue;

/// Units/type metadata for a point, published alongside `all`-depth samples.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PointMetaData {
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default, rename = "type")]
    pub type_name: Option<String>,
}

/// Per-point failure reported from a batched remote call. Never aborts
/// the batch it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub value: String,
}

impl ErrorInfo {
    pub fn new(error_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            value: value.into(),
        }
    }
}
