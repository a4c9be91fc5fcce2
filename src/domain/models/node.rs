use super::value::{PointMetaData, PointValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One of the three node kinds in the Equipment Tree namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Segment,
    Device,
    Point,
}

/// Declarative, per-node configuration. Unset fields are resolved by
/// walking up to the nearest ancestor that sets them (§4.A inheritance);
/// the *effective* value is cached on the node by the Equipment Tree at
/// mutation time rather than re-walked on every read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    pub polling_interval: Option<f64>,
    pub stale_timeout: Option<f64>,
    pub publish_single_depth: Option<bool>,
    pub publish_single_breadth: Option<bool>,
    pub publish_all_depth: Option<bool>,
    pub publish_all_breadth: Option<bool>,
    pub publish_multi_depth: Option<bool>,
    pub publish_multi_breadth: Option<bool>,
    pub all_publish_interval: Option<f64>,
    pub timezone: Option<String>,
    pub allow_no_lock_write: Option<bool>,
    pub group: Option<String>,
    pub driver_type: Option<String>,
}

impl NodeConfig {
    /// Merge `self` over `parent`: any field unset here inherits `parent`'s
    /// resolved value.
    pub fn resolve(&self, parent: &NodeConfig) -> NodeConfig {
        NodeConfig {
            polling_interval: self.polling_interval.or(parent.polling_interval),
            stale_timeout: self.stale_timeout.or(parent.stale_timeout),
            publish_single_depth: self.publish_single_depth.or(parent.publish_single_depth),
            publish_single_breadth: self
                .publish_single_breadth
                .or(parent.publish_single_breadth),
            publish_all_depth: self.publish_all_depth.or(parent.publish_all_depth),
            publish_all_breadth: self.publish_all_breadth.or(parent.publish_all_breadth),
            publish_multi_depth: self.publish_multi_depth.or(parent.publish_multi_depth),
            publish_multi_breadth: self.publish_multi_breadth.or(parent.publish_multi_breadth),
            all_publish_interval: self.all_publish_interval.or(parent.all_publish_interval),
            timezone: self.timezone.clone().or_else(|| parent.timezone.clone()),
            allow_no_lock_write: self.allow_no_lock_write.or(parent.allow_no_lock_write),
            group: self.group.clone().or_else(|| parent.group.clone()),
            driver_type: self.driver_type.clone().or_else(|| parent.driver_type.clone()),
        }
    }
}

/// One point entry in a device's registry, as persisted in an
/// `equipment_config` row (§10.5). Mirrors `services::equipment_tree::RegistryPoint`
/// one level down in the hex layering, so the config-store adapter never
/// has to depend on the service layer to describe what it stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryPointRecord {
    pub name: String,
    pub config: NodeConfig,
    /// Mirrors `Node::enabled`; persisted so `enable`/`disable` survive a
    /// restart (§4.F — "persists the change to the configuration store").
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// The persisted shape of one device's declared config and point
/// registry, stored as `equipment_config.config_json` keyed by
/// `device_id` (§10.5). `driver_type` selects the `DriverInterface`
/// factory from `infrastructure::drivers::DriverRegistry` at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub path: String,
    pub dev_config: NodeConfig,
    pub remote_id: String,
    pub driver_type: String,
    pub registry: Vec<RegistryPointRecord>,
}

/// A node in the Equipment Tree: a segment, device, or point, addressed
/// by an absolute `/`-separated identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub identifier: String,
    pub kind: NodeKind,
    /// Config as declared on this node (pre-inheritance).
    pub declared_config: NodeConfig,
    /// Config after inheritance resolution, cached at mutation time.
    pub effective_config: NodeConfig,
    pub active: bool,
    pub enabled: bool,
    pub children: BTreeSet<String>,

    // Point-only fields.
    pub last_value: Option<PointValue>,
    pub last_updated: Option<DateTime<Utc>>,
    pub meta_data: Option<PointMetaData>,

    // Device-only fields.
    pub remote_id: Option<String>,
    pub last_all_publish: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new_segment(identifier: impl Into<String>, config: NodeConfig) -> Self {
        Self::new(identifier, NodeKind::Segment, config)
    }

    pub fn new_device(identifier: impl Into<String>, config: NodeConfig, remote_id: String) -> Self {
        let mut node = Self::new(identifier, NodeKind::Device, config);
        node.remote_id = Some(remote_id);
        node
    }

    pub fn new_point(identifier: impl Into<String>, config: NodeConfig) -> Self {
        Self::new(identifier, NodeKind::Point, config)
    }

    fn new(identifier: impl Into<String>, kind: NodeKind, config: NodeConfig) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            declared_config: config.clone(),
            effective_config: config,
            active: true,
            enabled: true,
            children: BTreeSet::new(),
            last_value: None,
            last_updated: None,
            meta_data: None,
            remote_id: None,
            last_all_publish: None,
        }
    }

    pub fn parent_identifier(&self) -> Option<&str> {
        self.identifier.rsplit_once('/').map(|(parent, _)| parent)
    }

    pub fn leaf_name(&self) -> &str {
        self.identifier
            .rsplit_once('/')
            .map_or(self.identifier.as_str(), |(_, name)| name)
    }

    /// A point is stale if `now - last_updated > stale_timeout`. A point
    /// that has never been read is considered stale.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_timeout_secs: f64) -> bool {
        match self.last_updated {
            None => true,
            Some(last_updated) => {
                let age = (now - last_updated).num_milliseconds() as f64 / 1000.0;
                age > stale_timeout_secs
            }
        }
    }

    pub fn record_read(&mut self, value: PointValue, meta: Option<PointMetaData>, at: DateTime<Utc>) {
        self.last_value = Some(value);
        if meta.is_some() {
            self.meta_data = meta;
        }
        self.last_updated = Some(at);
    }
}
