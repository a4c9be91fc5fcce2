//! Equipment Tree: the hierarchical namespace of segments, devices, and
//! points (spec §4.A).
//!
//! The tree owns every [`Node`] by its absolute identifier and is the only
//! place structural mutation happens; the owning Driver Agent updates
//! runtime fields (`last_value`/`last_updated`/`meta_data`) on point nodes
//! it polls, but never adds or removes nodes itself.

use crate::domain::errors::DomainError;
use crate::domain::models::{Node, NodeConfig, NodeKind};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;

/// One point definition out of a device's registry, as handed to
/// `add_device`.
#[derive(Debug, Clone)]
pub struct RegistryPoint {
    pub name: String,
    pub config: NodeConfig,
    pub enabled: bool,
}

impl RegistryPoint {
    /// Convenience constructor for call sites that don't carry a
    /// persisted `enabled` flag (tests, fresh registry entries).
    pub fn new(name: impl Into<String>, config: NodeConfig) -> Self {
        Self { name: name.into(), config, enabled: true }
    }
}

#[derive(Default)]
pub struct EquipmentTree {
    nodes: BTreeMap<String, Node>,
}

impl EquipmentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_node(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    fn get_node_mut(&mut self, path: &str) -> Option<&mut Node> {
        self.nodes.get_mut(path)
    }

    /// Walk up from `path` resolving inherited config, starting from
    /// `parent_effective` (the nearest ancestor's already-resolved config).
    fn resolve_effective(&self, declared: &NodeConfig, parent: Option<&str>) -> NodeConfig {
        match parent.and_then(|p| self.nodes.get(p)) {
            Some(parent_node) => declared.resolve(&parent_node.effective_config),
            None => declared.clone(),
        }
    }

    /// Recompute `effective_config` for `path` and every descendant,
    /// bottom-down, after a declared-config change.
    fn recompute_effective_subtree(&mut self, path: &str) {
        let Some(node) = self.nodes.get(path) else {
            return;
        };
        let parent = node.parent_identifier().map(str::to_string);
        let declared = node.declared_config.clone();
        let effective = self.resolve_effective(&declared, parent.as_deref());
        let children: Vec<String> = self.nodes.get(path).map(|n| n.children.iter().cloned().collect()).unwrap_or_default();

        if let Some(node) = self.nodes.get_mut(path) {
            node.effective_config = effective;
        }
        for child in children {
            self.recompute_effective_subtree(&child);
        }
    }

    /// Create intermediate segments as needed for `path`. Idempotent if the
    /// declared config at `path` is unchanged; otherwise updates it in place
    /// and recomputes inherited config for the whole subtree.
    pub fn add_segment(&mut self, path: &str, config: NodeConfig) -> Result<(), DomainError> {
        self.ensure_ancestors(path)?;

        let changed = match self.nodes.get(path) {
            Some(existing) if existing.kind != NodeKind::Segment => {
                return Err(DomainError::Configuration(format!(
                    "{path} already exists as a non-segment node"
                )));
            }
            Some(existing) => !config_eq(&existing.declared_config, &config),
            None => true,
        };

        if !self.nodes.contains_key(path) {
            let node = Node::new_segment(path, config);
            self.link_into_parent(path);
            self.nodes.insert(path.to_string(), node);
            self.recompute_effective_subtree(path);
        } else if changed {
            if let Some(node) = self.nodes.get_mut(path) {
                node.declared_config = config;
            }
            self.recompute_effective_subtree(path);
        }

        Ok(())
    }

    /// Create every ancestor segment of `path` that does not yet exist,
    /// with an empty (fully-inherited) config.
    fn ensure_ancestors(&mut self, path: &str) -> Result<(), DomainError> {
        if let Some((parent, _)) = path.rsplit_once('/') {
            if !self.nodes.contains_key(parent) {
                self.add_segment(parent, NodeConfig::default())?;
            }
        }
        Ok(())
    }

    fn link_into_parent(&mut self, path: &str) {
        if let Some((parent, _)) = path.rsplit_once('/') {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.insert(path.to_string());
            }
        }
    }

    /// Creates the device node and instantiates its point children from
    /// `registry`. Rolls back (leaves the tree exactly as it was) if any
    /// registry entry fails validation.
    pub fn add_device(
        &mut self,
        path: &str,
        dev_config: NodeConfig,
        remote_id: String,
        registry: &[RegistryPoint],
    ) -> Result<(), DomainError> {
        validate_registry(registry)?;

        let snapshot = self.nodes.clone();
        let result = self.add_device_inner(path, dev_config, remote_id, registry);
        if result.is_err() {
            self.nodes = snapshot;
        }
        result
    }

    fn add_device_inner(
        &mut self,
        path: &str,
        dev_config: NodeConfig,
        remote_id: String,
        registry: &[RegistryPoint],
    ) -> Result<(), DomainError> {
        self.ensure_ancestors(path)?;

        if let Some(existing) = self.nodes.get(path) {
            if existing.kind != NodeKind::Device {
                return Err(DomainError::Configuration(format!(
                    "{path} already exists as a non-device node"
                )));
            }
        }

        let node = Node::new_device(path, dev_config, remote_id);
        self.link_into_parent(path);
        self.nodes.insert(path.to_string(), node);
        self.recompute_effective_subtree(path);

        for point in registry {
            let point_path = format!("{path}/{}", point.name);
            let mut point_node = Node::new_point(&point_path, point.config.clone());
            point_node.enabled = point.enabled;
            self.link_into_parent(&point_path);
            self.nodes.insert(point_path.clone(), point_node);
            self.recompute_effective_subtree(&point_path);
        }

        Ok(())
    }

    /// Reconciles an existing device against new config/registry. Returns
    /// `true` if any scheduling-relevant field changed (polling interval,
    /// active flag, point set), `false` if the update was a no-op for the
    /// scheduler. Only rebuilds the subtree (discarding runtime fields)
    /// when the point set or polling interval actually changed; otherwise
    /// patches `declared_config`/`effective_config` in place and leaves
    /// existing point nodes — and their `last_value`/`last_updated`/
    /// `meta_data` — untouched, since those are owned by the Driver Agent
    /// (§4.A Lifecycle), not by config reconciliation.
    pub fn update_equipment(
        &mut self,
        path: &str,
        dev_config: NodeConfig,
        remote_id: String,
        registry: &[RegistryPoint],
    ) -> Result<bool, DomainError> {
        validate_registry(registry)?;

        let Some(existing) = self.nodes.get(path) else {
            self.add_device(path, dev_config, remote_id, registry)?;
            return Ok(true);
        };

        let interval_changed = existing.declared_config.polling_interval != dev_config.polling_interval;
        let active_changed = false; // `active` is toggled via start/stop, not config updates.
        let old_points: Vec<String> = existing
            .children
            .iter()
            .filter(|c| self.nodes.get(*c).is_some_and(|n| n.kind == NodeKind::Point))
            .cloned()
            .collect();
        let new_point_names: Vec<String> = registry.iter().map(|p| format!("{path}/{}", p.name)).collect();
        let points_changed = {
            let mut old_sorted = old_points.clone();
            old_sorted.sort();
            let mut new_sorted = new_point_names.clone();
            new_sorted.sort();
            old_sorted != new_sorted
        };

        if !(interval_changed || points_changed) {
            if let Some(node) = self.nodes.get_mut(path) {
                node.declared_config = dev_config;
                node.remote_id = Some(remote_id);
            }
            for point in registry {
                let point_path = format!("{path}/{}", point.name);
                if let Some(node) = self.nodes.get_mut(&point_path) {
                    node.declared_config = point.config.clone();
                    node.enabled = point.enabled;
                }
            }
            self.recompute_effective_subtree(path);
            return Ok(active_changed);
        }

        let snapshot = self.nodes.clone();
        let result = (|| -> Result<(), DomainError> {
            self.remove_subtree(path);
            self.add_device_inner(path, dev_config, remote_id, registry)
        })();
        if result.is_err() {
            self.nodes = snapshot;
            return result.map(|()| false);
        }

        Ok(interval_changed || active_changed || points_changed)
    }

    /// Removes `path` and every descendant. Returns the number of `point`
    /// nodes removed.
    pub fn remove_segment(&mut self, path: &str) -> usize {
        let removed = self.remove_subtree(path);
        if let Some((parent, _)) = path.rsplit_once('/') {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.remove(path);
            }
        }
        removed
    }

    fn remove_subtree(&mut self, path: &str) -> usize {
        let Some(node) = self.nodes.get(path) else {
            return 0;
        };
        let kind = node.kind;
        let children: Vec<String> = node.children.iter().cloned().collect();

        let mut removed = usize::from(kind == NodeKind::Point);
        for child in children {
            removed += self.remove_subtree(&child);
        }
        self.nodes.remove(path);
        removed
    }

    pub fn children(&self, path: &str) -> Vec<&Node> {
        self.nodes
            .get(path)
            .into_iter()
            .flat_map(|node| node.children.iter())
            .filter_map(|child| self.nodes.get(child))
            .collect()
    }

    pub fn points(&self, path: &str) -> Vec<&Node> {
        self.descendants(path)
            .into_iter()
            .filter(|n| n.kind == NodeKind::Point)
            .collect()
    }

    pub fn devices(&self, path: &str) -> Vec<&Node> {
        self.descendants(path)
            .into_iter()
            .filter(|n| n.kind == NodeKind::Device)
            .collect()
    }

    fn descendants(&self, path: &str) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut stack = vec![path.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                if current != path {
                    out.push(node);
                }
                stack.extend(node.children.iter().cloned());
            }
        }
        out
    }

    /// Union-match of a shell-style `topic_glob` and an anchored `regex`
    /// against every point identifier. Either may be empty to skip it.
    pub fn find_points(&self, topic_glob: &str, regex: &str) -> Result<Vec<&Node>, DomainError> {
        let compiled_regex = if regex.is_empty() {
            None
        } else {
            Some(Regex::new(regex).map_err(|e| DomainError::Configuration(format!("invalid regex: {e}")))?)
        };

        Ok(self
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::Point)
            .filter(|n| {
                let glob_hit = !topic_glob.is_empty() && glob_match::glob_match(topic_glob, &n.identifier);
                let regex_hit = compiled_regex
                    .as_ref()
                    .is_some_and(|re| re.is_match(&n.identifier));
                glob_hit || regex_hit
            })
            .collect())
    }

    /// The owning device's remote id for a point, by walking up to the
    /// nearest ancestor `device` node.
    pub fn get_remote(&self, point_id: &str) -> Result<&str, DomainError> {
        let mut current = self.nodes.get(point_id);
        while let Some(node) = current {
            if node.kind == NodeKind::Device {
                return node
                    .remote_id
                    .as_deref()
                    .ok_or_else(|| DomainError::EquipmentNotFound(point_id.to_string()));
            }
            current = node.parent_identifier().and_then(|p| self.nodes.get(p));
        }
        Err(DomainError::EquipmentNotFound(point_id.to_string()))
    }

    pub fn get_group(&self, point_id: &str) -> Result<String, DomainError> {
        self.nodes
            .get(point_id)
            .map(|n| n.effective_config.group.clone().unwrap_or_else(|| "default".to_string()))
            .ok_or_else(|| DomainError::EquipmentNotFound(point_id.to_string()))
    }

    /// A device is ready once every active point beneath it has had at
    /// least one successful read.
    pub fn is_ready(&self, device_id: &str) -> bool {
        self.points(device_id)
            .iter()
            .filter(|p| p.active)
            .all(|p| p.last_updated.is_some())
    }

    pub fn is_stale(&self, point_id: &str, now: DateTime<Utc>) -> bool {
        let Some(node) = self.nodes.get(point_id) else {
            return true;
        };
        let stale_timeout = node.effective_config.stale_timeout.unwrap_or(f64::MAX);
        node.is_stale(now, stale_timeout)
    }

    pub fn is_published_all_depth(&self, device_id: &str) -> bool {
        self.nodes
            .get(device_id)
            .is_some_and(|n| n.effective_config.publish_all_depth.unwrap_or(false))
    }

    pub fn is_published_all_breadth(&self, device_id: &str) -> bool {
        self.nodes
            .get(device_id)
            .is_some_and(|n| n.effective_config.publish_all_breadth.unwrap_or(false))
    }

    pub fn is_published_single_depth(&self, point_id: &str) -> bool {
        self.nodes
            .get(point_id)
            .is_some_and(|n| n.effective_config.publish_single_depth.unwrap_or(false))
    }

    pub fn is_published_single_breadth(&self, point_id: &str) -> bool {
        self.nodes
            .get(point_id)
            .is_some_and(|n| n.effective_config.publish_single_breadth.unwrap_or(false))
    }

    pub fn is_published_multi_depth(&self, device_id: &str) -> bool {
        self.nodes
            .get(device_id)
            .is_some_and(|n| n.effective_config.publish_multi_depth.unwrap_or(false))
    }

    pub fn is_published_multi_breadth(&self, device_id: &str) -> bool {
        self.nodes
            .get(device_id)
            .is_some_and(|n| n.effective_config.publish_multi_breadth.unwrap_or(false))
    }

    /// Set/toggle `active` on every node matched by `topic_glob`. All-or
    /// nothing: if any matched node is already at `target`, the whole call
    /// is a no-op (spec §4.F `start`/`stop`).
    pub fn set_active(&mut self, topic_glob: &str, target: bool) -> Result<bool, DomainError> {
        let matched: Vec<String> = self
            .nodes
            .values()
            .filter(|n| glob_match::glob_match(topic_glob, &n.identifier))
            .map(|n| n.identifier.clone())
            .collect();

        if matched.is_empty() {
            return Ok(false);
        }
        if matched.iter().any(|id| self.nodes.get(id).is_some_and(|n| n.active == target)) {
            return Ok(false);
        }
        for id in &matched {
            if let Some(node) = self.get_node_mut(id) {
                node.active = target;
            }
        }
        Ok(true)
    }

    pub fn set_enabled(&mut self, topic_glob: &str, target: bool) -> Vec<String> {
        let matched: Vec<String> = self
            .nodes
            .values()
            .filter(|n| glob_match::glob_match(topic_glob, &n.identifier))
            .map(|n| n.identifier.clone())
            .collect();
        for id in &matched {
            if let Some(node) = self.get_node_mut(id) {
                node.enabled = target;
            }
        }
        matched
    }

    pub fn record_read(
        &mut self,
        point_id: &str,
        value: crate::domain::models::PointValue,
        meta: Option<crate::domain::models::PointMetaData>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.get_node_mut(point_id)
            .map(|node| node.record_read(value, meta, at))
            .ok_or_else(|| DomainError::EquipmentNotFound(point_id.to_string()))
    }

    /// Stamp a device's `last_all_publish` after an all-depth/all-breadth
    /// tick fires for it.
    pub fn mark_all_published(&mut self, device_id: &str, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.get_node_mut(device_id)
            .map(|node| node.last_all_publish = Some(at))
            .ok_or_else(|| DomainError::EquipmentNotFound(device_id.to_string()))
    }
}

fn config_eq(a: &NodeConfig, b: &NodeConfig) -> bool {
    serde_json::to_value(a).ok() == serde_json::to_value(b).ok()
}

fn validate_registry(registry: &[RegistryPoint]) -> Result<(), DomainError> {
    let mut seen = std::collections::HashSet::new();
    for point in registry {
        if point.name.is_empty() {
            return Err(DomainError::Configuration("registry point name must be nonempty".to_string()));
        }
        if !seen.insert(&point.name) {
            return Err(DomainError::Configuration(format!("duplicate registry point name: {}", point.name)));
        }
    }
    Ok(())
}
