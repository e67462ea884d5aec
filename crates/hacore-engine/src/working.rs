//! The committed configuration with staged ops applied on top. Staging
//! validates each op against it, and translation reads the state an op
//! sees when it runs.

use crate::edit::{AttributeScope, EditOp};
use crate::error::EditError;
use hacore_graph::ClusterGraph;
use hacore_parse::{ClusterConfig, ConstraintDef, Endpoints, LegDef, ResourceDef, ResourceKind, VolumeDef};
use hacore_types::{ConstraintId, HostId, LegRole, ResourceId, VolumeConnection, VolumeId};
use std::collections::{BTreeMap, BTreeSet};

/// A volume as the edit sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingVolume {
    /// Configured legs.
    pub def: VolumeDef,
    /// Role per leg host.
    pub roles: BTreeMap<HostId, LegRole>,
    /// False once disconnected.
    pub connected: bool,
}

impl WorkingVolume {
    /// Hosts carrying a leg.
    pub fn hosts(&self) -> Vec<HostId> {
        self.def.legs.iter().map(|l| l.host.clone()).collect()
    }

    /// Role on `host`, `Unknown` if unreported.
    pub fn role(&self, host: &HostId) -> LegRole {
        self.roles.get(host).copied().unwrap_or_default()
    }
}

/// Configuration an edit is validated and planned against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkingSet {
    /// Resource-manager configuration.
    pub config: ClusterConfig,
    /// Storage volumes.
    pub volumes: BTreeMap<VolumeId, WorkingVolume>,
    /// Known cluster hosts.
    pub hosts: BTreeSet<HostId>,
}

impl WorkingSet {
    /// Committed state of `graph`.
    pub fn from_graph(graph: &ClusterGraph) -> Self {
        let config = ClusterConfig {
            version: graph.config_version().unwrap_or_default(),
            nodes: graph.hosts().map(|h| h.id.clone()).collect(),
            resources: graph.resources().map(|r| r.def.clone()).collect(),
            constraints: graph.constraints().to_vec(),
        };
        let volumes = graph
            .volumes()
            .map(|v| {
                let legs = v
                    .legs
                    .iter()
                    .map(|l| LegDef {
                        host: l.host.clone(),
                        device: l.device.clone(),
                        disk: l.disk.clone(),
                        meta_disk: l.meta_disk.clone(),
                        address: l.address.clone(),
                        port: l.port,
                        node_id: l.node_id,
                    })
                    .collect();
                let working = WorkingVolume {
                    def: VolumeDef {
                        id: v.id.clone(),
                        legs,
                        protocol: v.protocol.clone(),
                    },
                    roles: v.legs.iter().map(|l| (l.host.clone(), l.role)).collect(),
                    connected: v.connection == VolumeConnection::Connected,
                };
                (v.id.clone(), working)
            })
            .collect();
        Self {
            config,
            volumes,
            hosts: graph.hosts().map(|h| h.id.clone()).collect(),
        }
    }

    /// Resource `id`, wrapped or not.
    pub fn resource(&self, id: &ResourceId) -> Option<&ResourceDef> {
        self.config.resource(id)
    }

    /// Constraints created by one configuration element: matches the element
    /// id as well as the derived per-link ids.
    pub fn constraints_for(&self, id: &ConstraintId) -> Vec<&ConstraintDef> {
        self.config
            .constraints
            .iter()
            .filter(|c| &c.id == id || c.cib_id() == id)
            .collect()
    }

    /// Current value of one attribute.
    pub fn attribute(&self, resource: &ResourceId, scope: AttributeScope, name: &str) -> Option<&String> {
        let def = self.resource(resource)?;
        match scope {
            AttributeScope::Instance => def.instance_attrs.get(name),
            AttributeScope::Meta => def.meta_attrs.get(name),
        }
    }

    /// Check `op` against the current state without changing it.
    pub fn validate(&self, op: &EditOp) -> Result<(), EditError> {
        match op {
            EditOp::AddResource { spec } => self.validate_new_resource(spec),
            EditOp::RemoveResource { id } => {
                let def = self.resource(id).ok_or_else(|| EditError::UnknownResource(id.clone()))?;
                if let Some(parent) = &def.parent {
                    return Err(EditError::InUse {
                        resource: id.clone(),
                        by: format!("resource {}", parent),
                    });
                }
                let removed = self.subtree(id);
                for constraint in &self.config.constraints {
                    if constraint.resources().iter().any(|r| removed.contains(*r)) {
                        return Err(EditError::InUse {
                            resource: id.clone(),
                            by: format!("constraint {}", constraint.cib_id()),
                        });
                    }
                }
                Ok(())
            }
            EditOp::SetAttribute { resource, name, .. } => {
                if self.resource(resource).is_none() {
                    return Err(EditError::UnknownResource(resource.clone()));
                }
                if name.trim().is_empty() {
                    return Err(EditError::InvalidSpec {
                        id: resource.to_string(),
                        detail: "attribute name is empty".to_string(),
                    });
                }
                Ok(())
            }
            EditOp::AddConstraint { constraint } => self.validate_new_constraint(constraint),
            EditOp::RemoveConstraint { id } => {
                if self.constraints_for(id).is_empty() {
                    return Err(EditError::UnknownConstraint(id.clone()));
                }
                Ok(())
            }
            EditOp::AddVolume { spec } => self.validate_new_volume(spec),
            EditOp::RemoveVolume { id } => {
                if !self.volumes.contains_key(id) {
                    return Err(EditError::UnknownVolume(id.clone()));
                }
                Ok(())
            }
            EditOp::SetVolumeRole { volume, host, role } => {
                let working = self
                    .volumes
                    .get(volume)
                    .ok_or_else(|| EditError::UnknownVolume(volume.clone()))?;
                if working.def.leg(host).is_none() {
                    return Err(EditError::NotALeg {
                        volume: volume.clone(),
                        host: host.clone(),
                    });
                }
                if *role == LegRole::Unknown {
                    return Err(EditError::InvalidSpec {
                        id: volume.to_string(),
                        detail: "role must be primary or secondary".to_string(),
                    });
                }
                if *role == LegRole::Primary && working.connected {
                    if let Some(peer) = working
                        .def
                        .legs
                        .iter()
                        .map(|l| &l.host)
                        .find(|h| *h != host && working.role(h) == LegRole::Primary)
                    {
                        return Err(EditError::PeerAlreadyPrimary {
                            volume: volume.clone(),
                            peer: peer.clone(),
                        });
                    }
                }
                Ok(())
            }
            EditOp::SetVolumeConnection { volume, .. } => {
                if !self.volumes.contains_key(volume) {
                    return Err(EditError::UnknownVolume(volume.clone()));
                }
                Ok(())
            }
        }
    }

    fn validate_new_resource(&self, spec: &ResourceDef) -> Result<(), EditError> {
        let invalid = |detail: &str| EditError::InvalidSpec {
            id: spec.id.to_string(),
            detail: detail.to_string(),
        };
        if spec.id.is_empty() {
            return Err(invalid("resource id is empty"));
        }
        if self.resource(&spec.id).is_some() {
            return Err(EditError::DuplicateId {
                kind: "resource",
                id: spec.id.to_string(),
            });
        }
        if spec.parent.is_some() {
            return Err(invalid("parent is set by the enclosing group or clone"));
        }
        match spec.kind {
            ResourceKind::Primitive => {
                if spec.agent_parts().is_none() {
                    return Err(invalid("agent must be class[:provider]:type"));
                }
                if !spec.children.is_empty() {
                    return Err(invalid("a primitive has no children"));
                }
            }
            ResourceKind::Group | ResourceKind::Clone => {
                if spec.children.is_empty() {
                    return Err(invalid("needs at least one existing child"));
                }
                if spec.kind == ResourceKind::Clone && spec.children.len() != 1 {
                    return Err(invalid("a clone wraps exactly one resource"));
                }
                let mut seen = BTreeSet::new();
                for child in &spec.children {
                    if !seen.insert(child) {
                        return Err(invalid("child listed twice"));
                    }
                    let def = self
                        .resource(child)
                        .ok_or_else(|| EditError::UnknownResource(child.clone()))?;
                    if let Some(parent) = &def.parent {
                        return Err(EditError::InUse {
                            resource: child.clone(),
                            by: format!("resource {}", parent),
                        });
                    }
                    if spec.kind == ResourceKind::Group && def.kind != ResourceKind::Primitive {
                        return Err(invalid("groups contain primitives only"));
                    }
                    // Wrapping deletes and recreates the child, which a
                    // constraint referencing it would block.
                    let moved = self.subtree(child);
                    if let Some(constraint) = self
                        .config
                        .constraints
                        .iter()
                        .find(|c| c.resources().iter().any(|r| moved.contains(*r)))
                    {
                        return Err(EditError::InUse {
                            resource: child.clone(),
                            by: format!("constraint {}", constraint.cib_id()),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_new_constraint(&self, constraint: &ConstraintDef) -> Result<(), EditError> {
        let invalid = |detail: String| EditError::InvalidEndpoints {
            constraint: constraint.id.clone(),
            detail,
        };
        if constraint.id.is_empty() {
            return Err(invalid("constraint id is empty".to_string()));
        }
        if constraint.origin.is_some() {
            return Err(invalid("derived link ids cannot be created directly".to_string()));
        }
        if !self.constraints_for(&constraint.id).is_empty() {
            return Err(EditError::DuplicateId {
                kind: "constraint",
                id: constraint.id.to_string(),
            });
        }
        match &constraint.endpoints {
            Endpoints::Order { first, then, .. } => self.validate_sides(first, then, &invalid),
            Endpoints::Colocation { rsc, with, .. } => self.validate_sides(rsc, with, &invalid),
            Endpoints::Location { resource, host } => {
                if resource.is_empty() || host.is_empty() {
                    return Err(invalid(
                        "a location constraint names exactly one resource and one host".to_string(),
                    ));
                }
                if self.resource(resource).is_none() {
                    return Err(EditError::UnknownResource(resource.clone()));
                }
                if !self.hosts.contains(host) {
                    return Err(EditError::UnknownHost(host.clone()));
                }
                Ok(())
            }
        }
    }

    fn validate_sides(
        &self,
        left: &[ResourceId],
        right: &[ResourceId],
        invalid: &dyn Fn(String) -> EditError,
    ) -> Result<(), EditError> {
        if left.is_empty() || right.is_empty() {
            return Err(invalid("both sides need at least one resource".to_string()));
        }
        for id in left.iter().chain(right) {
            if self.resource(id).is_none() {
                return Err(EditError::UnknownResource(id.clone()));
            }
        }
        if let Some(both) = left.iter().find(|id| right.contains(*id)) {
            return Err(invalid(format!("{} appears on both sides", both)));
        }
        Ok(())
    }

    fn validate_new_volume(&self, spec: &VolumeDef) -> Result<(), EditError> {
        let invalid = |detail: &str| EditError::InvalidSpec {
            id: spec.id.to_string(),
            detail: detail.to_string(),
        };
        if spec.id.is_empty() {
            return Err(invalid("volume id is empty"));
        }
        if self.volumes.contains_key(&spec.id) {
            return Err(EditError::DuplicateId {
                kind: "volume",
                id: spec.id.to_string(),
            });
        }
        let [first, second] = spec.legs.as_slice() else {
            return Err(invalid("a volume has exactly two legs"));
        };
        if first.host == second.host {
            return Err(invalid("both legs are on the same host"));
        }
        for leg in [first, second] {
            if !self.hosts.contains(&leg.host) {
                return Err(EditError::UnknownHost(leg.host.clone()));
            }
            if leg.device.is_empty() || leg.disk.is_empty() || leg.address.is_empty() {
                return Err(invalid("each leg needs a device, a disk and an address"));
            }
        }
        Ok(())
    }

    /// `id` and everything nested under it.
    fn subtree(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![id.clone()];
        while let Some(next) = stack.pop() {
            if let Some(def) = self.resource(&next) {
                stack.extend(def.children.iter().cloned());
            }
            out.insert(next);
        }
        out
    }

    /// Apply a validated op.
    pub fn apply(&mut self, op: &EditOp) {
        match op {
            EditOp::AddResource { spec } => {
                for child in &spec.children {
                    if let Some(def) = self.config.resources.iter_mut().find(|r| &r.id == child) {
                        def.parent = Some(spec.id.clone());
                    }
                }
                self.config.resources.push(spec.clone());
            }
            EditOp::RemoveResource { id } => {
                let removed = self.subtree(id);
                self.config.resources.retain(|r| !removed.contains(&r.id));
            }
            EditOp::SetAttribute {
                resource,
                scope,
                name,
                value,
            } => {
                if let Some(def) = self.config.resources.iter_mut().find(|r| &r.id == resource) {
                    let attrs = match scope {
                        AttributeScope::Instance => &mut def.instance_attrs,
                        AttributeScope::Meta => &mut def.meta_attrs,
                    };
                    match value {
                        Some(v) => {
                            attrs.insert(name.clone(), v.clone());
                        }
                        None => {
                            attrs.remove(name);
                        }
                    }
                }
            }
            EditOp::AddConstraint { constraint } => self.config.constraints.push(constraint.clone()),
            EditOp::RemoveConstraint { id } => {
                self.config.constraints.retain(|c| &c.id != id && c.cib_id() != id);
            }
            EditOp::AddVolume { spec } => {
                let working = WorkingVolume {
                    def: spec.clone(),
                    roles: spec.legs.iter().map(|l| (l.host.clone(), LegRole::Secondary)).collect(),
                    connected: true,
                };
                self.volumes.insert(spec.id.clone(), working);
            }
            EditOp::RemoveVolume { id } => {
                self.volumes.remove(id);
            }
            EditOp::SetVolumeRole { volume, host, role } => {
                if let Some(working) = self.volumes.get_mut(volume) {
                    working.roles.insert(host.clone(), *role);
                }
            }
            EditOp::SetVolumeConnection { volume, connected } => {
                if let Some(working) = self.volumes.get_mut(volume) {
                    working.connected = *connected;
                }
            }
        }
    }
}
