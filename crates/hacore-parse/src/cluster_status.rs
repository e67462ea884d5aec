//! Resource-manager status (`crm_mon --as-xml` / `--output-as=xml`).

use crate::xml::{attr, child, elements, flag, text_of};
use crate::{Fragment, Parsed, Source};
use hacore_types::{HostId, ResourceId, ResourceRole, ResourceStatus};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Membership and health of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Node name.
    pub host: HostId,
    /// Member of the cluster.
    pub online: bool,
    /// In standby; runs no resources.
    pub standby: bool,
    /// In maintenance mode.
    pub maintenance: bool,
    /// Lost without a clean shutdown.
    pub unclean: bool,
    /// Current designated coordinator.
    pub is_dc: bool,
}

/// Status of one resource on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource (instance suffix folded).
    pub resource: ResourceId,
    /// Node the report is about.
    pub host: HostId,
    /// Lifecycle status.
    pub status: ResourceStatus,
    /// Role for promotable clones and plain started resources.
    pub role: Option<ResourceRole>,
}

/// A failed operation recorded by the resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    /// Resource the operation ran for.
    pub resource: ResourceId,
    /// Node it ran on.
    pub host: HostId,
    /// Operation (`start`, `stop`, `monitor`, ...).
    pub task: String,
    /// Agent exit code.
    pub exit_code: Option<i32>,
    /// Exit reason or status text.
    pub reason: String,
}

/// A group/clone containing a child resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Membership {
    /// Group or clone.
    pub parent: ResourceId,
    /// Direct child.
    pub child: ResourceId,
}

/// Parsed status document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// Designated coordinator, if one is elected.
    pub dc: Option<HostId>,
    /// Nodes in document order.
    pub nodes: Vec<NodeStatus>,
    /// Per-(resource, node) status, sorted.
    pub resources: Vec<ResourceState>,
    /// Every resource id mentioned, running or not, sorted.
    pub known_resources: Vec<ResourceId>,
    /// Group/clone nesting, sorted.
    pub membership: Vec<Membership>,
    /// Failed operations in document order.
    pub failures: Vec<ResourceFailure>,
}

impl ClusterStatus {
    /// Status of `resource` on `host`; `Stopped` when unreported.
    pub fn status_of(&self, resource: &ResourceId, host: &HostId) -> ResourceStatus {
        self.resources
            .iter()
            .find(|s| &s.resource == resource && &s.host == host)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Node entry by name.
    pub fn node(&self, host: &HostId) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| &n.host == host)
    }
}

struct Walker<'t> {
    input: &'t str,
    states: BTreeMap<(ResourceId, HostId), ResourceState>,
    known: BTreeSet<ResourceId>,
    membership: BTreeSet<Membership>,
    unparsed: Vec<Fragment>,
}

impl Walker<'_> {
    fn fragment(&mut self, node: Node<'_, '_>, reason: impl Into<String>) {
        self.unparsed
            .push(Fragment::new(Source::ClusterStatus, text_of(self.input, node), reason));
    }

    fn walk(&mut self, el: Node<'_, '_>, parent: Option<&ResourceId>) {
        let tag = el.tag_name().name();
        if !matches!(tag, "resource" | "group" | "clone") {
            self.fragment(el, format!("unsupported element <{}>", tag));
            return;
        }
        let Some(raw_id) = attr(el, "id") else {
            self.fragment(el, format!("<{}> without id", tag));
            return;
        };
        let id = ResourceId::new(raw_id);
        self.known.insert(id.clone());
        if let Some(parent) = parent {
            if parent != &id {
                self.membership.insert(Membership {
                    parent: parent.clone(),
                    child: id.clone(),
                });
            }
        }

        if tag == "resource" {
            self.primitive(el, id);
        } else {
            for child_el in elements(el) {
                self.walk(child_el, Some(&id));
            }
        }
    }

    fn primitive(&mut self, el: Node<'_, '_>, id: ResourceId) {
        let role_raw = attr(el, "role").unwrap_or("Stopped");
        let role = ResourceRole::parse(role_raw);
        let mut status = match role_raw.to_ascii_lowercase().as_str() {
            "starting" | "migrating" => ResourceStatus::Starting,
            "stopping" => ResourceStatus::Stopping,
            "stopped" => ResourceStatus::Stopped,
            _ => ResourceStatus::Started,
        };
        if flag(el, "failed") {
            status = if status == ResourceStatus::Stopped {
                ResourceStatus::FailedStart
            } else {
                ResourceStatus::FailedStop
            };
        } else if attr(el, "managed") == Some("false") && status != ResourceStatus::Stopped {
            status = ResourceStatus::Unmanaged;
        }

        for node in elements(el).filter(|n| n.has_tag_name("node")) {
            let Some(name) = attr(node, "name") else {
                self.fragment(node, "resource node without name");
                continue;
            };
            let host = HostId::new(name);
            self.states
                .entry((id.clone(), host.clone()))
                .or_insert(ResourceState {
                    resource: id.clone(),
                    host,
                    status,
                    role,
                });
        }
    }
}

fn parse_failure(node: Node<'_, '_>) -> Option<ResourceFailure> {
    let op_key = attr(node, "op_key")?;
    let host = HostId::new(attr(node, "node")?);
    // op_key is <resource>_<task>_<interval>; resource ids may contain '_'.
    let mut parts = op_key.rsplitn(3, '_');
    let _interval = parts.next()?;
    let key_task = parts.next()?;
    let resource = parts.next()?;
    let task = attr(node, "task").unwrap_or(key_task).to_string();
    let reason = attr(node, "exitreason")
        .or_else(|| attr(node, "exitstatus"))
        .unwrap_or("unknown")
        .to_string();
    Some(ResourceFailure {
        resource: ResourceId::new(resource),
        host,
        task,
        exit_code: attr(node, "exitcode").and_then(|c| c.parse().ok()),
        reason,
    })
}

/// Parse a resource-manager status document.
pub fn parse_cluster_status(input: &str) -> Parsed<ClusterStatus> {
    let doc = match Document::parse(input) {
        Ok(doc) => doc,
        Err(e) => return Parsed::rejected(Source::ClusterStatus, input, format!("invalid XML: {}", e)),
    };
    let root = doc.root_element();
    let root_tag = root.tag_name().name();
    if !matches!(root_tag, "crm_mon" | "pacemaker-result") {
        return Parsed::rejected(
            Source::ClusterStatus,
            input,
            format!("unexpected root element <{}>", root_tag),
        );
    }

    let mut out = ClusterStatus::default();
    let mut walker = Walker {
        input,
        states: BTreeMap::new(),
        known: BTreeSet::new(),
        membership: BTreeSet::new(),
        unparsed: Vec::new(),
    };

    if let Some(dc) = child(root, "summary").and_then(|s| child(s, "current_dc")) {
        if flag(dc, "present") {
            out.dc = attr(dc, "name").map(HostId::new);
        }
    }

    if let Some(nodes) = child(root, "nodes") {
        for node in elements(nodes).filter(|n| n.has_tag_name("node")) {
            match attr(node, "name") {
                Some(name) => out.nodes.push(NodeStatus {
                    host: HostId::new(name),
                    online: flag(node, "online"),
                    standby: flag(node, "standby") || flag(node, "standby_onfail"),
                    maintenance: flag(node, "maintenance"),
                    unclean: flag(node, "unclean"),
                    is_dc: flag(node, "is_dc"),
                }),
                None => walker.fragment(node, "node without name"),
            }
        }
    }
    if out.dc.is_none() {
        out.dc = out.nodes.iter().find(|n| n.is_dc).map(|n| n.host.clone());
    }

    if let Some(resources) = child(root, "resources") {
        for el in elements(resources) {
            walker.walk(el, None);
        }
    }

    if let Some(failures) = child(root, "failures") {
        for node in elements(failures).filter(|n| n.has_tag_name("failure")) {
            match parse_failure(node) {
                Some(failure) => out.failures.push(failure),
                None => walker.fragment(node, "failure entry without op_key or node"),
            }
        }
    }

    for failure in &out.failures {
        let key = (failure.resource.clone(), failure.host.clone());
        let status = match failure.task.as_str() {
            "start" | "promote" => ResourceStatus::FailedStart,
            "stop" | "demote" => ResourceStatus::FailedStop,
            _ => continue,
        };
        let entry = walker.states.entry(key).or_insert(ResourceState {
            resource: failure.resource.clone(),
            host: failure.host.clone(),
            status,
            role: None,
        });
        if status == ResourceStatus::FailedStop || !entry.status.is_running() {
            entry.status = status;
        }
    }

    out.resources = walker.states.into_values().collect();
    out.known_resources = walker.known.into_iter().collect();
    out.membership = walker.membership.into_iter().collect();
    Parsed {
        value: out,
        unparsed: walker.unparsed,
    }
}
