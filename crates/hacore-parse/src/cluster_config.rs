//! Resource-manager configuration (`cibadmin --query`).

use crate::xml::{attr, child, elements, text_of};
use crate::{Fragment, Parsed, Source};
use hacore_types::{ConstraintId, HostId, ResourceId, ResourceRole, Score};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Configuration version triple. Ordering is lexicographic, so the newest
/// configuration compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct CibVersion {
    /// Administrative epoch, bumped by operators.
    pub admin_epoch: u64,
    /// Bumped on every configuration change.
    pub epoch: u64,
    /// Bumped on every status change.
    pub num_updates: u64,
}

impl fmt::Display for CibVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.admin_epoch, self.epoch, self.num_updates)
    }
}

/// Resource kinds. A promotable clone is a `Clone` with `promotable` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Single agent instance.
    Primitive,
    /// Ordered, colocated list of primitives.
    Group,
    /// Copies of one child across nodes.
    Clone,
}

/// A configured resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDef {
    /// Resource id.
    pub id: ResourceId,
    /// Kind.
    pub kind: ResourceKind,
    /// `class[:provider]:type` for primitives.
    pub agent: Option<String>,
    /// Ordered children for groups and clones.
    #[serde(default)]
    pub children: Vec<ResourceId>,
    /// Enclosing group or clone.
    #[serde(default)]
    pub parent: Option<ResourceId>,
    /// Clone with promoted/unpromoted roles.
    #[serde(default)]
    pub promotable: bool,
    /// Agent parameters.
    #[serde(default)]
    pub instance_attrs: BTreeMap<String, String>,
    /// Resource manager meta attributes.
    #[serde(default)]
    pub meta_attrs: BTreeMap<String, String>,
}

impl ResourceDef {
    fn empty(id: ResourceId, kind: ResourceKind) -> Self {
        Self {
            id,
            kind,
            agent: None,
            children: Vec::new(),
            parent: None,
            promotable: false,
            instance_attrs: BTreeMap::new(),
            meta_attrs: BTreeMap::new(),
        }
    }

    /// A primitive running `agent`.
    pub fn primitive(id: impl Into<ResourceId>, agent: impl Into<String>) -> Self {
        let mut def = Self::empty(id.into(), ResourceKind::Primitive);
        def.agent = Some(agent.into());
        def
    }

    /// A group of existing primitives.
    pub fn group(id: impl Into<ResourceId>, children: Vec<ResourceId>) -> Self {
        let mut def = Self::empty(id.into(), ResourceKind::Group);
        def.children = children;
        def
    }

    /// A clone of an existing resource.
    pub fn clone_of(id: impl Into<ResourceId>, child: ResourceId, promotable: bool) -> Self {
        let mut def = Self::empty(id.into(), ResourceKind::Clone);
        def.children = vec![child];
        def.promotable = promotable;
        def
    }

    /// Builder-style instance attribute.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.instance_attrs.insert(name.into(), value.into());
        self
    }

    /// Agent split into `(class, provider, type)`.
    pub fn agent_parts(&self) -> Option<(&str, Option<&str>, &str)> {
        let agent = self.agent.as_deref()?;
        let parts: Vec<&str> = agent.split(':').collect();
        match parts.as_slice() {
            [class, kind] if !class.is_empty() && !kind.is_empty() => Some((*class, None, *kind)),
            [class, provider, kind] if !class.is_empty() && !kind.is_empty() => {
                Some((*class, Some(*provider).filter(|p| !p.is_empty()), *kind))
            }
            _ => None,
        }
    }
}

/// Order constraint actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Start.
    Start,
    /// Stop.
    Stop,
    /// Promote.
    Promote,
    /// Demote.
    Demote,
}

impl Action {
    /// Parse an action keyword.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "start" => Some(Action::Start),
            "stop" => Some(Action::Stop),
            "promote" => Some(Action::Promote),
            "demote" => Some(Action::Demote),
            _ => None,
        }
    }

    /// Configuration keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Promote => "promote",
            Action::Demote => "demote",
        }
    }
}

/// Constraint kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Start/stop ordering.
    Order,
    /// Placement relative to another resource.
    Colocation,
    /// Placement preference for one node.
    Location,
}

/// Constraint endpoints. Every endpoint is a non-empty, ordered set of
/// resources; a plain constraint has one-element endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoints {
    /// `first` is acted on before `then`.
    Order {
        /// Resources acted on first.
        first: Vec<ResourceId>,
        /// Resources acted on after.
        then: Vec<ResourceId>,
        /// Action on `first`, default start.
        first_action: Option<Action>,
        /// Action on `then`, default the first action.
        then_action: Option<Action>,
    },
    /// `rsc` is placed relative to `with`.
    Colocation {
        /// Dependent resources.
        rsc: Vec<ResourceId>,
        /// Resources placed first.
        with: Vec<ResourceId>,
        /// Role the dependent side is constrained in.
        rsc_role: Option<ResourceRole>,
        /// Role of the `with` side.
        with_role: Option<ResourceRole>,
    },
    /// One resource on one node.
    Location {
        /// Constrained resource.
        resource: ResourceId,
        /// Node.
        host: HostId,
    },
}

/// A configured constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDef {
    /// Constraint id. Resource-set chains yield one constraint per link, with
    /// ids `<id>#<n>`.
    pub id: ConstraintId,
    /// Score.
    pub score: Score,
    /// Endpoints.
    pub endpoints: Endpoints,
    /// Configuration element this constraint was derived from, when it differs
    /// from `id`.
    #[serde(default)]
    pub origin: Option<ConstraintId>,
}

impl ConstraintDef {
    /// Plain order constraint.
    pub fn order(id: impl Into<ConstraintId>, first: ResourceId, then: ResourceId, score: Score) -> Self {
        Self {
            id: id.into(),
            score,
            endpoints: Endpoints::Order {
                first: vec![first],
                then: vec![then],
                first_action: None,
                then_action: None,
            },
            origin: None,
        }
    }

    /// Plain colocation constraint: `rsc` placed with `with`.
    pub fn colocation(id: impl Into<ConstraintId>, rsc: ResourceId, with: ResourceId, score: Score) -> Self {
        Self {
            id: id.into(),
            score,
            endpoints: Endpoints::Colocation {
                rsc: vec![rsc],
                with: vec![with],
                rsc_role: None,
                with_role: None,
            },
            origin: None,
        }
    }

    /// Location constraint.
    pub fn location(id: impl Into<ConstraintId>, resource: ResourceId, host: HostId, score: Score) -> Self {
        Self {
            id: id.into(),
            score,
            endpoints: Endpoints::Location { resource, host },
            origin: None,
        }
    }

    /// Kind derived from the endpoints.
    pub fn kind(&self) -> ConstraintKind {
        match self.endpoints {
            Endpoints::Order { .. } => ConstraintKind::Order,
            Endpoints::Colocation { .. } => ConstraintKind::Colocation,
            Endpoints::Location { .. } => ConstraintKind::Location,
        }
    }

    /// Id of the configuration element.
    pub fn cib_id(&self) -> &ConstraintId {
        self.origin.as_ref().unwrap_or(&self.id)
    }

    /// Every resource referenced, in endpoint order.
    pub fn resources(&self) -> Vec<&ResourceId> {
        match &self.endpoints {
            Endpoints::Order { first, then, .. } => first.iter().chain(then.iter()).collect(),
            Endpoints::Colocation { rsc, with, .. } => rsc.iter().chain(with.iter()).collect(),
            Endpoints::Location { resource, .. } => vec![resource],
        }
    }
}

/// Parsed configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Version triple.
    pub version: CibVersion,
    /// Configured node names.
    pub nodes: Vec<HostId>,
    /// Resources, parents before children.
    pub resources: Vec<ResourceDef>,
    /// Constraints in document order.
    pub constraints: Vec<ConstraintDef>,
}

impl ClusterConfig {
    /// Resource by id.
    pub fn resource(&self, id: &ResourceId) -> Option<&ResourceDef> {
        self.resources.iter().find(|r| &r.id == id)
    }

    /// Constraint by id.
    pub fn constraint(&self, id: &ConstraintId) -> Option<&ConstraintDef> {
        self.constraints.iter().find(|c| &c.id == id)
    }
}

struct Reader<'t> {
    input: &'t str,
    unparsed: Vec<Fragment>,
}

impl Reader<'_> {
    fn fragment(&mut self, node: Node<'_, '_>, reason: impl Into<String>) {
        self.unparsed
            .push(Fragment::new(Source::ClusterConfig, text_of(self.input, node), reason));
    }

    fn nvpairs(&mut self, el: Node<'_, '_>, set_tag: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for set in elements(el).filter(|n| n.has_tag_name(set_tag)) {
            if child(set, "rule").is_some() {
                self.fragment(set, "rule-based attribute set");
                continue;
            }
            for pair in elements(set).filter(|n| n.has_tag_name("nvpair")) {
                match (attr(pair, "name"), pair.attribute("value")) {
                    (Some(name), Some(value)) => {
                        out.insert(name.to_string(), value.to_string());
                    }
                    _ => self.fragment(pair, "nvpair without name or value"),
                }
            }
        }
        out
    }

    fn resource(
        &mut self,
        el: Node<'_, '_>,
        parent: Option<&ResourceId>,
        out: &mut Vec<ResourceDef>,
    ) -> Option<ResourceId> {
        let tag = el.tag_name().name();
        let kind = match tag {
            "primitive" => ResourceKind::Primitive,
            "group" => ResourceKind::Group,
            "clone" | "master" => ResourceKind::Clone,
            "meta_attributes" | "instance_attributes" | "operations" | "utilization" => return None,
            other => {
                self.fragment(el, format!("unsupported resource element <{}>", other));
                return None;
            }
        };
        let Some(raw_id) = attr(el, "id") else {
            self.fragment(el, format!("<{}> without id", tag));
            return None;
        };
        let id = ResourceId::new(raw_id);
        let mut def = ResourceDef::empty(id.clone(), kind);
        def.parent = parent.cloned();
        def.instance_attrs = self.nvpairs(el, "instance_attributes");
        def.meta_attrs = self.nvpairs(el, "meta_attributes");

        if kind == ResourceKind::Primitive {
            match (attr(el, "class"), attr(el, "type")) {
                (Some(class), Some(kind)) => {
                    def.agent = Some(match attr(el, "provider") {
                        Some(provider) => format!("{}:{}:{}", class, provider, kind),
                        None => format!("{}:{}", class, kind),
                    });
                }
                _ => self.fragment(el, "primitive without class or type"),
            }
        } else {
            def.promotable = tag == "master"
                || def
                    .meta_attrs
                    .get("promotable")
                    .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
                    .unwrap_or(false);
        }

        let index = out.len();
        out.push(def);
        if kind != ResourceKind::Primitive {
            for child_el in elements(el) {
                if let Some(child_id) = self.resource(child_el, Some(&id), out) {
                    out[index].children.push(child_id);
                }
            }
            if out[index].children.is_empty() {
                self.fragment(el, format!("<{}> without children", tag));
            }
        }
        Some(id)
    }

    fn score(&mut self, el: Node<'_, '_>, default: Option<Score>) -> Option<Score> {
        if let Some(raw) = attr(el, "score") {
            return match raw.parse::<Score>() {
                Ok(score) => Some(score),
                Err(e) => {
                    self.fragment(el, e.to_string());
                    None
                }
            };
        }
        if let Some(kind) = attr(el, "kind") {
            let score = Score::from_order_kind(kind);
            if score.is_none() {
                self.fragment(el, format!("unknown order kind {}", kind));
            }
            return score;
        }
        if default.is_none() {
            self.fragment(el, "constraint without score");
        }
        default
    }

    /// Resource-set chain: each set becomes one endpoint; a single sequential
    /// set becomes one endpoint per member.
    fn set_chain(&mut self, el: Node<'_, '_>) -> Option<Vec<(Vec<ResourceId>, Option<&'static str>)>> {
        let sets: Vec<Node<'_, '_>> = elements(el).filter(|n| n.has_tag_name("resource_set")).collect();
        if sets.is_empty() {
            return None;
        }
        let mut chain = Vec::new();
        for set in &sets {
            let members: Vec<ResourceId> = elements(*set)
                .filter(|n| n.has_tag_name("resource_ref"))
                .filter_map(|n| attr(n, "id"))
                .map(ResourceId::new)
                .collect();
            if members.is_empty() {
                self.fragment(*set, "empty resource set");
                continue;
            }
            let action = attr(*set, "action").or_else(|| attr(*set, "role")).and_then(intern_keyword);
            let sequential = set.attribute("sequential").map(|v| v != "false").unwrap_or(true);
            if sets.len() == 1 && sequential {
                chain.extend(members.into_iter().map(|m| (vec![m], action)));
            } else {
                chain.push((members, action));
            }
        }
        if chain.len() < 2 {
            self.fragment(el, "resource sets do not form a chain");
            return Some(Vec::new());
        }
        Some(chain)
    }

    fn constraint(&mut self, el: Node<'_, '_>, out: &mut Vec<ConstraintDef>) {
        let tag = el.tag_name().name();
        let Some(raw_id) = attr(el, "id") else {
            self.fragment(el, format!("<{}> without id", tag));
            return;
        };
        let id = ConstraintId::new(raw_id);
        match tag {
            "rsc_location" => self.location(el, id, out),
            "rsc_order" => self.order(el, id, out),
            "rsc_colocation" => self.colocation(el, id, out),
            other => self.fragment(el, format!("unsupported constraint <{}>", other)),
        }
    }

    fn location(&mut self, el: Node<'_, '_>, id: ConstraintId, out: &mut Vec<ConstraintDef>) {
        if child(el, "rule").is_some() {
            self.fragment(el, "rule-based location constraint");
            return;
        }
        let (Some(rsc), Some(node)) = (attr(el, "rsc"), attr(el, "node")) else {
            self.fragment(el, "location constraint must name one resource and one node");
            return;
        };
        if let Some(score) = self.score(el, None) {
            out.push(ConstraintDef::location(id, ResourceId::new(rsc), HostId::new(node), score));
        }
    }

    fn order(&mut self, el: Node<'_, '_>, id: ConstraintId, out: &mut Vec<ConstraintDef>) {
        let Some(score) = self.score(el, Some(Score::POS_INFINITY)) else {
            return;
        };
        if let Some(chain) = self.set_chain(el) {
            push_links(&id, &chain, out, |first, then| ConstraintDef {
                id: id.clone(),
                score,
                endpoints: Endpoints::Order {
                    first: first.0.clone(),
                    then: then.0.clone(),
                    first_action: first.1.and_then(Action::parse),
                    then_action: then.1.and_then(Action::parse),
                },
                origin: None,
            });
            return;
        }
        let (Some(first), Some(then)) = (attr(el, "first"), attr(el, "then")) else {
            self.fragment(el, "order constraint without first/then");
            return;
        };
        out.push(ConstraintDef {
            id,
            score,
            endpoints: Endpoints::Order {
                first: vec![ResourceId::new(first)],
                then: vec![ResourceId::new(then)],
                first_action: attr(el, "first-action").and_then(Action::parse),
                then_action: attr(el, "then-action").and_then(Action::parse),
            },
            origin: None,
        });
    }

    fn colocation(&mut self, el: Node<'_, '_>, id: ConstraintId, out: &mut Vec<ConstraintDef>) {
        let Some(score) = self.score(el, None) else {
            return;
        };
        if let Some(chain) = self.set_chain(el) {
            // Each link places the later set with the earlier one.
            push_links(&id, &chain, out, |earlier, later| ConstraintDef {
                id: id.clone(),
                score,
                endpoints: Endpoints::Colocation {
                    rsc: later.0.clone(),
                    with: earlier.0.clone(),
                    rsc_role: later.1.and_then(ResourceRole::parse),
                    with_role: earlier.1.and_then(ResourceRole::parse),
                },
                origin: None,
            });
            return;
        }
        let (Some(rsc), Some(with)) = (attr(el, "rsc"), attr(el, "with-rsc")) else {
            self.fragment(el, "colocation constraint without rsc/with-rsc");
            return;
        };
        out.push(ConstraintDef {
            id,
            score,
            endpoints: Endpoints::Colocation {
                rsc: vec![ResourceId::new(rsc)],
                with: vec![ResourceId::new(with)],
                rsc_role: attr(el, "rsc-role").and_then(ResourceRole::parse),
                with_role: attr(el, "with-rsc-role").and_then(ResourceRole::parse),
            },
            origin: None,
        });
    }
}

type Link = (Vec<ResourceId>, Option<&'static str>);

fn push_links(
    id: &ConstraintId,
    chain: &[Link],
    out: &mut Vec<ConstraintDef>,
    build: impl Fn(&Link, &Link) -> ConstraintDef,
) {
    let links = chain.len().saturating_sub(1);
    for (n, pair) in chain.windows(2).enumerate() {
        let mut def = build(&pair[0], &pair[1]);
        if links > 1 {
            def.id = ConstraintId::new(format!("{}#{}", id, n + 1));
            def.origin = Some(id.clone());
        }
        out.push(def);
    }
}

/// Map set-level action/role keywords onto static strings so chains do not
/// borrow from the document.
fn intern_keyword(raw: &str) -> Option<&'static str> {
    const KEYWORDS: &[&str] = &[
        "start", "stop", "promote", "demote", "Started", "Promoted", "Unpromoted", "Stopped",
        "Master", "Slave",
    ];
    KEYWORDS.iter().copied().find(|k| k.eq_ignore_ascii_case(raw.trim()))
}

fn version(root: Node<'_, '_>) -> CibVersion {
    let num = |name: &str| attr(root, name).and_then(|v| v.parse().ok()).unwrap_or(0);
    CibVersion {
        admin_epoch: num("admin_epoch"),
        epoch: num("epoch"),
        num_updates: num("num_updates"),
    }
}

/// Parse a resource-manager configuration document.
pub fn parse_cluster_config(input: &str) -> Parsed<ClusterConfig> {
    let doc = match Document::parse(input) {
        Ok(doc) => doc,
        Err(e) => return Parsed::rejected(Source::ClusterConfig, input, format!("invalid XML: {}", e)),
    };
    let root = doc.root_element();
    if !root.has_tag_name("cib") {
        return Parsed::rejected(
            Source::ClusterConfig,
            input,
            format!("unexpected root element <{}>", root.tag_name().name()),
        );
    }
    let Some(configuration) = child(root, "configuration") else {
        return Parsed::rejected(Source::ClusterConfig, input, "document has no <configuration>");
    };

    let mut reader = Reader {
        input,
        unparsed: Vec::new(),
    };
    let mut out = ClusterConfig {
        version: version(root),
        ..ClusterConfig::default()
    };

    if let Some(nodes) = child(configuration, "nodes") {
        for node in elements(nodes).filter(|n| n.has_tag_name("node")) {
            match attr(node, "uname").or_else(|| attr(node, "id")) {
                Some(name) => out.nodes.push(HostId::new(name)),
                None => reader.fragment(node, "node without uname"),
            }
        }
    }

    if let Some(resources) = child(configuration, "resources") {
        for el in elements(resources) {
            reader.resource(el, None, &mut out.resources);
        }
    }

    if let Some(constraints) = child(configuration, "constraints") {
        for el in elements(constraints) {
            reader.constraint(el, &mut out.constraints);
        }
    }

    Parsed {
        value: out,
        unparsed: reader.unparsed,
    }
}
