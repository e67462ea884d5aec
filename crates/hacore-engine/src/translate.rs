//! Edit ops to remote command lines.
//!
//! Resource-manager ops become configuration XML fed to the command table's
//! `cib.*` and `resource.*` entries; storage ops become `.res` files and
//! `storage.*` commands on each affected leg.

use crate::edit::{AttributeScope, EditOp};
use crate::working::WorkingSet;
use hacore_parse::{ClusterConfig, ConstraintDef, Endpoints, ResourceDef, ResourceKind, VolumeDef};
use hacore_session::{CommandTable, CommandTableError, RemoteCommand};
use hacore_types::{ConstraintId, HostId, LegRole, ResourceId};
use std::collections::BTreeMap;
use std::fmt::Write;

const DEFAULT_STORAGE_PORT: u16 = 7789;

/// Commands for one host, run in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlan {
    /// Host the commands run on.
    pub host: HostId,
    /// Stops at the first failure.
    pub commands: Vec<RemoteCommand>,
}

/// Minimal XML writer with attribute escaping.
pub struct XmlBuilder {
    buf: String,
}

impl XmlBuilder {
    /// Empty document.
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Start `<tag attrs>`.
    pub fn open(&mut self, tag: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.start(tag, attrs);
        self.buf.push('>');
        self
    }

    /// Write `<tag attrs/>`.
    pub fn empty(&mut self, tag: &str, attrs: &[(&str, &str)]) -> &mut Self {
        self.start(tag, attrs);
        self.buf.push_str("/>");
        self
    }

    /// Write `</tag>`.
    pub fn close(&mut self, tag: &str) -> &mut Self {
        self.buf.push_str("</");
        self.buf.push_str(tag);
        self.buf.push('>');
        self
    }

    fn start(&mut self, tag: &str, attrs: &[(&str, &str)]) {
        self.buf.push('<');
        self.buf.push_str(tag);
        for (name, value) in attrs {
            self.buf.push(' ');
            self.buf.push_str(name);
            self.buf.push_str("=\"");
            self.buf.push_str(&escape(value));
            self.buf.push('"');
        }
    }

    /// The XML written so far.
    pub fn finish(self) -> String {
        self.buf
    }
}

impl Default for XmlBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}

/// XML ids allow letters, digits, `-`, `_` and `.`.
fn xml_id(parts: &[&str]) -> String {
    parts
        .join("-")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

fn attribute_set(xml: &mut XmlBuilder, owner: &ResourceId, tag: &str, attrs: &BTreeMap<String, String>) {
    if attrs.is_empty() {
        return;
    }
    let set_id = xml_id(&[owner.as_str(), tag]);
    xml.open(tag, &[("id", set_id.as_str())]);
    for (name, value) in attrs {
        let pair_id = xml_id(&[set_id.as_str(), name.as_str()]);
        xml.empty(
            "nvpair",
            &[("id", pair_id.as_str()), ("name", name.as_str()), ("value", value.as_str())],
        );
    }
    xml.close(tag);
}

fn is_truthy(value: Option<&String>) -> bool {
    value.is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
}

/// Element name a configured resource lives under. Promotable clones read
/// from a legacy `<master>` element carry no `promotable` meta attribute.
pub fn resource_tag(def: &ResourceDef) -> &'static str {
    match def.kind {
        ResourceKind::Primitive => "primitive",
        ResourceKind::Group => "group",
        ResourceKind::Clone if def.promotable && !is_truthy(def.meta_attrs.get("promotable")) => "master",
        ResourceKind::Clone => "clone",
    }
}

/// Full element for `def`. Group and clone children are looked up in
/// `config` and nested.
pub fn resource_xml(def: &ResourceDef, config: &ClusterConfig) -> String {
    let mut xml = XmlBuilder::new();
    write_resource(&mut xml, def, config);
    xml.finish()
}

fn write_resource(xml: &mut XmlBuilder, def: &ResourceDef, config: &ClusterConfig) {
    let id = def.id.as_str();
    match def.kind {
        ResourceKind::Primitive => {
            let mut attrs = vec![("id", id)];
            if let Some((class, provider, kind)) = def.agent_parts() {
                attrs.push(("class", class));
                if let Some(provider) = provider {
                    attrs.push(("provider", provider));
                }
                attrs.push(("type", kind));
            }
            xml.open("primitive", &attrs);
            attribute_set(xml, &def.id, "instance_attributes", &def.instance_attrs);
            attribute_set(xml, &def.id, "meta_attributes", &def.meta_attrs);
            xml.close("primitive");
        }
        ResourceKind::Group | ResourceKind::Clone => {
            let tag = if def.kind == ResourceKind::Group { "group" } else { "clone" };
            let mut meta = def.meta_attrs.clone();
            if def.promotable {
                meta.insert("promotable".to_string(), "true".to_string());
            }
            xml.open(tag, &[("id", id)]);
            attribute_set(xml, &def.id, "meta_attributes", &meta);
            for child in &def.children {
                match config.resource(child) {
                    Some(child_def) => write_resource(xml, child_def, config),
                    None => {
                        xml.empty("primitive", &[("id", child.as_str())]);
                    }
                }
            }
            xml.close(tag);
        }
    }
}

/// Bare element naming one resource, for deletes.
pub fn resource_ref_xml(def: &ResourceDef) -> String {
    let mut xml = XmlBuilder::new();
    xml.empty(resource_tag(def), &[("id", def.id.as_str())]);
    xml.finish()
}

fn constraint_tag(def: &ConstraintDef) -> &'static str {
    match def.endpoints {
        Endpoints::Order { .. } => "rsc_order",
        Endpoints::Colocation { .. } => "rsc_colocation",
        Endpoints::Location { .. } => "rsc_location",
    }
}

fn resource_set(xml: &mut XmlBuilder, set_id: &str, members: &[ResourceId], keyword: Option<(&str, &str)>) {
    let mut attrs = vec![("id", set_id)];
    if let Some(keyword) = keyword {
        attrs.push(keyword);
    }
    xml.open("resource_set", &attrs);
    for member in members {
        xml.empty("resource_ref", &[("id", member.as_str())]);
    }
    xml.close("resource_set");
}

/// Constraint element. Single-resource endpoints use the plain attribute
/// form; anything larger becomes a two-set chain.
pub fn constraint_xml(def: &ConstraintDef) -> String {
    let mut xml = XmlBuilder::new();
    let id = def.id.as_str();
    let score = def.score.to_string();
    match &def.endpoints {
        Endpoints::Order {
            first,
            then,
            first_action,
            then_action,
        } => {
            if let ([first], [then]) = (first.as_slice(), then.as_slice()) {
                let mut attrs = vec![("id", id), ("first", first.as_str()), ("then", then.as_str())];
                if let Some(action) = first_action {
                    attrs.push(("first-action", action.as_str()));
                }
                if let Some(action) = then_action {
                    attrs.push(("then-action", action.as_str()));
                }
                attrs.push(("score", score.as_str()));
                xml.empty("rsc_order", &attrs);
            } else {
                xml.open("rsc_order", &[("id", id), ("score", score.as_str())]);
                resource_set(&mut xml, &xml_id(&[id, "set", "1"]), first, first_action.map(|a| ("action", a.as_str())));
                resource_set(&mut xml, &xml_id(&[id, "set", "2"]), then, then_action.map(|a| ("action", a.as_str())));
                xml.close("rsc_order");
            }
        }
        Endpoints::Colocation {
            rsc,
            with,
            rsc_role,
            with_role,
        } => {
            if let ([rsc], [with]) = (rsc.as_slice(), with.as_slice()) {
                let mut attrs = vec![("id", id), ("rsc", rsc.as_str()), ("with-rsc", with.as_str())];
                if let Some(role) = rsc_role {
                    attrs.push(("rsc-role", role.as_str()));
                }
                if let Some(role) = with_role {
                    attrs.push(("with-rsc-role", role.as_str()));
                }
                attrs.push(("score", score.as_str()));
                xml.empty("rsc_colocation", &attrs);
            } else {
                // In a set chain each later set is placed with the earlier one.
                xml.open("rsc_colocation", &[("id", id), ("score", score.as_str())]);
                resource_set(&mut xml, &xml_id(&[id, "set", "1"]), with, with_role.map(|r| ("role", r.as_str())));
                resource_set(&mut xml, &xml_id(&[id, "set", "2"]), rsc, rsc_role.map(|r| ("role", r.as_str())));
                xml.close("rsc_colocation");
            }
        }
        Endpoints::Location { resource, host } => {
            xml.empty(
                "rsc_location",
                &[("id", id), ("rsc", resource.as_str()), ("node", host.as_str()), ("score", score.as_str())],
            );
        }
    }
    xml.finish()
}

/// Bare element naming one configured constraint, for deletes.
pub fn constraint_ref_xml(def: &ConstraintDef) -> String {
    let mut xml = XmlBuilder::new();
    xml.empty(constraint_tag(def), &[("id", def.cib_id().as_str())]);
    xml.finish()
}

/// `.res` file for a two-legged volume.
pub fn volume_res(def: &VolumeDef) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "resource {} {{", def.id);
    if let Some(protocol) = &def.protocol {
        let _ = writeln!(out, "  net {{\n    protocol {};\n  }}", protocol);
    }
    for leg in &def.legs {
        let _ = writeln!(out, "  on {} {{", leg.host);
        if let Some(node_id) = leg.node_id {
            let _ = writeln!(out, "    node-id {};", node_id);
        }
        let _ = writeln!(out, "    device {};", leg.device);
        let _ = writeln!(out, "    disk {};", leg.disk);
        let _ = writeln!(out, "    meta-disk {};", leg.meta_disk);
        let port = leg.port.unwrap_or(DEFAULT_STORAGE_PORT);
        if leg.address.contains(':') {
            let _ = writeln!(out, "    address ipv6 [{}]:{};", leg.address, port);
        } else {
            let _ = writeln!(out, "    address {}:{};", leg.address, port);
        }
        let _ = writeln!(out, "  }}");
    }
    out.push('}');
    out
}

fn cib(table: &CommandTable, name: &str, scope: &str, xml: &str) -> Result<RemoteCommand, CommandTableError> {
    table.render(name, &[("scope", scope), ("xml", xml)])
}

/// Resource-manager commands for `op` given the state before it runs.
/// Storage ops yield nothing.
pub fn cluster_commands(
    op: &EditOp,
    ws: &WorkingSet,
    table: &CommandTable,
) -> Result<Vec<RemoteCommand>, CommandTableError> {
    match op {
        EditOp::AddResource { spec } => {
            let mut commands = Vec::new();
            // Wrapped resources move under the new parent.
            for child in &spec.children {
                if let Some(def) = ws.resource(child) {
                    commands.push(cib(table, "cib.delete", "resources", &resource_ref_xml(def))?);
                }
            }
            commands.push(cib(table, "cib.create", "resources", &resource_xml(spec, &ws.config))?);
            Ok(commands)
        }
        EditOp::RemoveResource { id } => {
            let xml = match ws.resource(id) {
                Some(def) => resource_ref_xml(def),
                None => {
                    let mut xml = XmlBuilder::new();
                    xml.empty("primitive", &[("id", id.as_str())]);
                    xml.finish()
                }
            };
            Ok(vec![cib(table, "cib.delete", "resources", &xml)?])
        }
        EditOp::SetAttribute {
            resource,
            scope,
            name,
            value,
        } => {
            let command = match (scope, value) {
                (AttributeScope::Instance, Some(value)) => table.render(
                    "resource.set_param",
                    &[("resource", resource.as_str()), ("name", name.as_str()), ("value", value.as_str())],
                ),
                (AttributeScope::Meta, Some(value)) => table.render(
                    "resource.set_meta",
                    &[("resource", resource.as_str()), ("name", name.as_str()), ("value", value.as_str())],
                ),
                (AttributeScope::Instance, None) => table.render(
                    "resource.delete_param",
                    &[("resource", resource.as_str()), ("name", name.as_str())],
                ),
                (AttributeScope::Meta, None) => table.render(
                    "resource.delete_meta",
                    &[("resource", resource.as_str()), ("name", name.as_str())],
                ),
            }?;
            Ok(vec![command])
        }
        EditOp::AddConstraint { constraint } => {
            Ok(vec![cib(table, "cib.create", "constraints", &constraint_xml(constraint))?])
        }
        EditOp::RemoveConstraint { id } => {
            let mut seen: Vec<&ConstraintId> = Vec::new();
            let mut commands = Vec::new();
            for def in ws.constraints_for(id) {
                if !seen.contains(&def.cib_id()) {
                    seen.push(def.cib_id());
                    commands.push(cib(table, "cib.delete", "constraints", &constraint_ref_xml(def))?);
                }
            }
            Ok(commands)
        }
        EditOp::AddVolume { .. }
        | EditOp::RemoveVolume { .. }
        | EditOp::SetVolumeRole { .. }
        | EditOp::SetVolumeConnection { .. } => Ok(Vec::new()),
    }
}

/// Per-host plans for `op`. Resource-manager ops run on `authoritative`;
/// storage ops run on the legs they touch.
pub fn plan(
    op: &EditOp,
    ws: &WorkingSet,
    table: &CommandTable,
    authoritative: &HostId,
) -> Result<Vec<HostPlan>, CommandTableError> {
    let volume_cmd = |name: &str, volume: &str| table.render(name, &[("volume", volume)]);
    let plans = match op {
        EditOp::AddVolume { spec } => {
            let content = volume_res(spec);
            let id = spec.id.as_str();
            spec.legs
                .iter()
                .map(|leg| {
                    Ok(HostPlan {
                        host: leg.host.clone(),
                        commands: vec![
                            table.render("storage.write_config", &[("volume", id), ("content", content.as_str())])?,
                            volume_cmd("storage.create_md", id)?,
                            volume_cmd("storage.up", id)?,
                        ],
                    })
                })
                .collect::<Result<Vec<_>, CommandTableError>>()?
        }
        EditOp::RemoveVolume { id } => ws
            .volumes
            .get(id)
            .map(|v| v.hosts())
            .unwrap_or_default()
            .into_iter()
            .map(|host| {
                Ok(HostPlan {
                    host,
                    commands: vec![
                        volume_cmd("storage.down", id.as_str())?,
                        volume_cmd("storage.remove_config", id.as_str())?,
                    ],
                })
            })
            .collect::<Result<Vec<_>, CommandTableError>>()?,
        EditOp::SetVolumeRole { volume, host, role } => {
            let name = match role {
                LegRole::Primary => "storage.primary",
                _ => "storage.secondary",
            };
            vec![HostPlan {
                host: host.clone(),
                commands: vec![volume_cmd(name, volume.as_str())?],
            }]
        }
        EditOp::SetVolumeConnection { volume, connected } => {
            let name = if *connected { "storage.connect" } else { "storage.disconnect" };
            ws.volumes
                .get(volume)
                .map(|v| v.hosts())
                .unwrap_or_default()
                .into_iter()
                .map(|host| {
                    Ok(HostPlan {
                        host,
                        commands: vec![volume_cmd(name, volume.as_str())?],
                    })
                })
                .collect::<Result<Vec<_>, CommandTableError>>()?
        }
        _ => vec![HostPlan {
            host: authoritative.clone(),
            commands: cluster_commands(op, ws, table)?,
        }],
    };
    Ok(plans)
}
