//! Logical command table.
//!
//! Callers ask for operations by name (`cluster.status`, `storage.primary`)
//! and the table supplies the command line for the installed software. The
//! built-in table targets Pacemaker with DRBD 9; configuration overrides
//! individual entries.

use crate::error::CommandTableError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

const BUILTIN_TABLE: &str = include_str!("default_commands.toml");

/// One table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Command line with `{param}` (quoted) and `{param:raw}` placeholders.
    pub template: String,
    /// Wrap with the host escalation prefix.
    #[serde(default)]
    pub privileged: bool,
    /// Safe to re-run after a reconnect.
    #[serde(default)]
    pub read_only: bool,
    /// Per-command timeout overriding the caller's default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandTemplate {
    /// Unprivileged, mutating template.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            privileged: false,
            read_only: false,
            timeout_secs: None,
        }
    }
}

/// A rendered command ready for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// Logical name it was rendered from.
    pub name: String,
    /// Rendered command line.
    pub line: String,
    /// Needs escalation.
    pub privileged: bool,
    /// Safe to re-run after a reconnect.
    pub read_only: bool,
    /// Timeout override.
    pub timeout: Option<Duration>,
}

impl RemoteCommand {
    /// Ad-hoc unprivileged command, mostly for tests and diagnostics.
    pub fn raw(line: impl Into<String>) -> Self {
        Self {
            name: "raw".to_string(),
            line: line.into(),
            privileged: false,
            read_only: false,
            timeout: None,
        }
    }

    /// The effective timeout given a caller default.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

#[derive(Debug, Deserialize)]
struct TableDocument {
    #[serde(default)]
    commands: BTreeMap<String, CommandTemplate>,
}

/// Logical operation name to command template mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTable {
    entries: BTreeMap<String, CommandTemplate>,
}

impl CommandTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in Pacemaker/DRBD table.
    pub fn builtin() -> Result<Self, CommandTableError> {
        Self::from_toml_str(BUILTIN_TABLE)
    }

    /// Parse a `[commands."name"]` TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, CommandTableError> {
        let doc: TableDocument = toml::from_str(text)?;
        Ok(Self {
            entries: doc.commands,
        })
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, name: impl Into<String>, template: CommandTemplate) {
        self.entries.insert(name.into(), template);
    }

    /// Overlay another table; its entries win.
    pub fn merge(&mut self, overrides: BTreeMap<String, CommandTemplate>) {
        self.entries.extend(overrides);
    }

    /// Look up an entry.
    pub fn get(&self, name: &str) -> Option<&CommandTemplate> {
        self.entries.get(name)
    }

    /// True if an entry exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Render a logical command with parameters.
    pub fn render(
        &self,
        name: &str,
        params: &[(&str, &str)],
    ) -> Result<RemoteCommand, CommandTableError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| CommandTableError::UnknownCommand(name.to_string()))?;
        if entry.template.trim().is_empty() {
            return Err(CommandTableError::Malformed {
                command: name.to_string(),
                detail: "empty template".to_string(),
            });
        }
        let line = substitute(name, &entry.template, params)?;
        Ok(RemoteCommand {
            name: name.to_string(),
            line,
            privileged: entry.privileged,
            read_only: entry.read_only,
            timeout: entry.timeout_secs.map(Duration::from_secs),
        })
    }
}

fn is_param_name(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn substitute(
    command: &str,
    template: &str,
    params: &[(&str, &str)],
) -> Result<String, CommandTableError> {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let inner = &after[..close];
        let (param, raw) = match inner.strip_suffix(":raw") {
            Some(p) => (p, true),
            None => (inner, false),
        };
        if !is_param_name(param) {
            // Not a placeholder (e.g. an awk block); keep it verbatim.
            out.push('{');
            rest = after;
            continue;
        }
        let value = params
            .iter()
            .find(|(k, _)| *k == param)
            .map(|(_, v)| *v)
            .ok_or_else(|| CommandTableError::MissingParameter {
                command: command.to_string(),
                param: param.to_string(),
            })?;
        if raw {
            out.push_str(value);
        } else {
            out.push_str(&shell_quote(value));
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Quote a value for a POSIX shell. Plain words pass through unchanged.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=@,+%".contains(&b));
    if plain {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_loads() {
        let table = CommandTable::builtin().unwrap();
        for name in [
            "cluster.status",
            "cluster.config",
            "storage.status",
            "storage.config",
            "host.net",
            "host.block",
            "sim.script",
        ] {
            assert!(table.contains(name), "missing {}", name);
        }
        let status = table.get("cluster.status").unwrap();
        assert!(status.privileged);
        assert!(status.read_only);
    }

    #[test]
    fn test_render_quotes_params() {
        let table = CommandTable::builtin().unwrap();
        let cmd = table
            .render(
                "resource.set_param",
                &[("resource", "ip1"), ("name", "ip"), ("value", "10.0.0.5 x")],
            )
            .unwrap();
        assert_eq!(
            cmd.line,
            "crm_resource --resource ip1 --set-parameter ip --parameter-value '10.0.0.5 x'"
        );
        assert!(cmd.privileged);
        assert!(!cmd.read_only);
    }

    #[test]
    fn test_render_raw_param() {
        let mut table = CommandTable::new();
        table.insert("x", CommandTemplate::new("a {one:raw} b {two}"));
        let cmd = table.render("x", &[("one", "p | q"), ("two", "it's")]).unwrap();
        assert_eq!(cmd.line, r"a p | q b 'it'\''s'");
    }

    #[test]
    fn test_render_missing_param() {
        let table = CommandTable::builtin().unwrap();
        let err = table.render("storage.up", &[]).unwrap_err();
        assert!(matches!(err, CommandTableError::MissingParameter { ref param, .. } if param == "volume"));
    }

    #[test]
    fn test_render_unknown() {
        let table = CommandTable::new();
        assert!(matches!(
            table.render("nope", &[]),
            Err(CommandTableError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_non_placeholder_braces_kept() {
        let mut table = CommandTable::new();
        table.insert("awk", CommandTemplate::new("awk '{print $1}' {file}"));
        let cmd = table.render("awk", &[("file", "/proc/drbd")]).unwrap();
        assert_eq!(cmd.line, "awk '{print $1}' /proc/drbd");
    }

    #[test]
    fn test_unterminated_brace() {
        let mut table = CommandTable::new();
        table.insert("x", CommandTemplate::new("echo {oops"));
        assert_eq!(table.render("x", &[]).unwrap().line, "echo {oops");
    }

    #[test]
    fn test_timeout_override() {
        let table = CommandTable::builtin().unwrap();
        let cmd = table.render("storage.create_md", &[("volume", "r0")]).unwrap();
        assert_eq!(cmd.timeout, Some(Duration::from_secs(120)));
        assert_eq!(cmd.timeout_or(Duration::from_secs(5)), Duration::from_secs(120));
    }

    #[test]
    fn test_merge_overrides() {
        let mut table = CommandTable::builtin().unwrap();
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "cluster.status".to_string(),
            CommandTemplate::new("crm_mon --output-as=xml"),
        );
        table.merge(overrides);
        assert_eq!(
            table.render("cluster.status", &[]).unwrap().line,
            "crm_mon --output-as=xml"
        );
    }

    #[test]
    fn test_from_toml_str() {
        let table = CommandTable::from_toml_str(
            r#"
[commands."x.y"]
template = "true"
read_only = true
"#,
        )
        .unwrap();
        assert!(table.get("x.y").unwrap().read_only);
        assert!(CommandTable::from_toml_str("commands = 3").is_err());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("r0"), "r0");
        assert_eq!(shell_quote("/dev/drbd0"), "/dev/drbd0");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("<x id=\"1\"/>"), "'<x id=\"1\"/>'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_write_config_template_renders() {
        let table = CommandTable::builtin().unwrap();
        let cmd = table
            .render("storage.write_config", &[("volume", "r0"), ("content", "resource r0 {}")])
            .unwrap();
        assert!(cmd.line.starts_with("sh -c 'printf \"%s\\n\" \"$1\" > \"/etc/drbd.d/$0.res\"' r0 "));
        assert!(cmd.line.ends_with("'resource r0 {}'"));
    }
}
