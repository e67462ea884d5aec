//! Replicated-storage configuration (`drbdadm dump`).
//!
//! The dump is a brace-structured statement list. It is tokenized into a
//! generic section tree first and interpreted second, so unknown sections
//! never derail the parser.

use crate::{Fragment, Parsed, Source};
use hacore_types::{HostId, VolumeId};
use serde::{Deserialize, Serialize};

/// One leg of a volume as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegDef {
    /// Node the leg lives on.
    pub host: HostId,
    /// Replicated block device (`/dev/drbd0`).
    pub device: String,
    /// Backing disk.
    pub disk: String,
    /// Meta-data location (`internal` or a device).
    pub meta_disk: String,
    /// Replication address.
    pub address: String,
    /// Replication port.
    pub port: Option<u16>,
    /// Node id for multi-peer configurations.
    #[serde(default)]
    pub node_id: Option<u32>,
}

/// A configured volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDef {
    /// Volume (DRBD resource) name.
    pub id: VolumeId,
    /// Legs in configuration order.
    pub legs: Vec<LegDef>,
    /// Replication protocol (`A`, `B`, `C`).
    #[serde(default)]
    pub protocol: Option<String>,
}

impl VolumeDef {
    /// Leg on `host`.
    pub fn leg(&self, host: &HostId) -> Option<&LegDef> {
        self.legs.iter().find(|l| &l.host == host)
    }
}

/// Parsed storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Volumes in configuration order.
    pub volumes: Vec<VolumeDef>,
}

impl StorageConfig {
    /// Volume by id.
    pub fn volume(&self, id: &VolumeId) -> Option<&VolumeDef> {
        self.volumes.iter().find(|v| &v.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Open,
    Close,
    End,
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for line in input.lines() {
        let mut chars = line.chars().peekable();
        while let Some(&c) = chars.peek() {
            match c {
                '#' => break,
                '{' => {
                    chars.next();
                    tokens.push(Token::Open);
                }
                '}' => {
                    chars.next();
                    tokens.push(Token::Close);
                }
                ';' => {
                    chars.next();
                    tokens.push(Token::End);
                }
                '"' => {
                    chars.next();
                    let mut word = String::new();
                    for c in chars.by_ref() {
                        if c == '"' {
                            break;
                        }
                        word.push(c);
                    }
                    tokens.push(Token::Word(word));
                }
                c if c.is_whitespace() => {
                    chars.next();
                }
                _ => {
                    let mut word = String::new();
                    while let Some(&c) = chars.peek() {
                        if c.is_whitespace() || matches!(c, '{' | '}' | ';' | '#') {
                            break;
                        }
                        word.push(c);
                        chars.next();
                    }
                    tokens.push(Token::Word(word));
                }
            }
        }
    }
    tokens
}

/// A statement (`words ;`) or a section (`words { ... }`).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    words: Vec<String>,
    body: Option<Vec<Section>>,
}

impl Section {
    fn keyword(&self) -> &str {
        self.words.first().map(String::as_str).unwrap_or_default()
    }

    fn args(&self) -> &[String] {
        self.words.get(1..).unwrap_or_default()
    }

    fn children(&self) -> &[Section] {
        self.body.as_deref().unwrap_or_default()
    }

    fn render(&self) -> String {
        match &self.body {
            Some(_) => format!("{} {{ ... }}", self.words.join(" ")),
            None => format!("{};", self.words.join(" ")),
        }
    }
}

fn build(tokens: &[Token], pos: &mut usize, depth: usize) -> Result<Vec<Section>, String> {
    let mut sections = Vec::new();
    let mut words = Vec::new();
    while *pos < tokens.len() {
        let token = &tokens[*pos];
        *pos += 1;
        match token {
            Token::Word(w) => words.push(w.clone()),
            Token::End => {
                if !words.is_empty() {
                    sections.push(Section {
                        words: std::mem::take(&mut words),
                        body: None,
                    });
                }
            }
            Token::Open => {
                let body = build(tokens, pos, depth + 1)?;
                sections.push(Section {
                    words: std::mem::take(&mut words),
                    body: Some(body),
                });
            }
            Token::Close => {
                if depth == 0 {
                    return Err("unbalanced '}'".to_string());
                }
                if !words.is_empty() {
                    return Err(format!("statement '{}' missing ';'", words.join(" ")));
                }
                return Ok(sections);
            }
        }
    }
    if depth > 0 {
        return Err("unterminated section".to_string());
    }
    if !words.is_empty() {
        return Err(format!("statement '{}' missing ';'", words.join(" ")));
    }
    Ok(sections)
}

/// Settings that may appear in a resource, a volume or an `on` section.
#[derive(Debug, Default, Clone)]
struct LegSettings {
    device: Option<String>,
    disk: Option<String>,
    meta_disk: Option<String>,
}

impl LegSettings {
    fn absorb(&mut self, statement: &Section) -> bool {
        let args = statement.args();
        match statement.keyword() {
            "device" => {
                // `device /dev/drbd0 [minor 0]` or `device minor 0`.
                let path = args.iter().find(|a| a.starts_with('/')).cloned();
                let minor = args
                    .iter()
                    .position(|a| a == "minor")
                    .and_then(|i| args.get(i + 1))
                    .map(|m| format!("/dev/drbd{}", m));
                self.device = path.or(minor);
                true
            }
            "disk" if statement.body.is_none() => {
                self.disk = args.first().cloned();
                true
            }
            "meta-disk" => {
                self.meta_disk = Some(args.join(" "));
                true
            }
            _ => false,
        }
    }

    fn from_sections(sections: &[Section], base: &LegSettings) -> LegSettings {
        let mut settings = base.clone();
        for s in sections.iter().filter(|s| s.body.is_none()) {
            settings.absorb(s);
        }
        // First volume block supplies anything still missing.
        if let Some(volume) = sections.iter().find(|s| s.keyword() == "volume" && s.body.is_some()) {
            let mut inner = LegSettings::default();
            for s in volume.children() {
                inner.absorb(s);
            }
            settings.device = inner.device.or(settings.device);
            settings.disk = inner.disk.or(settings.disk);
            settings.meta_disk = inner.meta_disk.or(settings.meta_disk);
        }
        settings
    }
}

/// `address [family] ip:port`.
fn split_address(args: &[String]) -> (String, Option<u16>) {
    let Some(last) = args.last() else {
        return (String::new(), None);
    };
    // IPv6 addresses are bracketed: [fd00::1]:7789
    if let Some(rest) = last.strip_prefix('[') {
        if let Some((host, port)) = rest.split_once("]:") {
            return (host.to_string(), port.parse().ok());
        }
        return (rest.trim_end_matches(']').to_string(), None);
    }
    match last.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().ok()),
        None => (last.clone(), None),
    }
}

fn interpret_resource(
    section: &Section,
    unparsed: &mut Vec<Fragment>,
) -> Option<VolumeDef> {
    let Some(name) = section.args().first() else {
        unparsed.push(Fragment::new(Source::StorageConfig, &section.render(), "resource without name"));
        return None;
    };
    let body = section.children();
    let base = LegSettings::from_sections(body, &LegSettings::default());
    let mut volume = VolumeDef {
        id: VolumeId::new(name),
        legs: Vec::new(),
        protocol: None,
    };

    for s in body {
        match (s.keyword(), &s.body) {
            ("on", Some(leg_body)) => {
                let Some(host) = s.args().first() else {
                    unparsed.push(Fragment::new(Source::StorageConfig, &s.render(), "'on' without host"));
                    continue;
                };
                let settings = LegSettings::from_sections(leg_body, &base);
                let (address, port) = leg_body
                    .iter()
                    .find(|x| x.keyword() == "address" && x.body.is_none())
                    .map(|x| split_address(x.args()))
                    .unwrap_or_default();
                let node_id = leg_body
                    .iter()
                    .find(|x| x.keyword() == "node-id")
                    .and_then(|x| x.args().first())
                    .and_then(|v| v.parse().ok());
                volume.legs.push(LegDef {
                    host: HostId::new(host),
                    device: settings.device.unwrap_or_default(),
                    disk: settings.disk.unwrap_or_default(),
                    meta_disk: settings.meta_disk.unwrap_or_else(|| "internal".to_string()),
                    address,
                    port,
                    node_id,
                });
            }
            ("protocol", None) => volume.protocol = s.args().first().cloned(),
            ("net", Some(net)) => {
                if let Some(p) = net.iter().find(|x| x.keyword() == "protocol") {
                    volume.protocol = p.args().first().cloned();
                }
            }
            ("floating", _) | ("stacked-on-top-of", _) => unparsed.push(Fragment::new(
                Source::StorageConfig,
                &s.render(),
                "unsupported leg section",
            )),
            _ => {}
        }
    }
    Some(volume)
}

/// Parse storage configuration text.
pub fn parse_storage_config(input: &str) -> Parsed<StorageConfig> {
    let tokens = tokenize(input);
    let mut pos = 0;
    let sections = match build(&tokens, &mut pos, 0) {
        Ok(sections) => sections,
        Err(reason) => return Parsed::rejected(Source::StorageConfig, input, reason),
    };

    let mut out = StorageConfig::default();
    let mut unparsed = Vec::new();
    for section in &sections {
        match (section.keyword(), section.body.is_some()) {
            ("resource", true) => {
                if let Some(volume) = interpret_resource(section, &mut unparsed) {
                    out.volumes.push(volume);
                }
            }
            ("global", true) | ("common", true) | ("skip", true) => {}
            _ => unparsed.push(Fragment::new(
                Source::StorageConfig,
                &section.render(),
                "unexpected top-level section",
            )),
        }
    }
    Parsed {
        value: out,
        unparsed,
    }
}
