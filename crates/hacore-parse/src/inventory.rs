//! Host inventory: `ip -o addr show` and `lsblk -P -b`.

use crate::{Fragment, Parsed, Source};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
}

/// One address on one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInterface {
    /// Interface name without the `@peer` suffix.
    pub name: String,
    /// Address family.
    pub family: AddressFamily,
    /// Address without prefix length.
    pub address: String,
    /// Prefix length.
    pub prefix: u8,
}

/// One block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Kernel name (`sda`, `drbd0`).
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// `disk`, `part`, `lvm`, ...
    pub kind: String,
    /// Mount point, if mounted.
    pub mountpoint: Option<String>,
}

/// Network and block inventory of a host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Inventory {
    /// Addresses in output order.
    pub interfaces: Vec<NetInterface>,
    /// Block devices in output order.
    pub block_devices: Vec<BlockDevice>,
}

fn addr_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+:\s+(\S+?)(?:@\S+)?\s+(inet6?)\s+([^\s/]+)/(\d{1,3})\b")
            .expect("static address pattern")
    })
}

fn key_value() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([A-Z][A-Z0-9_:-]*)="((?:[^"\\]|\\.)*)""#).expect("static pair pattern"))
}

fn parse_addresses(text: &str, out: &mut Inventory, unparsed: &mut Vec<Fragment>) {
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let Some(caps) = addr_line().captures(line) else {
            // Link-only lines (`ip -o link`) carry no address; anything else is noise.
            if !line.contains(" link/") {
                unparsed.push(Fragment::new(Source::Inventory, line, "unrecognized address line"));
            }
            continue;
        };
        let Ok(prefix) = caps[4].parse::<u8>() else {
            unparsed.push(Fragment::new(Source::Inventory, line, "invalid prefix length"));
            continue;
        };
        out.interfaces.push(NetInterface {
            name: caps[1].to_string(),
            family: if &caps[2] == "inet6" {
                AddressFamily::Inet6
            } else {
                AddressFamily::Inet
            },
            address: caps[3].to_string(),
            prefix,
        });
    }
}

fn parse_block(text: &str, out: &mut Inventory, unparsed: &mut Vec<Fragment>) {
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let fields: BTreeMap<&str, String> = key_value()
            .captures_iter(line)
            .filter_map(|c| {
                let key = c.get(1)?.as_str();
                let value = c.get(2)?.as_str().replace("\\\"", "\"");
                Some((key, value))
            })
            .collect();
        let (Some(name), Some(size)) = (fields.get("NAME"), fields.get("SIZE")) else {
            unparsed.push(Fragment::new(Source::Inventory, line, "block line without NAME/SIZE"));
            continue;
        };
        let Ok(size_bytes) = size.parse::<u64>() else {
            unparsed.push(Fragment::new(Source::Inventory, line, "block size is not in bytes"));
            continue;
        };
        out.block_devices.push(BlockDevice {
            name: name.clone(),
            size_bytes,
            kind: fields.get("TYPE").cloned().unwrap_or_default(),
            mountpoint: fields.get("MOUNTPOINT").filter(|m| !m.is_empty()).cloned(),
        });
    }
}

/// Parse network and block inventory output.
pub fn parse_inventory(net_text: &str, block_text: &str) -> Parsed<Inventory> {
    let mut out = Inventory::default();
    let mut unparsed = Vec::new();
    parse_addresses(net_text, &mut out, &mut unparsed);
    parse_block(block_text, &mut out, &mut unparsed);
    Parsed {
        value: out,
        unparsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP: &str = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
2: eth0    inet 10.0.0.1/24 brd 10.0.0.255 scope global eth0\\       valid_lft forever preferred_lft forever
2: eth0    inet6 fe80::5054:ff:fe12:3456/64 scope link \\       valid_lft forever preferred_lft forever
5: veth1@if4    inet 172.17.0.1/16 scope global veth1
";

    const LSBLK: &str = r#"NAME="sda" SIZE="21474836480" TYPE="disk" MOUNTPOINT=""
NAME="sda1" SIZE="1073741824" TYPE="part" MOUNTPOINT="/boot"
NAME="drbd0" SIZE="1073676288" TYPE="disk" MOUNTPOINT="/srv/web"
"#;

    #[test]
    fn test_addresses() {
        let inv = parse_inventory(IP, "").value;
        assert_eq!(inv.interfaces.len(), 4);
        assert_eq!(inv.interfaces[1].name, "eth0");
        assert_eq!(inv.interfaces[1].address, "10.0.0.1");
        assert_eq!(inv.interfaces[1].prefix, 24);
        assert_eq!(inv.interfaces[2].family, AddressFamily::Inet6);
        assert_eq!(inv.interfaces[3].name, "veth1");
    }

    #[test]
    fn test_block_devices() {
        let parsed = parse_inventory("", LSBLK);
        assert!(parsed.is_clean());
        let inv = parsed.value;
        assert_eq!(inv.block_devices.len(), 3);
        assert_eq!(inv.block_devices[0].mountpoint, None);
        assert_eq!(inv.block_devices[1].mountpoint.as_deref(), Some("/boot"));
        assert_eq!(inv.block_devices[2].size_bytes, 1_073_676_288);
    }

    #[test]
    fn test_noise_is_fragment() {
        let parsed = parse_inventory("garbage here\n", "NAME=\"sdb\" SIZE=\"10G\" TYPE=\"disk\"\n");
        assert!(parsed.value.interfaces.is_empty());
        assert!(parsed.value.block_devices.is_empty());
        assert_eq!(parsed.unparsed.len(), 2);
    }
}
