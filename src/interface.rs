use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::command::CommandRunner;
use crate::constants::{TIMEOUT_LIST, TIMEOUT_STATUS};
use crate::error::CommandError;
use crate::validate::{MAC_IN_TEXT, is_valid_interface_name, normalize_mac};

static IPV4_IN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\binet (?:addr:)?(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").expect("valid regex")
});

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Up => f.pad("up"),
            Self::Down => f.pad("down"),
            Self::Unknown => f.pad("unknown"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Ethernet,
    Wireless,
    Loopback,
    Bridge,
    Tunnel,
    Container,
    #[default]
    Unknown,
}

impl InterfaceKind {
    /// Guess the kind of an interface from its name. This is classification
    /// only and never fails.
    pub fn guess(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let has_prefix = |prefixes: &[&str]| prefixes.iter().any(|p| name.starts_with(p));
        if has_prefix(&["eth", "en"]) {
            Self::Ethernet
        } else if has_prefix(&["wlan", "wl", "wifi"]) {
            Self::Wireless
        } else if has_prefix(&["lo"]) {
            Self::Loopback
        } else if has_prefix(&["br"]) {
            Self::Bridge
        } else if has_prefix(&["tun"]) {
            Self::Tunnel
        } else if has_prefix(&["docker"]) {
            Self::Container
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Ethernet => "ethernet",
            Self::Wireless => "wireless",
            Self::Loopback => "loopback",
            Self::Bridge => "bridge",
            Self::Tunnel => "tunnel",
            Self::Container => "container",
            Self::Unknown => "unknown",
        };
        f.pad(s)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InterfaceRecord {
    pub name: String,
    pub mac_address: Option<String>,
    #[serde(default)]
    pub status: LinkStatus,
    #[serde(rename = "type", default)]
    pub kind: InterfaceKind,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl InterfaceRecord {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            mac_address: None,
            status: LinkStatus::Unknown,
            kind: InterfaceKind::guess(name),
            ip_address: None,
        }
    }
}

pub type Interfaces = BTreeMap<String, InterfaceRecord>;

#[derive(Debug, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub reason: &'static str,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// Parse the output of `ifconfig -a`.
///
/// Handles both the net-tools 2.x layout (`eth0: flags=4163<UP,...>`) and the
/// older one (`eth0  Link encap:Ethernet  HWaddr ...`), as well as the BSD
/// layout used on macOS. Indented lines that are not understood are skipped.
/// Records whose names cannot be targeted for a change (e.g. `lo`) are left
/// out.
pub fn parse_interfaces(text: &str) -> Result<Interfaces, ParseError> {
    let mut interfaces = Interfaces::new();
    let mut current: Option<InterfaceRecord> = None;
    let mut seen_header = false;

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indented = line.starts_with(' ') || line.starts_with('\t');
        if !indented {
            seen_header = true;
            if let Some(record) = current.take() {
                keep_record(&mut interfaces, record);
            }
            let name = line
                .split_whitespace()
                .next()
                .map(|token| token.trim_end_matches(':'))
                .unwrap_or_default();
            if name.is_empty() {
                return Err(ParseError {
                    line: i + 1,
                    reason: "interface header without a name",
                });
            }
            let mut record = InterfaceRecord::new(name);
            record.status = if has_up_flag(line) {
                LinkStatus::Up
            } else {
                LinkStatus::Down
            };
            // The older layout reports the address on the header line.
            if has_address_marker(line) {
                record.mac_address = find_mac(line);
            }
            current = Some(record);
            continue;
        }
        if !seen_header {
            return Err(ParseError {
                line: i + 1,
                reason: "indented line before any interface header",
            });
        }
        let Some(record) = current.as_mut() else {
            continue;
        };
        if has_address_marker(line) && record.mac_address.is_none() {
            record.mac_address = find_mac(line);
        } else if let Some(captures) = IPV4_IN_TEXT.captures(line) {
            if record.ip_address.is_none() {
                record.ip_address = Some(captures[1].to_string());
            }
        } else if line.split_whitespace().next() == Some("UP") {
            // Older layout keeps the flags on their own line.
            record.status = LinkStatus::Up;
        }
    }
    if let Some(record) = current.take() {
        keep_record(&mut interfaces, record);
    }
    Ok(interfaces)
}

fn keep_record(interfaces: &mut Interfaces, record: InterfaceRecord) {
    if is_valid_interface_name(&record.name) {
        interfaces.insert(record.name.clone(), record);
    } else {
        debug!("Skipping interface {} with unsupported name", &record.name);
    }
}

fn has_up_flag(header: &str) -> bool {
    header
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|token| token == "UP")
}

fn has_address_marker(line: &str) -> bool {
    line.split_whitespace()
        .any(|token| token == "ether" || token == "HWaddr")
}

fn find_mac(text: &str) -> Option<String> {
    MAC_IN_TEXT
        .find(text)
        .and_then(|m| normalize_mac(m.as_str()).ok())
}

/// Reads interface state through the status tool.
pub struct Inspector<R: CommandRunner> {
    runner: R,
}

impl<R: CommandRunner> Inspector<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn interface_exists(&self, name: &str) -> bool {
        match self.runner.run(&[name], TIMEOUT_STATUS) {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("Unable to query interface {}: {}", name, e);
                false
            }
        }
    }

    /// Snapshot every interface. Only a failure of the tool itself is an
    /// error; output that cannot be parsed yields an empty mapping.
    pub fn list_interfaces(&self) -> Result<Interfaces, CommandError> {
        let output = self.runner.run_checked(&["-a"], TIMEOUT_LIST)?;
        match parse_interfaces(&output.stdout) {
            Ok(interfaces) => Ok(interfaces),
            Err(e) => {
                warn!("Unable to parse interface list: {}", e);
                Ok(Interfaces::new())
            }
        }
    }

    /// Names of all interfaces that can be targeted, sorted.
    pub fn available_interfaces(&self) -> Vec<String> {
        match self.list_interfaces() {
            Ok(interfaces) => interfaces.into_keys().collect(),
            Err(e) => {
                warn!("Could not retrieve interface list: {}", e);
                Vec::new()
            }
        }
    }

    /// Current MAC address of an interface. `None` means unknown.
    pub fn get_mac(&self, name: &str) -> Option<String> {
        match self.runner.run_checked(&[name], TIMEOUT_STATUS) {
            Ok(output) => {
                let mac = output
                    .stdout
                    .lines()
                    .find(|line| has_address_marker(line))
                    .and_then(find_mac)
                    .or_else(|| find_mac(&output.stdout));
                if mac.is_none() {
                    debug!("No MAC address found for interface {}", name);
                }
                mac
            }
            Err(e) => {
                debug!("Unable to get MAC address of {}: {}", name, e);
                None
            }
        }
    }
}
