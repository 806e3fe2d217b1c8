use std::{
    collections::HashMap,
    fmt, fs,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::InstallerError;

// ── Secret ────────────────────────────────────────────────────────────────────

/// A value that must never show up in logs, `Debug` output or argv.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

// ── Installation parameters ──────────────────────────────────────────────────

/// Which disk to install onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskChoice {
    /// Pick the largest disk reported by lsblk.
    Auto,
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyboard {
    pub model: String,
    pub layout: String,
    pub variant: String,
}

/// A static address in CIDR form plus an optional gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAddress {
    pub cidr: String,
    pub gateway: Option<String>,
}

impl StaticAddress {
    /// The address without its prefix length.
    pub fn address(&self) -> &str {
        self.cidr.split('/').next().unwrap_or(&self.cidr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub interface: String,
    pub ipv4: Option<StaticAddress>,
    pub ipv6: Option<StaticAddress>,
    pub dns: Vec<String>,
}

impl Network {
    pub fn is_static(&self) -> bool {
        self.ipv4.is_some() || self.ipv6.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ssh {
    pub port: u16,
    pub allow_users: Vec<String>,
}

/// Everything read from the configuration file. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub disk: DiskChoice,
    pub passphrase: Secret,
    pub hostname: String,
    pub fqdn: String,
    pub release: String,
    pub mirror: String,
    pub locale: String,
    pub keyboard: Keyboard,
    pub timezone: String,
    pub network: Network,
    pub ntp_servers: Vec<String>,
    pub ssh: Ssh,
    pub root_password: Option<Secret>,
    pub root_ssh_key: Option<String>,
    pub extra_packages: Vec<String>,
    pub zero_fill: bool,
}

const KNOWN_KEYS: &[&str] = &[
    "DISK",
    "ZFS_PASSPHRASE",
    "HOSTNAME",
    "FQDN",
    "RELEASE",
    "MIRROR",
    "LOCALE",
    "KEYBOARD_MODEL",
    "KEYBOARD_LAYOUT",
    "KEYBOARD_VARIANT",
    "TIMEZONE",
    "NET_INTERFACE",
    "IPV4_ADDRESS",
    "IPV4_GATEWAY",
    "IPV6_ADDRESS",
    "IPV6_GATEWAY",
    "DNS_SERVERS",
    "NTP_SERVERS",
    "SSH_PORT",
    "SSH_ALLOW_USERS",
    "ROOT_PASSWORD",
    "ROOT_SSH_KEY",
    "EXTRA_PACKAGES",
    "ZERO_FILL",
];

impl Config {
    /// Reads and validates the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, InstallerError> {
        if !path.is_file() {
            return Err(InstallerError::ConfigNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let vars = parse_vars(&content).map_err(|(line, reason)| InstallerError::ConfigParse {
            path: path.to_path_buf(),
            line,
            reason,
        })?;
        Self::from_vars(&vars)
    }

    /// Builds a config from already-parsed variables, applying defaults.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, InstallerError> {
        for key in vars.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!("ignoring unknown setting {}", key);
            }
        }

        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or(default).to_string();

        let disk = match get("DISK") {
            None => return Err(InstallerError::MissingSetting("DISK")),
            Some(v) if v.eq_ignore_ascii_case("auto") => DiskChoice::Auto,
            Some(v) => DiskChoice::Path(PathBuf::from(v)),
        };

        // The passphrase is taken verbatim: surrounding spaces are significant.
        let passphrase = match vars.get("ZFS_PASSPHRASE").filter(|v| !v.is_empty()) {
            None => return Err(InstallerError::MissingSetting("ZFS_PASSPHRASE")),
            Some(v) => v.clone(),
        };
        // ZFS counts bytes, not characters.
        let len = passphrase.len();
        if !(8..=512).contains(&len) {
            return Err(InstallerError::InvalidSetting {
                key: "ZFS_PASSPHRASE",
                reason: format!("must be 8 to 512 bytes long, got {}", len),
            });
        }

        let hostname = or("HOSTNAME", "debian");
        if !is_valid_hostname(&hostname) {
            return Err(InstallerError::InvalidSetting {
                key: "HOSTNAME",
                reason: format!("'{}' is not a valid host name", hostname),
            });
        }
        let fqdn = or("FQDN", &hostname);

        let ssh_port = match get("SSH_PORT") {
            None => 22,
            Some(v) => match v.parse::<u16>() {
                Ok(p) if p != 0 => p,
                _ => {
                    return Err(InstallerError::InvalidSetting {
                        key: "SSH_PORT",
                        reason: format!("'{}' is not a port number", v),
                    })
                }
            },
        };

        let ipv4 = static_address(get("IPV4_ADDRESS"), get("IPV4_GATEWAY"), Family::V4)?;
        let ipv6 = static_address(get("IPV6_ADDRESS"), get("IPV6_GATEWAY"), Family::V6)?;

        let zero_fill = match get("ZERO_FILL") {
            None => true,
            Some(v) => parse_bool(v).ok_or_else(|| InstallerError::InvalidSetting {
                key: "ZERO_FILL",
                reason: format!("expected yes or no, got '{}'", v),
            })?,
        };

        let allow_users = match get("SSH_ALLOW_USERS") {
            Some(v) => split_list(v),
            None => vec!["root".to_string()],
        };
        let ntp_servers = match get("NTP_SERVERS") {
            Some(v) => split_list(v),
            None => vec![
                "0.debian.pool.ntp.org".to_string(),
                "1.debian.pool.ntp.org".to_string(),
            ],
        };

        Ok(Config {
            disk,
            passphrase: Secret::new(passphrase),
            hostname,
            fqdn,
            release: or("RELEASE", "bookworm"),
            mirror: or("MIRROR", "http://deb.debian.org/debian"),
            locale: or("LOCALE", "en_US.UTF-8"),
            keyboard: Keyboard {
                model: or("KEYBOARD_MODEL", "pc105"),
                layout: or("KEYBOARD_LAYOUT", "us"),
                variant: or("KEYBOARD_VARIANT", ""),
            },
            timezone: or("TIMEZONE", "Etc/UTC"),
            network: Network {
                interface: or("NET_INTERFACE", "eth0"),
                ipv4,
                ipv6,
                dns: get("DNS_SERVERS").map(split_list).unwrap_or_default(),
            },
            ntp_servers,
            ssh: Ssh {
                port: ssh_port,
                allow_users,
            },
            root_password: vars
                .get("ROOT_PASSWORD")
                .filter(|v| !v.is_empty())
                .map(|v| Secret::new(v.clone())),
            root_ssh_key: get("ROOT_SSH_KEY").map(str::to_string),
            extra_packages: get("EXTRA_PACKAGES").map(split_list).unwrap_or_default(),
            zero_fill,
        })
    }
}

// ── Validation helpers ────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Family {
    V4,
    V6,
}

fn static_address(
    cidr: Option<&str>,
    gateway: Option<&str>,
    family: Family,
) -> Result<Option<StaticAddress>, InstallerError> {
    let (addr_key, gw_key) = match family {
        Family::V4 => ("IPV4_ADDRESS", "IPV4_GATEWAY"),
        Family::V6 => ("IPV6_ADDRESS", "IPV6_GATEWAY"),
    };

    let Some(cidr) = cidr else {
        if gateway.is_some() {
            return Err(InstallerError::InvalidSetting {
                key: gw_key,
                reason: format!("set without {}", addr_key),
            });
        }
        return Ok(None);
    };

    let invalid = |key: &'static str, value: &str| InstallerError::InvalidSetting {
        key,
        reason: format!("'{}' is not a valid address for this family", value),
    };

    let (addr, prefix) = cidr.split_once('/').ok_or_else(|| InstallerError::InvalidSetting {
        key: addr_key,
        reason: format!("'{}' needs a /prefix length", cidr),
    })?;
    let max_prefix = match family {
        Family::V4 => 32,
        Family::V6 => 128,
    };
    if !prefix.parse::<u8>().map(|p| p <= max_prefix).unwrap_or(false) {
        return Err(InstallerError::InvalidSetting {
            key: addr_key,
            reason: format!("'{}' has an invalid prefix length", cidr),
        });
    }
    if !matches_family(addr, family) {
        return Err(invalid(addr_key, addr));
    }
    if let Some(gw) = gateway {
        if !matches_family(gw, family) {
            return Err(invalid(gw_key, gw));
        }
    }

    Ok(Some(StaticAddress {
        cidr: cidr.to_string(),
        gateway: gateway.map(str::to_string),
    }))
}

fn matches_family(addr: &str, family: Family) -> bool {
    match family {
        Family::V4 => addr.parse::<Ipv4Addr>().is_ok(),
        Family::V6 => addr.parse::<Ipv6Addr>().is_ok(),
    }
}

/// RFC 1123 label: 1-63 alphanumerics or dashes, no leading/trailing dash.
fn is_valid_hostname(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && name.parse::<IpAddr>().is_err()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" | "on" | "1" => Some(true),
        "no" | "n" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Splits a list written with spaces and/or commas.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── KEY=value parser ──────────────────────────────────────────────────────────
//
// dotenvy does the lexing (comments, `export`, quotes, `$VAR` expansion).
// Shell arrays are flattened into a quoted string first:
//
//   EXTRA_PACKAGES=(vim htop 'tmux')   →   EXTRA_PACKAGES="vim htop tmux"

type ParseError = (usize, String);

/// Parses the whole file. Errors carry the 1-based line number.
pub fn parse_vars(content: &str) -> Result<HashMap<String, String>, ParseError> {
    let content = flatten_arrays(content)?;
    let mut vars = HashMap::new();

    for item in dotenvy::from_read_iter(content.as_bytes()) {
        match item {
            Ok((key, value)) => {
                vars.insert(key, value);
            }
            Err(dotenvy::Error::LineParse(text, _)) => {
                let text = text.trim();
                return Err((line_of(&content, text), format!("cannot parse '{}'", text)));
            }
            Err(e) => return Err((0, e.to_string())),
        }
    }

    Ok(vars)
}

/// Rewrites `KEY=(a b 'c')` as `KEY="a b c"`, one line for one line.
fn flatten_arrays(content: &str) -> Result<String, ParseError> {
    let mut out = String::with_capacity(content.len());

    for (idx, line) in content.lines().enumerate() {
        match line.split_once("=(") {
            Some((head, rest)) if is_assignment_head(head) => {
                let (inner, tail) = rest
                    .split_once(')')
                    .ok_or_else(|| (idx + 1, "unterminated array, expected ')'".to_string()))?;
                let items: Vec<&str> = inner
                    .split_whitespace()
                    .map(|w| w.trim_matches(|c| c == '\'' || c == '"'))
                    .collect();
                out.push_str(&format!("{}=\"{}\"{}", head, items.join(" "), tail));
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }

    Ok(out)
}

/// `KEY` or `export KEY`, nothing else.
fn is_assignment_head(head: &str) -> bool {
    let key = head.trim_start();
    let key = key.strip_prefix("export ").map(str::trim_start).unwrap_or(key);
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Line of the first non-comment line containing `text`; 0 when not found.
fn line_of(content: &str, text: &str) -> usize {
    let needle = text.lines().next().unwrap_or_default();
    content
        .lines()
        .position(|l| !l.trim_start().starts_with('#') && l.contains(needle))
        .map_or(0, |i| i + 1)
}
