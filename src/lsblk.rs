use std::{fmt, str::FromStr};

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer,
};

use crate::{
    cmd::{self, Cmd},
    error::InstallerError,
    platform::Platform,
};

// ── Data types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Disk {
    /// Full device path, e.g. `/dev/sda` (lsblk runs with `--paths`).
    #[serde(rename = "name")]
    pub path: String,

    #[serde(rename = "size", deserialize_with = "deserialize_size")]
    pub size_in_bytes: u64,

    #[serde(rename = "type")]
    pub device_type: String,

    #[serde(default)]
    pub model: Option<String>,
}

impl Disk {
    /// One-line label shown in the candidate list.
    pub fn display(&self) -> String {
        let model = self.model.as_deref().map(str::trim).unwrap_or("");
        format!(
            "{:<14}  {:>9}   {}",
            self.path,
            human_size(self.size_in_bytes),
            if model.is_empty() { "—" } else { model }
        )
    }
}

#[derive(Debug, Deserialize)]
struct LsBlkOutput {
    #[serde(rename = "blockdevices")]
    block_devices: Vec<Disk>,
}

/// The "size" field is a string in older lsblk releases and a number in
/// newer ones.
fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrU64;

    impl<'de> Visitor<'de> for StringOrU64 {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("string or u64")
        }

        fn visit_str<E>(self, value: &str) -> Result<u64, E>
        where
            E: de::Error,
        {
            FromStr::from_str(value).map_err(|_| de::Error::custom("cannot parse string as u64"))
        }

        fn visit_u64<E>(self, value: u64) -> Result<u64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }
    }

    deserializer.deserialize_any(StringOrU64)
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parses `lsblk --json` output and keeps only whole disks.
pub fn parse_disks(json: &str) -> Result<Vec<Disk>, InstallerError> {
    let output: LsBlkOutput = serde_json::from_str(json)?;
    Ok(output
        .block_devices
        .into_iter()
        .filter(|d| d.device_type == "disk")
        .collect())
}

/// Returns all block devices of type `disk` visible to the system.
pub fn list_disks(platform: &dyn Platform) -> Result<Vec<Disk>, InstallerError> {
    let json = cmd::run_capture(
        platform,
        &Cmd::new("lsblk")
            .args([
                "--bytes",
                "--json",
                "--paths",
                "--nodeps",
                "--output",
                "NAME,SIZE,TYPE,MODEL",
            ])
            .query(),
    )?;
    parse_disks(&json)
}

/// The largest disk; on equal sizes the one listed first wins.
pub fn largest(disks: &[Disk]) -> Option<&Disk> {
    disks
        .iter()
        .reduce(|best, d| if d.size_in_bytes > best.size_in_bytes { d } else { best })
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}
