use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command '{0}' failed with exit code {1}")]
    CommandFailed(String, i32),

    #[error("Command '{0}' not found; is it installed?")]
    CommandNotFound(String),

    #[error("Installation cancelled by user")]
    Cancelled,

    #[error("This installer must be run as root (sudo)")]
    NotRoot,

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Configuration file {0} does not exist")]
    ConfigNotFound(PathBuf),

    #[error("{path}:{line}: {reason}")]
    ConfigParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Mandatory setting {0} is missing or empty")]
    MissingSetting(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error("Required tools are missing: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    // ── Target device ─────────────────────────────────────────────────────────
    #[error("No disk found to install onto")]
    NoDisk,

    #[error("{0} is not a block device")]
    NotBlockDevice(PathBuf),

    #[error("{device} is mounted at {mountpoint}")]
    DeviceMounted { device: String, mountpoint: String },

    #[error("{device} is in use by imported pool '{pool}'")]
    DeviceInPool { device: String, pool: String },

    #[error("{0} is locked by another installer run")]
    DeviceBusy(PathBuf),

    #[error("Could not parse lsblk output: {0}")]
    Lsblk(#[from] serde_json::Error),

    #[error("Target device has not been resolved yet")]
    Unresolved,

    // ── Resource creation ─────────────────────────────────────────────────────
    #[error("Partition node {0} did not appear")]
    PartitionMissing(PathBuf),

    #[error("Pool '{0}' is not imported after creation")]
    PoolMissing(String),

    #[error("Dataset '{0}' does not exist after creation")]
    DatasetMissing(String),

    #[error("'{0}' exited with code {1} before it finished its work")]
    DaemonExited(String, i32),

    #[error("ZFS mount cache still empty after {retries} retry: {}", .files.join(", "))]
    CacheTimeout { files: Vec<String>, retries: u32 },

    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<InstallerError>,
    },
}

impl InstallerError {
    /// Process exit code for this failure category.
    ///
    /// 2 is left to clap for usage errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            InstallerError::Step { source, .. } => source.exit_code(),

            InstallerError::NotRoot
            | InstallerError::ConfigNotFound(_)
            | InstallerError::ConfigParse { .. }
            | InstallerError::MissingSetting(_)
            | InstallerError::InvalidSetting { .. }
            | InstallerError::MissingTools(_)
            | InstallerError::NoDisk
            | InstallerError::NotBlockDevice(_)
            | InstallerError::DeviceMounted { .. }
            | InstallerError::DeviceInPool { .. }
            | InstallerError::DeviceBusy(_) => 3,

            InstallerError::Cancelled => 4,

            InstallerError::PartitionMissing(_)
            | InstallerError::PoolMissing(_)
            | InstallerError::DatasetMissing(_) => 5,

            InstallerError::CacheTimeout { .. } => 6,

            _ => 1,
        }
    }
}
