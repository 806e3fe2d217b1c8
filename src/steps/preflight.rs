use std::path::Path;

use crate::{config::Config, error::InstallerError, platform::Platform, ui};

/// Host binaries the installer calls directly. Everything else runs inside
/// the new system.
pub const REQUIRED_TOOLS: &[&str] = &[
    "lsblk",
    "blkid",
    "wipefs",
    "sgdisk",
    "dd",
    "partprobe",
    "udevadm",
    "mkfs.fat",
    "zpool",
    "zfs",
    "debootstrap",
    "chroot",
    "mount",
    "umount",
    "mountpoint",
    "chmod",
    "cp",
];

/// Maps a binary name to the Debian package that ships it.
fn package_for(program: &str) -> &str {
    match program {
        "mkfs.fat" | "mkfs.vfat" | "fsck.fat" | "fatlabel" => "dosfstools",
        "sgdisk" | "gdisk" => "gdisk",
        "partprobe" | "parted" => "parted",
        "zpool" | "zfs" | "zed" => "zfsutils-linux",
        "udevadm" => "udev",
        "wipefs" | "lsblk" | "blkid" | "mount" | "umount" | "mountpoint" => "util-linux",
        "dd" | "chroot" | "chmod" | "cp" => "coreutils",
        other => other,
    }
}

/// Lists every required tool that is not on `PATH`, with a package hint.
pub fn missing_tools(platform: &dyn Platform) -> Vec<String> {
    REQUIRED_TOOLS
        .iter()
        .filter(|tool| !platform.has_command(tool))
        .map(|tool| match package_for(tool) {
            pkg if pkg == *tool => tool.to_string(),
            pkg => format!("{} (package {})", tool, pkg),
        })
        .collect()
}

/// Checks privilege, the configuration file and host tools before anything
/// is touched. Returns the validated configuration.
pub fn run(platform: &dyn Platform, config_path: &Path) -> Result<Config, InstallerError> {
    if !platform.is_root() {
        return Err(InstallerError::NotRoot);
    }
    ui::print_success("Running as root.");

    if !config_path.is_file() {
        return Err(InstallerError::ConfigNotFound(config_path.to_path_buf()));
    }

    let missing = missing_tools(platform);
    if !missing.is_empty() {
        return Err(InstallerError::MissingTools(missing));
    }
    ui::print_success("All required tools are installed.");

    let config = Config::load(config_path)?;
    ui::print_success(&format!("Configuration loaded from {}.", config_path.display()));
    Ok(config)
}
