use std::path::{Path, PathBuf};

use console::style;
use log::debug;

use crate::{
    cmd::Cmd,
    config::DiskChoice,
    context::{RunContext, TargetDevice},
    error::InstallerError,
    lsblk,
    mounts,
    pipeline::Step,
    platform::Platform,
    ui,
};

/// Resolves, validates and locks the target disk, then asks the operator to
/// type `yes` before anything destructive happens.
pub struct ResolveDisk;

impl Step for ResolveDisk {
    fn name(&self) -> &str {
        "Target Disk"
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        let platform = ctx.platform;

        let requested = match &ctx.config.disk {
            DiskChoice::Path(path) => path.clone(),
            DiskChoice::Auto => auto_select(platform)?,
        };

        let disk = platform
            .canonicalize(&requested)
            .map_err(|_| InstallerError::NotBlockDevice(requested.clone()))?;
        if !platform.is_block_device(&disk) {
            return Err(InstallerError::NotBlockDevice(disk));
        }
        if disk != requested {
            ui::print_info(&format!("{} → {}", requested.display(), disk.display()));
        }

        ensure_unused(platform, &disk)?;
        let lock = platform.lock_device(&disk)?;
        let target = TargetDevice::new(&disk);

        confirm(ctx, &target)?;
        ctx.set_target(target, lock);
        Ok(())
    }
}

// ── Disk selection ────────────────────────────────────────────────────────────

fn auto_select(platform: &dyn Platform) -> Result<PathBuf, InstallerError> {
    let disks = lsblk::list_disks(platform)?;

    println!();
    println!(
        "  {:<14}  {:>9}   {}",
        style("DISK").dim(),
        style("SIZE").dim(),
        style("MODEL").dim()
    );
    println!("  {}", style("─".repeat(46)).dim());
    for d in &disks {
        println!("  {}", d.display());
    }
    println!();

    let chosen = lsblk::largest(&disks).ok_or(InstallerError::NoDisk)?;
    ui::print_info(&format!("Selected the largest disk: {}", chosen.path));
    Ok(PathBuf::from(&chosen.path))
}

// ── In-use checks ─────────────────────────────────────────────────────────────

/// Fails if `disk` or any of its partitions is mounted or backs an imported
/// ZFS pool.
pub fn ensure_unused(platform: &dyn Platform, disk: &Path) -> Result<(), InstallerError> {
    let disk_name = disk.to_string_lossy();

    for entry in mounts::parse(&platform.mount_table()?) {
        if !entry.source.starts_with("/dev/") {
            continue;
        }
        let source = resolve_node(platform, &entry.source);
        if mounts::is_on_disk(&source, &disk_name) {
            return Err(InstallerError::DeviceMounted {
                device: source,
                mountpoint: entry.target.display().to_string(),
            });
        }
    }

    // zpool may legitimately fail here (module not loaded yet): no pools then.
    let status = Cmd::new("zpool").args(["status", "-P"]).query();
    let output = match platform.exec(&status) {
        Ok(o) if o.success() => o.stdout,
        Ok(o) => {
            debug!("zpool status exited {}; assuming no imported pools", o.code);
            return Ok(());
        }
        Err(e) => {
            debug!("zpool status unavailable: {}", e);
            return Ok(());
        }
    };

    for (pool, device) in pool_devices(&output) {
        let device = resolve_node(platform, &device);
        if mounts::is_on_disk(&device, &disk_name) {
            return Err(InstallerError::DeviceInPool { device, pool });
        }
    }

    Ok(())
}

fn resolve_node(platform: &dyn Platform, node: &str) -> String {
    platform
        .canonicalize(Path::new(node))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| node.to_string())
}

/// Extracts `(pool, device)` pairs from `zpool status -P`.
fn pool_devices(status: &str) -> Vec<(String, String)> {
    let mut pool = String::new();
    let mut found = Vec::new();

    for line in status.lines() {
        let trimmed = line.trim();
        if let Some(name) = trimmed.strip_prefix("pool:") {
            pool = name.trim().to_string();
            continue;
        }
        if let Some(device) = trimmed.split_whitespace().next() {
            if device.starts_with("/dev/") {
                found.push((pool.clone(), device.to_string()));
            }
        }
    }

    found
}

// ── Confirmation ──────────────────────────────────────────────────────────────

fn confirm(ctx: &RunContext<'_>, target: &TargetDevice) -> Result<(), InstallerError> {
    let disk = target.disk.display().to_string();
    let efi = target.efi.display().to_string();
    let boot = target.boot.display().to_string();
    let root = target.root.display().to_string();

    println!();
    ui::print_kv_box(
        "Installation Target",
        &[
            ("Disk", disk.as_str()),
            ("EFI (FAT32)", efi.as_str()),
            ("bpool", boot.as_str()),
            ("rpool", root.as_str()),
            ("Release", ctx.config.release.as_str()),
            ("Hostname", ctx.config.fqdn.as_str()),
        ],
    );
    println!();
    println!(
        "  {}",
        style(format!("⚠  ALL DATA ON {} WILL BE PERMANENTLY ERASED.", disk))
            .red()
            .bold()
    );
    println!();

    let answer = ctx
        .platform
        .read_confirmation("Type 'yes' to continue, anything else aborts")?;
    if answer != "yes" {
        return Err(InstallerError::Cancelled);
    }
    Ok(())
}
