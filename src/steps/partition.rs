use std::path::Path;

use crate::{
    cmd::{self, Cmd},
    context::RunContext,
    error::InstallerError,
    pipeline::Step,
    poll::{self, DEVICE_NODE},
    steps::disk,
    ui,
};

/// Device node of partition `n` on `disk`.
///
/// Disks whose name ends in a digit (`nvme0n1`, `loop0`, `mmcblk0`) need a
/// `p` separator: `nvme0n1p2`, but `sda2`.
pub fn part_path(disk: &str, n: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", disk, n)
    } else {
        format!("{}{}", disk, n)
    }
}

/// The disk a partition node belongs to, the inverse of [`part_path`].
/// `None` when `part` has no partition number.
pub fn parent_disk(part: &str) -> Option<&str> {
    let disk = part.trim_end_matches(|c: char| c.is_ascii_digit());
    if disk.len() == part.len() {
        return None;
    }
    match disk.strip_suffix('p') {
        Some(base) if base.ends_with(|c: char| c.is_ascii_digit()) => Some(base),
        _ => Some(disk),
    }
}

// ── Layout ────────────────────────────────────────────────────────────────────

pub struct PartitionSpec {
    pub number: u32,
    /// `sgdisk -n` start:end.
    pub extent: &'static str,
    /// GPT type code.
    pub type_code: &'static str,
    pub label: &'static str,
}

pub const LAYOUT: [PartitionSpec; 3] = [
    PartitionSpec {
        number: 1,
        extent: "1M:+512M",
        type_code: "EF00",
        label: "EFI",
    },
    PartitionSpec {
        number: 2,
        extent: "0:+2G",
        type_code: "BE00",
        label: "bpool",
    },
    PartitionSpec {
        number: 3,
        extent: "0:0",
        type_code: "BF00",
        label: "rpool",
    },
];

// ── Step ──────────────────────────────────────────────────────────────────────

/// Wipes the target and writes the EFI / boot pool / root pool layout.
pub struct Partition;

impl Step for Partition {
    fn name(&self) -> &str {
        "Disk Partitioning"
    }

    fn precondition(&self, ctx: &RunContext<'_>) -> Result<(), InstallerError> {
        disk::ensure_unused(ctx.platform, &ctx.target()?.disk)
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        let platform = ctx.platform;
        let target = ctx.target()?.clone();
        let disk = target.disk.to_string_lossy().into_owned();
        let disk = disk.as_str();

        cmd::run_with_spinner(
            platform,
            &Cmd::new("wipefs").args(["--all", "--force", disk]),
            &format!("Wiping signatures on {}…", disk),
            "Filesystem signatures wiped.",
        )?;
        cmd::run_with_spinner(
            platform,
            &Cmd::new("sgdisk").args(["--zap-all", disk]),
            "Destroying partition tables…",
            "Old GPT and MBR structures destroyed.",
        )?;

        if ctx.config.zero_fill {
            ui::print_info(&format!("Zero-filling {} (this can take a long time)…", disk));
            // dd always "fails" with ENOSPC at the end of the device.
            cmd::run_best_effort(
                platform,
                &Cmd::new("dd")
                    .arg("if=/dev/zero")
                    .arg(format!("of={}", disk))
                    .args(["bs=1M", "status=progress"])
                    .streaming(),
            );
            ui::print_success("Device zero-filled.");
        }

        cmd::run_with_spinner(
            platform,
            &Cmd::new("sgdisk").args(["--clear", disk]),
            "Writing a fresh GPT…",
            "Empty GPT written.",
        )?;

        for (spec, node) in LAYOUT.iter().zip(target.partitions()) {
            cmd::run_with_spinner(
                platform,
                &Cmd::new("sgdisk").args([
                    format!("-n{}:{}", spec.number, spec.extent),
                    format!("-t{}:{}", spec.number, spec.type_code),
                    format!("-c{}:{}", spec.number, spec.label),
                    disk.to_string(),
                ]),
                &format!("Creating partition {} ({})…", spec.number, spec.label),
                &format!("{} created.", node.display()),
            )?;
            wait_for_node(ctx, node)?;

            if spec.number == 1 {
                cmd::run_with_spinner(
                    platform,
                    &Cmd::new("mkfs.fat")
                        .args(["-F", "32", "-n", "EFI"])
                        .arg_path(node),
                    &format!("Formatting {} as FAT32…", node.display()),
                    &format!("{} formatted as FAT32 (EFI).", node.display()),
                )?;
            }
        }

        cmd::run(platform, &Cmd::new("partprobe").arg(disk))?;
        cmd::run_best_effort(platform, &Cmd::new("udevadm").arg("settle"));
        ui::print_success("Kernel partition table reloaded.");
        Ok(())
    }

    fn postcondition(&self, ctx: &RunContext<'_>) -> Result<(), InstallerError> {
        for node in ctx.target()?.partitions() {
            if !ctx.platform.is_block_device(node) {
                return Err(InstallerError::PartitionMissing(node.to_path_buf()));
            }
        }
        Ok(())
    }
}

fn wait_for_node(ctx: &RunContext<'_>, node: &Path) -> Result<(), InstallerError> {
    if poll::poll_until(ctx.platform, DEVICE_NODE, || ctx.platform.is_block_device(node)) {
        Ok(())
    } else {
        Err(InstallerError::PartitionMissing(node.to_path_buf()))
    }
}
