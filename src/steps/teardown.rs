use log::warn;

use crate::{
    cmd::{self, Cmd},
    context::RunContext,
    error::InstallerError,
    mounts,
    pipeline::Step,
    steps::pools::{BOOT_POOL, ROOT_POOL},
    ui,
};

/// Unmounts everything under the staging root, deepest first, and exports
/// both pools. Failures are logged; the install itself is already complete.
pub struct Teardown;

impl Step for Teardown {
    fn name(&self) -> &str {
        "Teardown"
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        let platform = ctx.platform;

        let table = platform.mount_table()?;
        let entries = mounts::under(&mounts::parse(&table), &ctx.root);
        let mut failed = 0;

        for entry in &entries {
            // ZFS datasets go away cleanly with the pool export; everything
            // else (bind mounts, the ESP) may be held busy.
            let umount = if entry.fstype == "zfs" {
                Cmd::new("umount").arg_path(&entry.target)
            } else {
                Cmd::new("umount").arg("-lf").arg_path(&entry.target)
            };
            if !cmd::run_best_effort(platform, &umount) {
                failed += 1;
            }
        }
        ui::print_success(&format!(
            "Unmounted {} filesystem(s) under {}.",
            entries.len() - failed,
            ctx.root.display()
        ));

        for pool in [BOOT_POOL, ROOT_POOL] {
            if cmd::run_best_effort(platform, &Cmd::new("zpool").args(["export", pool])) {
                ui::print_success(&format!("Pool {} exported.", pool));
            }
        }

        Ok(())
    }

    /// Reports what is left behind; never fails.
    fn postcondition(&self, ctx: &RunContext<'_>) -> Result<(), InstallerError> {
        let platform = ctx.platform;

        if let Ok(table) = platform.mount_table() {
            for entry in mounts::under(&mounts::parse(&table), &ctx.root) {
                warn!("{} is still mounted", entry.target.display());
            }
        }

        let list = Cmd::new("zpool").args(["list", "-H", "-o", "name"]).query();
        if let Ok(out) = platform.exec(&list) {
            for pool in out.stdout.lines().map(str::trim) {
                if pool == BOOT_POOL || pool == ROOT_POOL {
                    ui::print_warning(&format!(
                        "Pool {} is still imported; run 'zpool export {}' before rebooting.",
                        pool, pool
                    ));
                }
            }
        }
        Ok(())
    }
}
