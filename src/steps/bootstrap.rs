use crate::{
    cmd::{self, Cmd},
    context::RunContext,
    error::InstallerError,
    pipeline::Step,
    ui,
};

/// Installs the base Debian system into the staging root.
pub struct InstallBase;

impl Step for InstallBase {
    fn name(&self) -> &str {
        "Base System Installation"
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        let config = &ctx.config;
        ui::print_info(&format!(
            "debootstrap {} from {} (this takes a while)…",
            config.release, config.mirror
        ));

        let debootstrap = Cmd::new("debootstrap")
            .arg(&config.release)
            .arg_path(&ctx.root)
            .arg(&config.mirror)
            .streaming();
        cmd::run(ctx.platform, &debootstrap)?;

        ui::print_success("Base system installed.");
        Ok(())
    }
}

/// Host pseudo-filesystems bound into the new system.
const BIND_MOUNTS: [&str; 3] = ["/dev", "/proc", "/sys"];

/// Makes the staging root usable as a chroot: pool cache file copied in,
/// `/dev`, `/proc` and `/sys` bind-mounted.
pub struct PrepareChroot;

impl Step for PrepareChroot {
    fn name(&self) -> &str {
        "Chroot Preparation"
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        let platform = ctx.platform;

        let zfs_dir = ctx.in_root("/etc/zfs");
        platform.create_dir_all(&zfs_dir, None)?;
        cmd::run(
            platform,
            &Cmd::new("cp").arg("/etc/zfs/zpool.cache").arg_path(&zfs_dir),
        )?;
        ui::print_success("Pool cache file copied.");

        for fs in BIND_MOUNTS {
            let target = ctx.in_root(fs);
            platform.create_dir_all(&target, None)?;
            cmd::run(
                platform,
                &Cmd::new("mount")
                    .args(["--make-private", "--rbind", fs])
                    .arg_path(&target),
            )?;
        }
        ui::print_success("/dev, /proc and /sys bound into the new system.");
        Ok(())
    }
}
