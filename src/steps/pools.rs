use crate::{
    cmd::{self, Cmd},
    context::RunContext,
    error::InstallerError,
    pipeline::Step,
    ui,
};

pub const BOOT_POOL: &str = "bpool";
pub const ROOT_POOL: &str = "rpool";

/// Properties shared by both pools.
#[rustfmt::skip]
const COMMON_OPTIONS: &[&str] = &[
    "-o", "ashift=12",
    "-o", "autotrim=on",
    "-O", "acltype=posixacl",
    "-O", "xattr=sa",
    "-O", "compression=lz4",
    "-O", "normalization=formD",
    "-O", "relatime=on",
    "-O", "canmount=off",
];

/// The boot pool is limited to the feature set GRUB can read.
#[rustfmt::skip]
const BOOT_OPTIONS: &[&str] = &[
    "-o", "compatibility=grub2",
    "-o", "cachefile=/etc/zfs/zpool.cache",
    "-O", "mountpoint=/boot",
];

/// The root pool is encrypted with a passphrase read from stdin.
#[rustfmt::skip]
const ROOT_OPTIONS: &[&str] = &[
    "-O", "encryption=on",
    "-O", "keylocation=prompt",
    "-O", "keyformat=passphrase",
    "-O", "mountpoint=/",
];

/// Creates the boot pool and the encrypted root pool, both with the staging
/// directory as their alternate root.
pub struct CreatePools;

impl Step for CreatePools {
    fn name(&self) -> &str {
        "ZFS Pools"
    }

    fn precondition(&self, ctx: &RunContext<'_>) -> Result<(), InstallerError> {
        let target = ctx.target()?;
        for node in [&target.boot, &target.root] {
            if !ctx.platform.is_block_device(node) {
                return Err(InstallerError::PartitionMissing(node.clone()));
            }
        }
        Ok(())
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        let target = ctx.target()?;

        let bpool = Cmd::new("zpool")
            .arg("create")
            .args(COMMON_OPTIONS)
            .args(BOOT_OPTIONS)
            .arg("-R")
            .arg_path(&ctx.root)
            .arg(BOOT_POOL)
            .arg_path(&target.boot);
        cmd::run_with_spinner(
            ctx.platform,
            &bpool,
            &format!("Creating {} on {}…", BOOT_POOL, target.boot.display()),
            &format!("Pool {} created.", BOOT_POOL),
        )?;

        let rpool = Cmd::new("zpool")
            .arg("create")
            .args(COMMON_OPTIONS)
            .args(ROOT_OPTIONS)
            .arg("-R")
            .arg_path(&ctx.root)
            .arg(ROOT_POOL)
            .arg_path(&target.root)
            .stdin(ctx.config.passphrase.clone());
        cmd::run_with_spinner(
            ctx.platform,
            &rpool,
            &format!("Creating encrypted {} on {}…", ROOT_POOL, target.root.display()),
            &format!("Pool {} created (aes-256-gcm, passphrase).", ROOT_POOL),
        )?;

        Ok(())
    }

    fn postcondition(&self, ctx: &RunContext<'_>) -> Result<(), InstallerError> {
        for pool in [BOOT_POOL, ROOT_POOL] {
            if !pool_imported(ctx, pool) {
                return Err(InstallerError::PoolMissing(pool.to_string()));
            }
        }
        ui::print_success("Both pools are imported.");
        Ok(())
    }
}

fn pool_imported(ctx: &RunContext<'_>, pool: &str) -> bool {
    let list = Cmd::new("zpool").args(["list", "-H", "-o", "name", pool]).query();
    match cmd::run_capture(ctx.platform, &list) {
        Ok(out) => out.lines().any(|l| l.trim() == pool),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::TargetDevice,
        fake::{test_config, FakePlatform},
        platform::DeviceLock,
    };

    fn ctx(fake: &FakePlatform) -> RunContext<'_> {
        let mut ctx = RunContext::new(fake, test_config(), "/mnt");
        ctx.set_target(TargetDevice::new("/dev/sda"), DeviceLock::none());
        ctx
    }

    fn partitioned() -> FakePlatform {
        FakePlatform::new()
            .block_device("/dev/sda2")
            .block_device("/dev/sda3")
    }

    #[test]
    fn creates_boot_pool_before_root_pool() {
        let fake = partitioned();
        let mut ctx = ctx(&fake);
        CreatePools.precondition(&ctx).unwrap();
        CreatePools.run(&mut ctx).unwrap();
        CreatePools.postcondition(&ctx).unwrap();

        let cmds = fake.cmds();
        let creates: Vec<_> = cmds
            .iter()
            .filter(|c| c.get_args().first().map(String::as_str) == Some("create"))
            .collect();
        assert_eq!(creates.len(), 2);

        let boot = creates[0].to_string();
        assert!(boot.contains("-o compatibility=grub2"));
        assert!(boot.contains("-o cachefile=/etc/zfs/zpool.cache"));
        assert!(boot.contains("-O mountpoint=/boot"));
        assert!(boot.ends_with("-R /mnt bpool /dev/sda2"));
        assert!(!boot.contains("encryption"));
        assert!(creates[0].get_stdin().is_none());

        let root = creates[1].to_string();
        assert!(root.contains("-O encryption=on"));
        assert!(root.contains("-O keyformat=passphrase"));
        assert!(root.contains("-O keylocation=prompt"));
        assert!(root.ends_with("-R /mnt rpool /dev/sda3"));
        assert!(!root.contains("compatibility"));
    }

    #[test]
    fn passphrase_goes_through_stdin_only() {
        let fake = partitioned();
        let mut ctx = ctx(&fake);
        CreatePools.run(&mut ctx).unwrap();

        for line in fake.commands() {
            assert!(!line.contains("correct horse battery"), "leaked in {}", line);
        }
        let rpool = fake
            .cmds()
            .into_iter()
            .find(|c| c.to_string().contains(" rpool "))
            .unwrap();
        assert_eq!(
            rpool.get_stdin().map(|s| s.expose().to_string()),
            Some("correct horse battery".to_string())
        );
    }

    #[test]
    fn missing_partition_fails_precondition() {
        let fake = FakePlatform::new().block_device("/dev/sda2");
        let ctx = ctx(&fake);
        assert!(matches!(
            CreatePools.precondition(&ctx),
            Err(InstallerError::PartitionMissing(_))
        ));
    }

    #[test]
    fn root_pool_failure_stops_the_step() {
        let fake = partitioned().fail("rpool", 1);
        let mut ctx = ctx(&fake);
        assert!(matches!(
            CreatePools.run(&mut ctx),
            Err(InstallerError::CommandFailed(_, 1))
        ));
        assert_eq!(fake.imported_pools(), vec!["bpool"]);
    }

    #[test]
    fn pool_not_listed_fails_postcondition() {
        let fake = partitioned().pool("bpool");
        let ctx = ctx(&fake);
        match CreatePools.postcondition(&ctx) {
            Err(InstallerError::PoolMissing(pool)) => assert_eq!(pool, "rpool"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
