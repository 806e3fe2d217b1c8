use std::{path::PathBuf, time::Duration};

use log::warn;

use crate::{
    cmd::{self, Cmd},
    context::RunContext,
    error::InstallerError,
    pipeline::Step,
    platform::{Daemon, Platform},
    poll::{self, Backoff},
    steps::pools::{BOOT_POOL, ROOT_POOL},
    templates, ui,
};

/// How long zed gets to write the list cache after each trigger.
const CACHE_FILL: Backoff = Backoff::new(
    Duration::from_millis(500),
    Duration::from_secs(2),
    Duration::from_secs(15),
);

const CACHE_DIR: &str = "/etc/zfs/zfs-list.cache";

/// Has the ZFS event daemon record each pool's mount layout in
/// `zfs-list.cache`, so the installed system mounts its datasets in order,
/// then rewrites the recorded paths from the staging root to `/`.
pub struct StabilizeCache;

impl Step for StabilizeCache {
    fn name(&self) -> &str {
        "ZFS Mount Cache"
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        let platform = ctx.platform;
        let files: Vec<_> = [BOOT_POOL, ROOT_POOL]
            .iter()
            .map(|pool| ctx.in_root(&format!("{}/{}", CACHE_DIR, pool)))
            .collect();

        platform.create_dir_all(&ctx.in_root(CACHE_DIR), None)?;
        for file in &files {
            platform.write_file(file, "", None)?;
        }

        let zed = Cmd::new("zed").arg("-F").in_root(&ctx.root);
        let mut daemon = platform.spawn(&zed)?;
        ui::print_info("Waiting for zed to populate the mount cache…");

        let outcome = fill_cache(ctx, &files, &mut daemon);
        daemon.stop();
        let (ready, retries) = outcome?;

        if !ready {
            let empty = files
                .iter()
                .filter(|f| platform.file_len(f) == 0)
                .map(|f| f.display().to_string())
                .collect();
            return Err(InstallerError::CacheTimeout {
                files: empty,
                retries,
            });
        }

        for file in &files {
            let recorded = platform.read_file(file)?;
            let rewritten = templates::strip_staging_prefix(&recorded, &ctx.root);
            platform.write_file(file, &rewritten, None)?;
        }
        ui::print_success("Mount cache populated and rewritten for the real root.");
        Ok(())
    }
}

/// Waits for both cache files, triggering zed once more if the first wait
/// runs out. Returns whether they filled and how many retries it took.
fn fill_cache(
    ctx: &RunContext<'_>,
    files: &[PathBuf],
    daemon: &mut Daemon,
) -> Result<(bool, u32), InstallerError> {
    if wait_for_cache(ctx.platform, files, daemon)? {
        return Ok((true, 0));
    }
    warn!("zfs-list.cache still empty; toggling canmount to trigger zed");
    toggle_canmount(ctx)?;
    Ok((wait_for_cache(ctx.platform, files, daemon)?, 1))
}

/// Polls until every file is non-empty. A daemon that exits while the files
/// are still empty ends the wait with an error.
fn wait_for_cache(
    platform: &dyn Platform,
    files: &[PathBuf],
    daemon: &mut Daemon,
) -> Result<bool, InstallerError> {
    let mut exited = None;
    let ready = poll::poll_until(platform, CACHE_FILL, || {
        if files.iter().all(|f| platform.file_len(f) > 0) {
            return true;
        }
        exited = daemon.exit_code();
        exited.is_some()
    });
    match exited {
        Some(code) => Err(InstallerError::DaemonExited("zed".to_string(), code)),
        None => Ok(ready),
    }
}

/// Setting `canmount` emits the events zed listens for; the values written
/// are the ones the datasets already have.
fn toggle_canmount(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let boot = ctx.boot_dataset();
    let root = ctx.root_dataset();
    for (value, dataset) in [("canmount=on", boot.as_str()), ("canmount=noauto", root.as_str())] {
        let set = Cmd::new("zfs").args(["set", value, dataset]).in_root(&ctx.root);
        cmd::run(ctx.platform, &set)?;
    }
    Ok(())
}
