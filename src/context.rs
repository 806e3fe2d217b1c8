use std::path::{Path, PathBuf};

use crate::{
    config::Config,
    error::InstallerError,
    platform::{DeviceLock, Platform},
    steps::partition::part_path,
};

/// The disk being installed onto and the partitions derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDevice {
    pub disk: PathBuf,
    pub efi: PathBuf,
    pub boot: PathBuf,
    pub root: PathBuf,
}

impl TargetDevice {
    pub fn new(disk: impl Into<PathBuf>) -> Self {
        let disk = disk.into();
        let name = disk.to_string_lossy().into_owned();
        TargetDevice {
            efi: PathBuf::from(part_path(&name, 1)),
            boot: PathBuf::from(part_path(&name, 2)),
            root: PathBuf::from(part_path(&name, 3)),
            disk,
        }
    }

    pub fn partitions(&self) -> [&Path; 3] {
        [&self.efi, &self.boot, &self.root]
    }
}

/// State threaded through every step of a run.
pub struct RunContext<'a> {
    pub platform: &'a dyn Platform,
    pub config: Config,
    /// Staging root the new system is assembled under.
    pub root: PathBuf,
    target: Option<TargetDevice>,
    _lock: Option<DeviceLock>,
}

impl<'a> RunContext<'a> {
    pub fn new(platform: &'a dyn Platform, config: Config, root: impl Into<PathBuf>) -> Self {
        RunContext {
            platform,
            config,
            root: root.into(),
            target: None,
            _lock: None,
        }
    }

    /// Fixes the target for the rest of the run. The lock is held until the
    /// context is dropped.
    pub fn set_target(&mut self, target: TargetDevice, lock: DeviceLock) {
        self.target = Some(target);
        self._lock = Some(lock);
    }

    pub fn target(&self) -> Result<&TargetDevice, InstallerError> {
        self.target.as_ref().ok_or(InstallerError::Unresolved)
    }

    /// `path` (absolute inside the new system) as seen from the host.
    pub fn in_root(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub fn root_dataset(&self) -> String {
        format!("rpool/ROOT/{}", self.config.release)
    }

    pub fn boot_dataset(&self) -> String {
        format!("bpool/BOOT/{}", self.config.release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{test_config, FakePlatform};

    #[test]
    fn target_partitions_follow_naming_rules() {
        let sata = TargetDevice::new("/dev/sda");
        assert_eq!(sata.boot, PathBuf::from("/dev/sda2"));

        let nvme = TargetDevice::new("/dev/nvme0n1");
        assert_eq!(
            nvme.partitions(),
            [
                Path::new("/dev/nvme0n1p1"),
                Path::new("/dev/nvme0n1p2"),
                Path::new("/dev/nvme0n1p3")
            ]
        );
    }

    #[test]
    fn target_must_be_resolved_first() {
        let fake = FakePlatform::new();
        let mut ctx = RunContext::new(&fake, test_config(), "/mnt");
        assert!(matches!(ctx.target(), Err(InstallerError::Unresolved)));
        ctx.set_target(TargetDevice::new("/dev/sda"), DeviceLock::none());
        assert_eq!(ctx.target().unwrap().disk, PathBuf::from("/dev/sda"));
    }

    #[test]
    fn paths_and_dataset_names() {
        let fake = FakePlatform::new();
        let ctx = RunContext::new(&fake, test_config(), "/mnt");
        assert_eq!(ctx.in_root("/etc/hostname"), PathBuf::from("/mnt/etc/hostname"));
        assert_eq!(ctx.root_dataset(), "rpool/ROOT/bookworm");
        assert_eq!(ctx.boot_dataset(), "bpool/BOOT/bookworm");
    }
}
