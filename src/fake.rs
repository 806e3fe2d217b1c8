//! Recording stand-in for [`Platform`] used by the unit tests.
//!
//! Commands are recorded and answered from a small model of the host:
//! partition nodes appear when `sgdisk -n` runs, pools and datasets exist
//! once created and mount under the pool's altroot, bind mounts and
//! `umount` edit the mount table, exporting a pool drops its mounts, and an
//! optional simulated `zed` fills the ZFS list cache after a configurable
//! number of `canmount` toggles. Files are real, under the test's staging
//! root.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashMap},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    cmd::{Cmd, CmdOutput},
    config::Config,
    error::InstallerError,
    platform::{Daemon, DeviceLock, Platform},
    steps::partition::part_path,
};

pub fn test_config() -> Config {
    let vars: HashMap<String, String> = [
        ("DISK", "/dev/sda"),
        ("ZFS_PASSPHRASE", "correct horse battery"),
        ("HOSTNAME", "testhost"),
        ("FQDN", "testhost.example.com"),
        ("ROOT_PASSWORD", "toor-secret"),
        ("ROOT_SSH_KEY", "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAITest admin@example"),
        ("SSH_PORT", "2222"),
        ("SSH_ALLOW_USERS", "root admin"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Config::from_vars(&vars).expect("test config is valid")
}

struct ZedSim {
    root: PathBuf,
    populate_after: Option<usize>,
}

pub struct FakePlatform {
    commands: RefCell<Vec<Cmd>>,
    spawned: RefCell<Vec<Cmd>>,
    sleeps: RefCell<Vec<Duration>>,
    responses: Vec<(String, CmdOutput)>,
    block_devices: RefCell<BTreeSet<PathBuf>>,
    mounts: RefCell<Vec<(String, PathBuf, String)>>,
    pools: RefCell<BTreeSet<String>>,
    datasets: RefCell<BTreeSet<String>>,
    altroot: RefCell<Option<PathBuf>>,
    confirmation: String,
    missing: Vec<String>,
    root: bool,
    lock_busy: bool,
    suppressed_partition: Option<u32>,
    zed: Option<ZedSim>,
    zed_exit: Option<i32>,
    toggles: Cell<usize>,
}

impl FakePlatform {
    pub fn new() -> Self {
        FakePlatform {
            commands: RefCell::new(Vec::new()),
            spawned: RefCell::new(Vec::new()),
            sleeps: RefCell::new(Vec::new()),
            responses: Vec::new(),
            block_devices: RefCell::new(BTreeSet::new()),
            mounts: RefCell::new(Vec::new()),
            pools: RefCell::new(BTreeSet::new()),
            datasets: RefCell::new(BTreeSet::new()),
            altroot: RefCell::new(None),
            confirmation: "yes".to_string(),
            missing: Vec::new(),
            root: true,
            lock_busy: false,
            suppressed_partition: None,
            zed: None,
            zed_exit: None,
            toggles: Cell::new(0),
        }
    }

    // ── Builders ──────────────────────────────────────────────────────────────

    pub fn block_device(self, path: &str) -> Self {
        self.block_devices.borrow_mut().insert(PathBuf::from(path));
        self
    }

    /// Answers any command whose line contains `pattern`.
    pub fn respond(mut self, pattern: &str, output: CmdOutput) -> Self {
        self.responses.push((pattern.to_string(), output));
        self
    }

    pub fn fail(self, pattern: &str, code: i32) -> Self {
        self.respond(pattern, CmdOutput::failed(code, "simulated failure"))
    }

    pub fn mounted(self, source: &str, target: &str, fstype: &str) -> Self {
        self.mounts
            .borrow_mut()
            .push((source.to_string(), PathBuf::from(target), fstype.to_string()));
        self
    }

    pub fn pool(self, name: &str) -> Self {
        self.pools.borrow_mut().insert(name.to_string());
        self
    }

    pub fn confirm_with(mut self, answer: &str) -> Self {
        self.confirmation = answer.to_string();
        self
    }

    pub fn missing_tool(mut self, program: &str) -> Self {
        self.missing.push(program.to_string());
        self
    }

    pub fn non_root(mut self) -> Self {
        self.root = false;
        self
    }

    pub fn lock_busy(mut self) -> Self {
        self.lock_busy = true;
        self
    }

    pub fn suppress_partition(mut self, number: u32) -> Self {
        self.suppressed_partition = Some(number);
        self
    }

    /// Simulates `zed` under `root`: the cache files get filled once
    /// `populate_after` canmount toggles have happened (0 = on start,
    /// `None` = never).
    pub fn zed(mut self, root: &Path, populate_after: Option<usize>) -> Self {
        self.zed = Some(ZedSim {
            root: root.to_path_buf(),
            populate_after,
        });
        self
    }

    /// `zed` dies right after starting, as when it is not installed.
    pub fn zed_exits(mut self, code: i32) -> Self {
        self.zed_exit = Some(code);
        self
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().iter().map(|c| c.to_string()).collect()
    }

    pub fn cmds(&self) -> Vec<Cmd> {
        self.commands.borrow().clone()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.spawned.borrow().iter().map(|c| c.to_string()).collect()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    /// Index of the first command containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }

    pub fn imported_pools(&self) -> Vec<String> {
        self.pools.borrow().iter().cloned().collect()
    }

    pub fn mount_targets(&self) -> Vec<PathBuf> {
        self.mounts.borrow().iter().map(|(_, t, _)| t.clone()).collect()
    }

    // ── Host model ────────────────────────────────────────────────────────────

    fn simulate(&self, cmd: &Cmd) -> CmdOutput {
        let (chroot, program, args): (Option<&str>, &str, &[String]) =
            if cmd.program() == "chroot" {
                match cmd.get_args() {
                    [root, program, rest @ ..] => (Some(root.as_str()), program.as_str(), rest),
                    _ => return CmdOutput::ok(""),
                }
            } else {
                (None, cmd.program(), cmd.get_args())
            };
        let last = args.last().map(String::as_str).unwrap_or("");

        match (program, args.first().map(String::as_str)) {
            ("sgdisk", _) => {
                for arg in args {
                    let Some(spec) = arg.strip_prefix("-n") else { continue };
                    let Some(n) = spec.split(':').next().and_then(|n| n.parse::<u32>().ok()) else {
                        continue;
                    };
                    if self.suppressed_partition != Some(n) {
                        self.block_devices
                            .borrow_mut()
                            .insert(PathBuf::from(part_path(last, n)));
                    }
                }
                CmdOutput::ok("")
            }
            ("zpool", Some("create")) => {
                if args.len() >= 2 {
                    self.pools.borrow_mut().insert(args[args.len() - 2].clone());
                }
                if let Some(i) = args.iter().position(|a| a == "-R") {
                    *self.altroot.borrow_mut() = args.get(i + 1).map(PathBuf::from);
                }
                CmdOutput::ok("")
            }
            ("zpool", Some("export")) => {
                self.pools.borrow_mut().remove(last);
                let nested = format!("{}/", last);
                self.mounts
                    .borrow_mut()
                    .retain(|(s, _, _)| s != last && !s.starts_with(&nested));
                CmdOutput::ok("")
            }
            ("zpool", Some("list")) => {
                if args.len() > 4 {
                    if self.pools.borrow().contains(last) {
                        CmdOutput::ok(format!("{}\n", last))
                    } else {
                        CmdOutput::failed(1, format!("cannot open '{}': no such pool", last))
                    }
                } else {
                    let pools: Vec<String> = self.pools.borrow().iter().cloned().collect();
                    CmdOutput::ok(pools.join("\n"))
                }
            }
            ("zfs", Some("create")) => {
                self.datasets.borrow_mut().insert(last.to_string());
                if let Some(mountpoint) = auto_mountpoint(args) {
                    self.mount_dataset(last, &mountpoint);
                }
                CmdOutput::ok("")
            }
            ("zfs", Some("mount")) => {
                self.mount_dataset(last, "/");
                CmdOutput::ok("")
            }
            ("zfs", Some("list")) => {
                if self.datasets.borrow().contains(last) {
                    CmdOutput::ok(format!("{}\n", last))
                } else {
                    CmdOutput::failed(1, format!("cannot open '{}': dataset does not exist", last))
                }
            }
            ("zfs", Some("set")) => {
                if args.iter().any(|a| a.starts_with("canmount=")) && last.starts_with("rpool/") {
                    self.toggles.set(self.toggles.get() + 1);
                    self.maybe_populate();
                }
                CmdOutput::ok("")
            }
            ("mount", _) if args.iter().any(|a| a == "--rbind") && args.len() >= 2 => {
                let source = args[args.len() - 2].clone();
                self.mounts
                    .borrow_mut()
                    .push((source, PathBuf::from(last), "none".to_string()));
                CmdOutput::ok("")
            }
            ("mount", Some(target)) if chroot.is_some() => {
                let root = Path::new(chroot.unwrap_or("/"));
                self.mounts.borrow_mut().push((
                    "ESP".to_string(),
                    root.join(target.trim_start_matches('/')),
                    "vfat".to_string(),
                ));
                CmdOutput::ok("")
            }
            ("umount", _) => {
                let target = PathBuf::from(last);
                self.mounts.borrow_mut().retain(|(_, t, _)| *t != target);
                CmdOutput::ok("")
            }
            _ => CmdOutput::ok(""),
        }
    }

    fn mount_dataset(&self, dataset: &str, mountpoint: &str) {
        let Some(root) = self.altroot.borrow().clone() else { return };
        let rel = mountpoint.trim_start_matches('/');
        let target = if rel.is_empty() { root } else { root.join(rel) };
        self.mounts
            .borrow_mut()
            .push((dataset.to_string(), target, "zfs".to_string()));
    }

    fn maybe_populate(&self) {
        let Some(zed) = &self.zed else { return };
        let Some(after) = zed.populate_after else { return };
        if self.toggles.get() < after {
            return;
        }
        let dir = zed.root.join("etc/zfs/zfs-list.cache");
        let root = zed.root.display();
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("bpool"),
            format!("bpool/BOOT/bookworm\t{}/boot\ton\ton\n", root),
        )
        .unwrap();
        fs::write(
            dir.join("rpool"),
            format!(
                "rpool/ROOT/bookworm\t{}\tnoauto\ton\nrpool/home\t{}/home\ton\ton\n",
                root, root
            ),
        )
        .unwrap();
    }
}

/// Where `zfs create` would mount the dataset right away, if anywhere.
fn auto_mountpoint(args: &[String]) -> Option<String> {
    let props: Vec<&str> = args
        .windows(2)
        .filter(|w| w[0] == "-o")
        .map(|w| w[1].as_str())
        .collect();
    if props.iter().any(|p| *p == "canmount=off" || *p == "canmount=noauto") {
        return None;
    }
    match props.iter().find_map(|p| p.strip_prefix("mountpoint=")) {
        Some("none") => None,
        Some(explicit) => Some(explicit.to_string()),
        None => {
            let name = args.last()?;
            let (_, rest) = name.split_once('/')?;
            Some(format!("/{}", rest))
        }
    }
}

impl Platform for FakePlatform {
    fn exec(&self, cmd: &Cmd) -> Result<CmdOutput, InstallerError> {
        self.commands.borrow_mut().push(cmd.clone());
        let line = cmd.to_string();
        if let Some((_, output)) = self.responses.iter().find(|(p, _)| line.contains(p.as_str())) {
            return Ok(output.clone());
        }
        Ok(self.simulate(cmd))
    }

    fn spawn(&self, cmd: &Cmd) -> Result<Daemon, InstallerError> {
        self.spawned.borrow_mut().push(cmd.clone());
        if cmd.get_args().iter().any(|a| a == "zed") {
            if let Some(code) = self.zed_exit {
                return Ok(Daemon::exited(cmd.to_string(), code));
            }
            self.maybe_populate();
        }
        Ok(Daemon::detached(cmd.to_string()))
    }

    fn is_root(&self) -> bool {
        self.root
    }

    fn has_command(&self, program: &str) -> bool {
        !self.missing.iter().any(|m| m == program)
    }

    fn is_block_device(&self, path: &Path) -> bool {
        self.block_devices.borrow().contains(path)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, InstallerError> {
        Ok(path.to_path_buf())
    }

    fn mount_table(&self) -> Result<String, InstallerError> {
        Ok(self
            .mounts
            .borrow()
            .iter()
            .map(|(s, t, f)| format!("{} {} {} rw 0 0\n", s, t.display(), f))
            .collect())
    }

    fn read_confirmation(&self, _prompt: &str) -> Result<String, InstallerError> {
        Ok(self.confirmation.clone())
    }

    fn lock_device(&self, path: &Path) -> Result<DeviceLock, InstallerError> {
        if self.lock_busy {
            return Err(InstallerError::DeviceBusy(path.to_path_buf()));
        }
        Ok(DeviceLock::none())
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }
}
