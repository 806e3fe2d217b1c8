use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::fs::{FileTypeExt, PermissionsExt},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};

use dialoguer::Input;
use log::{debug, info, warn};
use nix::{
    fcntl::{Flock, FlockArg},
    unistd::Uid,
};

use crate::{
    cmd::{Cmd, CmdOutput},
    error::InstallerError,
    steps::partition,
};

// ── Platform abstraction ──────────────────────────────────────────────────────

/// Everything the installer does to the host goes through this trait.
///
/// `SystemPlatform` really does it, `DryRunPlatform` only reports it, and
/// the tests substitute a recording fake.
pub trait Platform {
    /// Runs `cmd` to completion.
    ///
    /// A non-zero exit is *not* an error here; callers decide through the
    /// helpers in [`crate::cmd`]. An error means the process could not be
    /// launched at all.
    fn exec(&self, cmd: &Cmd) -> Result<CmdOutput, InstallerError>;

    /// Starts `cmd` in the background and returns a handle to stop it.
    fn spawn(&self, cmd: &Cmd) -> Result<Daemon, InstallerError>;

    fn is_root(&self) -> bool;

    /// Whether `program` resolves in `PATH`.
    fn has_command(&self, program: &str) -> bool;

    fn is_block_device(&self, path: &Path) -> bool;

    /// Resolves symlinks such as `/dev/disk/by-id/...`.
    fn canonicalize(&self, path: &Path) -> Result<PathBuf, InstallerError>;

    /// Contents of `/proc/self/mounts`.
    fn mount_table(&self) -> Result<String, InstallerError>;

    /// Asks the operator for a line of input.
    fn read_confirmation(&self, prompt: &str) -> Result<String, InstallerError>;

    /// Takes an exclusive advisory lock on `path` for as long as the
    /// returned guard lives.
    fn lock_device(&self, path: &Path) -> Result<DeviceLock, InstallerError>;

    fn sleep(&self, duration: Duration);

    // ── Files under the staging root ──────────────────────────────────────────

    fn read_file(&self, path: &Path) -> Result<String, InstallerError> {
        Ok(fs::read_to_string(path)?)
    }

    /// Writes `contents`, creating parent directories. `mode` sets the
    /// permission bits when given.
    fn write_file(
        &self,
        path: &Path,
        contents: &str,
        mode: Option<u32>,
    ) -> Result<(), InstallerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        if let Some(mode) = mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    fn append_file(&self, path: &Path, contents: &str) -> Result<(), InstallerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().append(true).create(true).open(path)?;
        f.write_all(contents.as_bytes())?;
        Ok(())
    }

    fn create_dir_all(&self, path: &Path, mode: Option<u32>) -> Result<(), InstallerError> {
        fs::create_dir_all(path)?;
        if let Some(mode) = mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    /// Size of a file in bytes; 0 when it does not exist.
    fn file_len(&self, path: &Path) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}

// ── Guards ────────────────────────────────────────────────────────────────────

/// Holds the advisory lock on the target device until dropped.
pub struct DeviceLock {
    _lock: Option<Flock<File>>,
}

impl DeviceLock {
    /// A guard that holds nothing (dry-run, tests).
    pub fn none() -> Self {
        DeviceLock { _lock: None }
    }
}

/// A background process started by [`Platform::spawn`].
pub struct Daemon {
    label: String,
    child: Option<Child>,
    exit_code: Option<i32>,
}

impl Daemon {
    /// A handle with no process behind it.
    pub fn detached(label: impl Into<String>) -> Self {
        Daemon {
            label: label.into(),
            child: None,
            exit_code: None,
        }
    }

    /// A handle whose process has already exited with `code`.
    #[cfg(test)]
    pub fn exited(label: impl Into<String>, code: i32) -> Self {
        Daemon {
            exit_code: Some(code),
            ..Daemon::detached(label)
        }
    }

    /// The exit code once the process has ended, `None` while it still runs.
    pub fn exit_code(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            if let Some(Ok(Some(status))) = self.child.as_mut().map(Child::try_wait) {
                debug!("{}: exited with {}", self.label, status);
                self.exit_code = Some(status.code().unwrap_or(-1));
            }
        }
        self.exit_code
    }

    /// Stops the process. Failure (it already exited, etc.) is ignored.
    pub fn stop(self) {
        let Some(mut child) = self.child else {
            debug!("{}: nothing to stop", self.label);
            return;
        };
        if let Err(e) = child.kill() {
            debug!("{}: kill failed: {}", self.label, e);
        }
        let _ = child.wait();
    }
}

// ── Real implementation ───────────────────────────────────────────────────────

fn not_found_or_io(program: &str, err: io::Error) -> InstallerError {
    if err.kind() == io::ErrorKind::NotFound {
        InstallerError::CommandNotFound(program.to_string())
    } else {
        InstallerError::Io(err)
    }
}

fn build_command(cmd: &Cmd) -> Command {
    let mut command = Command::new(cmd.program());
    command.args(cmd.get_args());
    command.envs(cmd.get_env().iter().map(|(k, v)| (k, v)));
    command
}

#[derive(Default)]
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    fn exec(&self, cmd: &Cmd) -> Result<CmdOutput, InstallerError> {
        let mut command = build_command(cmd);
        command.stdin(if cmd.get_stdin().is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        if cmd.is_streaming() {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|e| not_found_or_io(cmd.program(), e))?;
        if let Some(secret) = cmd.get_stdin() {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(secret.expose().as_bytes())?;
                stdin.write_all(b"\n")?;
            }
        }
        let output = child.wait_with_output()?;

        Ok(CmdOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, cmd: &Cmd) -> Result<Daemon, InstallerError> {
        let child = build_command(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| not_found_or_io(cmd.program(), e))?;
        Ok(Daemon {
            label: cmd.to_string(),
            child: Some(child),
            exit_code: None,
        })
    }

    fn is_root(&self) -> bool {
        Uid::effective().is_root()
    }

    fn has_command(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn is_block_device(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|m| m.file_type().is_block_device())
            .unwrap_or(false)
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, InstallerError> {
        Ok(fs::canonicalize(path)?)
    }

    fn mount_table(&self) -> Result<String, InstallerError> {
        Ok(fs::read_to_string("/proc/self/mounts")?)
    }

    fn read_confirmation(&self, prompt: &str) -> Result<String, InstallerError> {
        let answer: String = Input::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()?;
        Ok(answer)
    }

    fn lock_device(&self, path: &Path) -> Result<DeviceLock, InstallerError> {
        let file = File::open(path)?;
        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(DeviceLock { _lock: Some(lock) }),
            Err((_, errno)) => {
                debug!("flock({}) failed: {}", path.display(), errno);
                Err(InstallerError::DeviceBusy(path.to_path_buf()))
            }
        }
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

// ── Dry run ───────────────────────────────────────────────────────────────────

/// Reports every mutating action instead of performing it.
/// Read-only queries (lsblk, the mount table) still hit the real host.
#[derive(Default)]
pub struct DryRunPlatform {
    inner: SystemPlatform,
}

impl Platform for DryRunPlatform {
    fn exec(&self, cmd: &Cmd) -> Result<CmdOutput, InstallerError> {
        if cmd.is_query() {
            return self.inner.exec(cmd);
        }
        info!("[dry-run] {}", cmd);
        Ok(CmdOutput::ok(""))
    }

    fn spawn(&self, cmd: &Cmd) -> Result<Daemon, InstallerError> {
        info!("[dry-run] {} &", cmd);
        Ok(Daemon::detached(cmd.to_string()))
    }

    fn is_root(&self) -> bool {
        true
    }

    fn has_command(&self, program: &str) -> bool {
        if !self.inner.has_command(program) {
            warn!("[dry-run] '{}' is not installed on this host", program);
        }
        true
    }

    /// A missing partition node of a real disk is assumed to appear once
    /// partitioning has run. Anything else is checked on the host.
    fn is_block_device(&self, path: &Path) -> bool {
        if path.exists() {
            return self.inner.is_block_device(path);
        }
        path.to_str()
            .and_then(partition::parent_disk)
            .is_some_and(|disk| self.inner.is_block_device(Path::new(disk)))
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, InstallerError> {
        self.inner.canonicalize(path)
    }

    fn mount_table(&self) -> Result<String, InstallerError> {
        self.inner.mount_table()
    }

    fn read_confirmation(&self, prompt: &str) -> Result<String, InstallerError> {
        self.inner.read_confirmation(prompt)
    }

    fn lock_device(&self, path: &Path) -> Result<DeviceLock, InstallerError> {
        info!("[dry-run] lock {}", path.display());
        Ok(DeviceLock::none())
    }

    fn sleep(&self, _duration: Duration) {}

    fn read_file(&self, path: &Path) -> Result<String, InstallerError> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(
        &self,
        path: &Path,
        contents: &str,
        mode: Option<u32>,
    ) -> Result<(), InstallerError> {
        info!(
            "[dry-run] write {} ({} bytes{})",
            path.display(),
            contents.len(),
            mode.map(|m| format!(", mode {:o}", m)).unwrap_or_default()
        );
        Ok(())
    }

    fn append_file(&self, path: &Path, contents: &str) -> Result<(), InstallerError> {
        info!("[dry-run] append to {}: {}", path.display(), contents.trim_end());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path, _mode: Option<u32>) -> Result<(), InstallerError> {
        info!("[dry-run] mkdir -p {}", path.display());
        Ok(())
    }

    /// Pretends the ZFS event daemon populated its cache immediately.
    fn file_len(&self, _path: &Path) -> u64 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_does_not_execute_commands() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("touched");
        let dry = DryRunPlatform::default();

        let out = dry.exec(&Cmd::new("touch").arg_path(&marker)).unwrap();
        assert!(out.success());
        assert!(!marker.exists());

        let mut daemon = dry.spawn(&Cmd::new("sleep").arg("60")).unwrap();
        assert_eq!(daemon.exit_code(), None);
        daemon.stop();
    }

    #[test]
    fn dry_run_queries_reach_the_host() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data");
        fs::write(&file, "from the host\n").unwrap();
        let dry = DryRunPlatform::default();

        let out = dry.exec(&Cmd::new("cat").arg_path(&file).query()).unwrap();
        assert_eq!(out.stdout, "from the host\n");
        let out = dry.exec(&Cmd::new("false").query()).unwrap();
        assert!(!out.success());
    }

    #[test]
    fn dry_run_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let dry = DryRunPlatform::default();

        dry.write_file(&root.join("etc/hostname"), "web1\n", Some(0o644)).unwrap();
        dry.append_file(&root.join("etc/fstab"), "UUID=x /boot/efi vfat defaults 0 0\n")
            .unwrap();
        dry.create_dir_all(&root.join("root/.ssh"), Some(0o700)).unwrap();

        assert_eq!(fs::read_dir(root).unwrap().count(), 0);
        assert_eq!(dry.read_file(&root.join("etc/hostname")).unwrap(), "");
    }

    #[test]
    fn dry_run_rejects_a_disk_that_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let regular = dir.path().join("disk.img");
        fs::write(&regular, "").unwrap();
        let dry = DryRunPlatform::default();

        assert!(!dry.is_block_device(Path::new("/dev/this-disk-does-not-exist")));
        assert!(!dry.is_block_device(Path::new("/dev/this-disk-does-not-exist2")));
        assert!(!dry.is_block_device(&regular));
        assert!(dry.canonicalize(Path::new("/dev/this-disk-does-not-exist")).is_err());
    }

    #[test]
    fn spawned_process_that_exits_reports_its_code() {
        let mut daemon = SystemPlatform.spawn(&Cmd::new("sh").args(["-c", "exit 3"])).unwrap();
        let mut code = None;
        for _ in 0..200 {
            code = daemon.exit_code();
            if code.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(code, Some(3));
        daemon.stop();
    }
}
