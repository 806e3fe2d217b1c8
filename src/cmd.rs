use std::{fmt, path::Path};

use log::{debug, warn};

use crate::{config::Secret, error::InstallerError, platform::Platform, ui};

// ── Command description ───────────────────────────────────────────────────────

/// An external command, described but not yet run.
///
/// Every side effect on the host goes through a [`Platform`], which decides
/// how (or whether) a `Cmd` is actually executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<Secret>,
    streaming: bool,
    query: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Cmd {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            streaming: false,
            query: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feeds `secret` on stdin so it never appears in the process list.
    pub fn stdin(mut self, secret: Secret) -> Self {
        self.stdin = Some(secret);
        self
    }

    /// Hands stdout/stderr to the terminal (long-running installers).
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Marks the command as read-only so dry-run mode still executes it.
    pub fn query(mut self) -> Self {
        self.query = true;
        self
    }

    /// Wraps the command so it runs with `root` as its filesystem root.
    pub fn in_root(self, root: &Path) -> Self {
        let mut args = vec![root.to_string_lossy().into_owned(), self.program];
        args.extend(self.args);
        Cmd {
            program: "chroot".to_string(),
            args,
            ..self
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_stdin(&self) -> Option<&Secret> {
        self.stdin.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_query(&self) -> bool {
        self.query
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// What a finished command left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        CmdOutput {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[cfg(test)]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        CmdOutput {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn print_captured_output(output: &CmdOutput) {
    if !output.stdout.trim().is_empty() {
        eprintln!("{}", output.stdout.trim());
    }
    if !output.stderr.trim().is_empty() {
        eprintln!("{}", output.stderr.trim());
    }
}

fn check(cmd: &Cmd, output: CmdOutput) -> Result<CmdOutput, InstallerError> {
    if output.success() {
        return Ok(output);
    }
    print_captured_output(&output);
    Err(InstallerError::CommandFailed(cmd.to_string(), output.code))
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs a command; a non-zero exit is fatal.
pub fn run(platform: &dyn Platform, cmd: &Cmd) -> Result<(), InstallerError> {
    debug!("running: {}", cmd);
    let output = platform.exec(cmd)?;
    check(cmd, output).map(|_| ())
}

/// Runs a command, capturing and returning its stdout.
pub fn run_capture(platform: &dyn Platform, cmd: &Cmd) -> Result<String, InstallerError> {
    debug!("running: {}", cmd);
    let output = platform.exec(cmd)?;
    check(cmd, output).map(|o| o.stdout)
}

/// Runs a command whose failure is expected or harmless.
/// Returns whether it succeeded; a failure is only logged.
pub fn run_best_effort(platform: &dyn Platform, cmd: &Cmd) -> bool {
    debug!("running (best effort): {}", cmd);
    match platform.exec(cmd) {
        Ok(output) if output.success() => true,
        Ok(output) => {
            warn!("ignored failure of '{}' (exit code {})", cmd, output.code);
            false
        }
        Err(e) => {
            warn!("ignored failure of '{}': {}", cmd, e);
            false
        }
    }
}

/// Runs a command **silently** while displaying a spinner.
/// On success prints `done_msg` with a ✓.
/// On failure prints captured output and returns an error.
pub fn run_with_spinner(
    platform: &dyn Platform,
    cmd: &Cmd,
    spin_msg: &str,
    done_msg: &str,
) -> Result<(), InstallerError> {
    debug!("running: {}", cmd);
    let pb = ui::spinner(spin_msg);
    let result = platform.exec(cmd);
    pb.finish_and_clear();

    check(cmd, result?)?;
    ui::print_success(done_msg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let cmd = Cmd::new("sgdisk").args(["-n1:1M:+512M", "-c1:EFI System", ""]);
        assert_eq!(cmd.to_string(), "sgdisk -n1:1M:+512M '-c1:EFI System' ''");
    }

    #[test]
    fn in_root_wraps_with_chroot_and_keeps_env() {
        let cmd = Cmd::new("apt-get")
            .args(["install", "-y", "vim"])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .streaming()
            .in_root(Path::new("/mnt"));
        assert_eq!(cmd.program(), "chroot");
        assert_eq!(cmd.to_string(), "chroot /mnt apt-get install -y vim");
        assert_eq!(cmd.get_env(), &[("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())]);
        assert!(cmd.is_streaming());
    }

    #[test]
    fn secrets_stay_out_of_the_command_line() {
        let cmd = Cmd::new("chpasswd").stdin(Secret::new("root:hunter22"));
        assert_eq!(cmd.to_string(), "chpasswd");
        assert!(!format!("{:?}", cmd).contains("hunter22"));
        assert_eq!(cmd.get_stdin().map(Secret::expose), Some("root:hunter22"));
    }
}
