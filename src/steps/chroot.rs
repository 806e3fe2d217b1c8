use std::path::Path;

use log::{info, warn};

use crate::{
    cmd::{self, Cmd},
    config::Secret,
    context::RunContext,
    error::InstallerError,
    pipeline::Step,
    templates, ui,
};

// ── Chroot session ────────────────────────────────────────────────────────────

/// Runs commands and edits files inside the staging root.
struct Chroot<'c, 'a> {
    ctx: &'c RunContext<'a>,
}

impl<'c, 'a> Chroot<'c, 'a> {
    fn new(ctx: &'c RunContext<'a>) -> Self {
        Chroot { ctx }
    }

    fn wrap(&self, cmd: Cmd) -> Cmd {
        cmd.env("DEBIAN_FRONTEND", "noninteractive").in_root(&self.ctx.root)
    }

    /// Runs `cmd` inside the new system; failure is fatal.
    fn run(&self, cmd: Cmd) -> Result<(), InstallerError> {
        cmd::run(self.ctx.platform, &self.wrap(cmd))
    }

    fn capture(&self, cmd: Cmd) -> Result<String, InstallerError> {
        cmd::run_capture(self.ctx.platform, &self.wrap(cmd))
    }

    /// Runs `cmd` inside the new system; failure is only logged.
    fn run_tolerant(&self, cmd: Cmd) -> bool {
        cmd::run_best_effort(self.ctx.platform, &self.wrap(cmd))
    }

    fn install(&self, packages: &[&str]) -> Result<(), InstallerError> {
        ui::print_info(&format!("apt-get install {}", packages.join(" ")));
        self.run(
            Cmd::new("apt-get")
                .args(["install", "--yes", "--no-install-recommends"])
                .args(packages)
                .streaming(),
        )
    }

    fn enable(&self, unit: &str) -> Result<(), InstallerError> {
        self.run(Cmd::new("systemctl").args(["enable", unit]))
    }

    fn read(&self, path: &str) -> Result<String, InstallerError> {
        self.ctx.platform.read_file(&self.ctx.in_root(path))
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), InstallerError> {
        self.ctx.platform.write_file(&self.ctx.in_root(path), contents, None)
    }

    fn write_mode(&self, path: &str, contents: &str, mode: u32) -> Result<(), InstallerError> {
        self.ctx.platform.write_file(&self.ctx.in_root(path), contents, Some(mode))
    }

    fn append(&self, path: &str, contents: &str) -> Result<(), InstallerError> {
        self.ctx.platform.append_file(&self.ctx.in_root(path), contents)
    }
}

// ── Stages ────────────────────────────────────────────────────────────────────

/// One configuration stage run against the new system.
#[derive(Clone, Copy)]
pub struct ChrootStage {
    pub name: &'static str,
    action: fn(&RunContext<'_>) -> Result<(), InstallerError>,
}

impl Step for ChrootStage {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        (self.action)(ctx)?;
        ui::print_success(&format!("{}: done.", self.name));
        Ok(())
    }
}

/// Later stages rely on packages and files from earlier ones; keep the order.
pub const STAGES: [ChrootStage; 19] = [
    ChrootStage { name: "APT Sources", action: apt_sources },
    ChrootStage { name: "Kernel", action: kernel },
    ChrootStage { name: "Init System", action: init_system },
    ChrootStage { name: "Locale", action: locale },
    ChrootStage { name: "Keyboard", action: keyboard },
    ChrootStage { name: "Hostname", action: hostname },
    ChrootStage { name: "Hosts File", action: hosts },
    ChrootStage { name: "ZFS Tools", action: zfs_tools },
    ChrootStage { name: "EFI Boot Tooling", action: efi_tooling },
    ChrootStage { name: "Boot Pool Import", action: bpool_import },
    ChrootStage { name: "tmpfs /tmp", action: tmp_mount },
    ChrootStage { name: "Timezone", action: timezone },
    ChrootStage { name: "Time Synchronization", action: time_sync },
    ChrootStage { name: "Network", action: network },
    ChrootStage { name: "Root Password", action: root_password },
    ChrootStage { name: "Root SSH Key", action: root_ssh_key },
    ChrootStage { name: "SSH Server", action: ssh_server },
    ChrootStage { name: "Extra Packages", action: extra_packages },
    ChrootStage { name: "Bootloader", action: bootloader },
];

fn apt_sources(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    c.write(
        "/etc/apt/sources.list",
        &templates::sources_list(&ctx.config.release, &ctx.config.mirror),
    )?;
    c.run(Cmd::new("apt-get").arg("update").streaming())
}

fn kernel(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    Chroot::new(ctx).install(&["linux-headers-amd64", "linux-image-amd64"])
}

fn init_system(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    Chroot::new(ctx).install(&["systemd-sysv"])
}

fn locale(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    let locale = ctx.config.locale.as_str();
    c.install(&["locales"])?;
    c.append("/etc/locale.gen", &templates::locale_gen(locale))?;
    c.run(Cmd::new("locale-gen"))?;
    c.run(Cmd::new("update-locale").arg(format!("LANG={}", locale)))
}

fn keyboard(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    c.install(&["keyboard-configuration", "console-setup"])?;
    c.write("/etc/default/keyboard", &templates::keyboard(&ctx.config.keyboard))
}

fn hostname(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    Chroot::new(ctx).write("/etc/hostname", &templates::hostname(&ctx.config.hostname))
}

fn hosts(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let config = &ctx.config;
    let ipv4 = config.network.ipv4.as_ref().map(|a| a.address());
    Chroot::new(ctx).write(
        "/etc/hosts",
        &templates::hosts(&config.hostname, &config.fqdn, ipv4),
    )
}

fn zfs_tools(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    c.install(&["dpkg-dev", "zfs-initramfs", "zfs-zed"])?;
    c.write("/etc/dkms/zfs.conf", templates::dkms_zfs())
}

fn efi_tooling(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    let efi = ctx.target()?.efi.clone();

    c.install(&["dosfstools"])?;

    let source = match efi_uuid(ctx, &efi) {
        Some(uuid) => format!("UUID={}", uuid),
        None => {
            warn!("no UUID for {}; using the device path in fstab", efi.display());
            efi.display().to_string()
        }
    };
    ctx.platform.create_dir_all(&ctx.in_root("/boot/efi"), None)?;
    c.append("/etc/fstab", &templates::fstab_efi(&source))?;
    c.run(Cmd::new("mount").arg("/boot/efi"))?;

    c.install(&["grub-efi-amd64", "shim-signed"])?;
    c.run_tolerant(Cmd::new("apt-get").args(["purge", "--yes", "os-prober"]));
    Ok(())
}

fn efi_uuid(ctx: &RunContext<'_>, efi: &Path) -> Option<String> {
    let blkid = Cmd::new("blkid")
        .args(["-s", "UUID", "-o", "value"])
        .arg_path(efi)
        .query();
    let output = ctx.platform.exec(&blkid).ok()?;
    let uuid = output.stdout.trim();
    if output.success() && !uuid.is_empty() {
        Some(uuid.to_string())
    } else {
        None
    }
}

fn bpool_import(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    c.write(
        "/etc/systemd/system/zfs-import-bpool.service",
        templates::bpool_import_unit(),
    )?;
    c.enable("zfs-import-bpool.service")
}

fn tmp_mount(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    c.run(Cmd::new("cp").args(["/usr/share/systemd/tmp.mount", "/etc/systemd/system/"]))?;
    c.enable("tmp.mount")
}

fn timezone(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    let tz = ctx.config.timezone.as_str();
    c.write("/etc/timezone", &format!("{}\n", tz))?;
    c.run(
        Cmd::new("ln")
            .arg("-sf")
            .arg(format!("/usr/share/zoneinfo/{}", tz))
            .arg("/etc/localtime"),
    )?;
    c.run(Cmd::new("dpkg-reconfigure").args(["-f", "noninteractive", "tzdata"]))
}

fn time_sync(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    c.install(&["systemd-timesyncd"])?;
    c.write(
        "/etc/systemd/timesyncd.conf",
        &templates::timesyncd(&ctx.config.ntp_servers),
    )?;
    c.enable("systemd-timesyncd")
}

fn network(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    let net = &ctx.config.network;
    if !net.is_static() {
        info!("no static address configured; {} will use DHCP", net.interface);
    }
    c.write(
        &format!("/etc/systemd/network/10-{}.network", net.interface),
        &templates::network_unit(net),
    )?;
    c.enable("systemd-networkd")?;
    c.install(&["systemd-resolved"])?;
    c.enable("systemd-resolved")
}

fn root_password(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let Some(password) = &ctx.config.root_password else {
        ui::print_info("ROOT_PASSWORD not set; root keeps a locked password.");
        return Ok(());
    };
    let line = Secret::new(format!("root:{}", password.expose()));
    Chroot::new(ctx).run(Cmd::new("chpasswd").stdin(line))
}

fn root_ssh_key(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let Some(key) = &ctx.config.root_ssh_key else {
        ui::print_info("ROOT_SSH_KEY not set; no key installed for root.");
        return Ok(());
    };
    let c = Chroot::new(ctx);
    ctx.platform
        .create_dir_all(&ctx.in_root("/root/.ssh"), Some(0o700))?;
    c.write_mode("/root/.ssh/authorized_keys", &format!("{}\n", key.trim()), 0o600)?;
    c.run(Cmd::new("chown").args(["-R", "root:root", "/root/.ssh"]))
}

fn ssh_server(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);
    let ssh = &ctx.config.ssh;
    c.install(&["openssh-server"])?;

    let port = ssh.port.to_string();
    let allow = ssh.allow_users.join(" ");
    let directives = [
        ("Port", port.as_str()),
        ("PasswordAuthentication", "no"),
        ("KbdInteractiveAuthentication", "no"),
        ("UsePAM", "no"),
        ("PermitRootLogin", "prohibit-password"),
        ("AllowUsers", allow.as_str()),
    ];

    let mut sshd = c.read("/etc/ssh/sshd_config")?;
    for (key, value) in directives {
        sshd = templates::set_directive(&sshd, key, value);
    }
    c.write("/etc/ssh/sshd_config", &sshd)?;
    c.enable("ssh")
}

fn extra_packages(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let packages: Vec<&str> = ctx.config.extra_packages.iter().map(String::as_str).collect();
    if packages.is_empty() {
        ui::print_info("No extra packages requested.");
        return Ok(());
    }
    Chroot::new(ctx).install(&packages)
}

fn bootloader(ctx: &RunContext<'_>) -> Result<(), InstallerError> {
    let c = Chroot::new(ctx);

    let grub = c.read("/etc/default/grub")?;
    let cmdline = format!("root=ZFS={}", ctx.root_dataset());
    c.write(
        "/etc/default/grub",
        &templates::add_shell_param(&grub, "GRUB_CMDLINE_LINUX", &cmdline),
    )?;

    c.run(Cmd::new("update-initramfs").args(["-c", "-k", "all"]).streaming())?;

    let probe = c.capture(Cmd::new("grub-probe").arg("/boot"))?;
    if probe.trim() != "zfs" {
        ui::print_warning(&format!(
            "grub-probe reports '{}' for /boot, expected 'zfs'",
            probe.trim()
        ));
    }

    c.run(Cmd::new("update-grub"))?;
    c.run(Cmd::new("grub-install").args([
        "--target=x86_64-efi",
        "--efi-directory=/boot/efi",
        "--bootloader-id=debian",
        "--recheck",
        "--no-floppy",
    ]))
}
