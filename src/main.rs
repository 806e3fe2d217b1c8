mod cli;
mod cmd;
mod config;
mod context;
mod error;
#[cfg(test)]
mod fake;
mod logger;
mod lsblk;
mod mounts;
mod pipeline;
mod platform;
mod poll;
mod steps;
mod templates;
mod ui;

use clap::Parser;

use cli::Args;
use context::RunContext;
use error::InstallerError;
use platform::{DryRunPlatform, Platform, SystemPlatform};

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    let args = Args::parse();

    if let Err(e) = logger::init(args.debug) {
        eprintln!("failed to set up logging: {}", e);
    }

    if let Err(e) = run(&args) {
        println!();
        ui::print_error(&format!("{}", e));
        std::process::exit(e.exit_code());
    }
}

fn run(args: &Args) -> Result<(), InstallerError> {
    let platform: Box<dyn Platform> = if args.dry_run {
        Box::new(DryRunPlatform::default())
    } else {
        Box::new(SystemPlatform)
    };

    // ── Welcome ───────────────────────────────────────────────────────────────
    ui::print_banner();

    if args.dry_run {
        ui::print_warning(
            "DRY-RUN MODE: no disk will be touched, no command will change anything.",
        );
    }

    // ── Preflight ─────────────────────────────────────────────────────────────
    ui::print_info("Checking the host before touching anything…");
    let config = steps::preflight::run(platform.as_ref(), &args.config)?;

    // ── Install ───────────────────────────────────────────────────────────────
    let mut ctx = RunContext::new(platform.as_ref(), config, &args.root);
    steps::pipeline().run(&mut ctx)?;

    // ── Summary ───────────────────────────────────────────────────────────────
    let target = ctx.target()?;
    let disk = target.disk.display().to_string();
    let root_dataset = ctx.root_dataset();
    let ssh_port = ctx.config.ssh.port.to_string();
    let address = ctx
        .config
        .network
        .ipv4
        .as_ref()
        .map(|a| a.address().to_string())
        .unwrap_or_else(|| "DHCP".to_string());

    println!();
    ui::print_kv_box(
        "Installation complete",
        &[
            ("Disk", disk.as_str()),
            ("Root dataset", root_dataset.as_str()),
            ("Hostname", ctx.config.fqdn.as_str()),
            ("Address", address.as_str()),
            ("SSH port", ssh_port.as_str()),
        ],
    );
    println!();
    ui::print_success("The new system is ready.");
    ui::print_info("Remove the installation medium and reboot. The root pool passphrase");
    ui::print_info("is asked for at boot.");
    println!();

    Ok(())
}
