use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zfs-root-installer", version)]
#[command(about = "Install Debian on an encrypted ZFS root, erasing the target disk")]
#[command(
    after_help = "The configuration file holds KEY=value lines; DISK and ZFS_PASSPHRASE are mandatory.\nDISK=auto installs onto the largest disk."
)]
pub struct Args {
    /// Configuration file (KEY=value, shell syntax)
    pub config: PathBuf,

    /// Print every command and file write instead of performing it
    #[arg(long)]
    pub dry_run: bool,

    /// Staging directory the new system is assembled under
    #[arg(long, default_value = "/mnt")]
    pub root: PathBuf,

    /// Show every command line as it runs
    #[arg(long)]
    pub debug: bool,
}
