use crate::{
    cmd::{self, Cmd},
    context::RunContext,
    error::InstallerError,
    pipeline::Step,
    ui,
};

/// Something to do right after a dataset exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum After {
    Nothing,
    /// `zfs mount` it now; later steps write into it.
    Mount,
    /// Set permission bits on its mountpoint.
    Chmod(&'static str, &'static str),
}

struct DatasetSpec {
    /// Name relative to the pool; `{release}` is substituted.
    name: &'static str,
    properties: &'static [&'static str],
    after: After,
}

/// Parents always precede their children.
const LAYOUT: &[DatasetSpec] = &[
    DatasetSpec {
        name: "rpool/ROOT",
        properties: &["canmount=off", "mountpoint=none"],
        after: After::Nothing,
    },
    DatasetSpec {
        name: "bpool/BOOT",
        properties: &["canmount=off", "mountpoint=none"],
        after: After::Nothing,
    },
    DatasetSpec {
        name: "rpool/ROOT/{release}",
        properties: &["canmount=noauto", "mountpoint=/"],
        after: After::Mount,
    },
    DatasetSpec {
        name: "bpool/BOOT/{release}",
        properties: &["mountpoint=/boot"],
        after: After::Nothing,
    },
    DatasetSpec {
        name: "rpool/home",
        properties: &[],
        after: After::Nothing,
    },
    DatasetSpec {
        name: "rpool/home/root",
        properties: &["mountpoint=/root"],
        after: After::Chmod("700", "/root"),
    },
    DatasetSpec {
        name: "rpool/var",
        properties: &["canmount=off"],
        after: After::Nothing,
    },
    DatasetSpec {
        name: "rpool/var/lib",
        properties: &[],
        after: After::Nothing,
    },
    DatasetSpec {
        name: "rpool/var/log",
        properties: &[],
        after: After::Nothing,
    },
    DatasetSpec {
        name: "rpool/var/spool",
        properties: &[],
        after: After::Nothing,
    },
    DatasetSpec {
        name: "rpool/tmp",
        properties: &["com.sun:auto-snapshot=false"],
        after: After::Chmod("1777", "/tmp"),
    },
];

/// Creates the fixed dataset hierarchy and mounts the root filesystem.
pub struct CreateDatasets;

impl Step for CreateDatasets {
    fn name(&self) -> &str {
        "ZFS Datasets"
    }

    fn run(&self, ctx: &mut RunContext<'_>) -> Result<(), InstallerError> {
        let platform = ctx.platform;

        for spec in LAYOUT {
            let name = spec.name.replace("{release}", &ctx.config.release);

            let mut create = Cmd::new("zfs").arg("create");
            for property in spec.properties {
                create = create.args(["-o", *property]);
            }
            cmd::run(platform, &create.arg(&name))?;

            if !dataset_exists(ctx, &name) {
                return Err(InstallerError::DatasetMissing(name));
            }

            match spec.after {
                After::Nothing => {}
                After::Mount => {
                    cmd::run(platform, &Cmd::new("zfs").args(["mount", name.as_str()]))?
                }
                After::Chmod(mode, path) => cmd::run(
                    platform,
                    &Cmd::new("chmod").arg(mode).arg_path(&ctx.in_root(path)),
                )?,
            }
            ui::print_success(&format!("{} created.", name));
        }

        Ok(())
    }

    fn postcondition(&self, ctx: &RunContext<'_>) -> Result<(), InstallerError> {
        let check = Cmd::new("mountpoint").arg("-q").arg_path(&ctx.root).query();
        let output = ctx.platform.exec(&check)?;
        if !output.success() {
            return Err(InstallerError::DatasetMissing(format!(
                "{} (not mounted at {})",
                ctx.root_dataset(),
                ctx.root.display()
            )));
        }
        Ok(())
    }
}

fn dataset_exists(ctx: &RunContext<'_>, name: &str) -> bool {
    let list = Cmd::new("zfs").args(["list", "-H", "-o", "name", name]).query();
    match ctx.platform.exec(&list) {
        Ok(out) => out.success() && out.stdout.lines().any(|l| l.trim() == name),
        Err(_) => false,
    }
}
