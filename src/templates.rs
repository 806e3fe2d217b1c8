//! Contents of the configuration files written into the new system.
//!
//! Everything here is a pure function of the configuration so it can be
//! checked without a target.

use std::path::Path;

use crate::config::{Keyboard, Network};

pub fn sources_list(release: &str, mirror: &str) -> String {
    let components = "main contrib non-free-firmware";
    format!(
        "deb {mirror} {release} {components}\n\
         deb {mirror} {release}-updates {components}\n\
         deb http://security.debian.org/debian-security {release}-security {components}\n"
    )
}

pub fn hostname(hostname: &str) -> String {
    format!("{}\n", hostname)
}

/// `/etc/hosts`. With a static IPv4 address the host name resolves to it,
/// otherwise to the Debian-conventional 127.0.1.1.
pub fn hosts(hostname: &str, fqdn: &str, ipv4: Option<&str>) -> String {
    let names = if fqdn == hostname {
        hostname.to_string()
    } else {
        format!("{} {}", fqdn, hostname)
    };
    format!(
        "127.0.0.1\tlocalhost\n\
         {}\t{}\n\
         \n\
         ::1\tlocalhost ip6-localhost ip6-loopback\n\
         ff02::1\tip6-allnodes\n\
         ff02::2\tip6-allrouters\n",
        ipv4.unwrap_or("127.0.1.1"),
        names
    )
}

pub fn locale_gen(locale: &str) -> String {
    let charset = locale.split_once('.').map(|(_, c)| c).unwrap_or("UTF-8");
    format!("{} {}\n", locale, charset)
}

pub fn keyboard(kb: &Keyboard) -> String {
    format!(
        "XKBMODEL=\"{}\"\nXKBLAYOUT=\"{}\"\nXKBVARIANT=\"{}\"\nXKBOPTIONS=\"\"\n\nBACKSPACE=\"guess\"\n",
        kb.model, kb.layout, kb.variant
    )
}

pub fn dkms_zfs() -> &'static str {
    "REMAKE_INITRD=yes\n"
}

/// The fstab line for the EFI partition. `source` is `UUID=...` or a device
/// path.
pub fn fstab_efi(source: &str) -> String {
    format!("{} /boot/efi vfat defaults 0 0\n", source)
}

/// Imports the boot pool early, with the cache file moved aside so the
/// import does not rewrite it.
pub fn bpool_import_unit() -> &'static str {
    "[Unit]\n\
     DefaultDependencies=no\n\
     Before=zfs-import-scan.service\n\
     Before=zfs-import-cache.service\n\
     \n\
     [Service]\n\
     Type=oneshot\n\
     RemainAfterExit=yes\n\
     ExecStartPre=-/bin/mv /etc/zfs/zpool.cache /etc/zfs/preboot_zpool.cache\n\
     ExecStart=/sbin/zpool import -N -o cachefile=none bpool\n\
     ExecStartPost=-/bin/mv /etc/zfs/preboot_zpool.cache /etc/zfs/zpool.cache\n\
     \n\
     [Install]\n\
     WantedBy=zfs-import.target\n"
}

pub fn timesyncd(servers: &[String]) -> String {
    format!("[Time]\nNTP={}\n", servers.join(" "))
}

/// systemd-networkd unit for the primary interface. Without any static
/// address the interface falls back to DHCP.
pub fn network_unit(net: &Network) -> String {
    let mut out = format!("[Match]\nName={}\n\n[Network]\n", net.interface);

    if !net.is_static() {
        out.push_str("DHCP=yes\n");
    }
    for addr in [&net.ipv4, &net.ipv6].into_iter().flatten() {
        out.push_str(&format!("Address={}\n", addr.cidr));
        if let Some(gw) = &addr.gateway {
            out.push_str(&format!("Gateway={}\n", gw));
        }
    }
    for dns in &net.dns {
        out.push_str(&format!("DNS={}\n", dns));
    }
    out
}

// ── Patching existing files ───────────────────────────────────────────────────

/// Sets `key value` in an sshd_config-style file.
///
/// The first line setting `key` (active or commented out) is replaced, any
/// later ones are dropped, and the directive is appended if none existed.
/// Directives inside `Match` blocks are left alone.
pub fn set_directive(content: &str, key: &str, value: &str) -> String {
    let line = format!("{} {}", key, value);
    let mut out = Vec::new();
    let mut done = false;
    let mut in_match = false;

    for current in content.lines() {
        let bare = current.trim_start().trim_start_matches('#').trim_start();
        let word = bare.split_whitespace().next().unwrap_or("");

        if !current.trim_start().starts_with('#') && word.eq_ignore_ascii_case("match") {
            in_match = true;
        }
        if !in_match && word.eq_ignore_ascii_case(key) {
            if !done {
                out.push(line.clone());
                done = true;
            }
            continue;
        }
        out.push(current.to_string());
    }

    if !done {
        // Global directives must precede any Match block.
        match out.iter().position(|l| {
            let t = l.trim_start();
            !t.starts_with('#')
                && t
                    .split_whitespace()
                    .next()
                    .is_some_and(|w| w.eq_ignore_ascii_case("match"))
        }) {
            Some(pos) => out.insert(pos, line),
            None => out.push(line),
        }
    }

    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

/// Adds `param` to the space-separated list in `KEY="..."` of a shell-variable
/// file such as `/etc/default/grub`. Other words are kept; a word with the
/// same `name=` as `param` is replaced. A missing or commented-out variable
/// is set to `param` alone.
pub fn add_shell_param(content: &str, key: &str, param: &str) -> String {
    let prefix = format!("{}=", key);
    let param_name = param.split_once('=').map_or(param, |(n, _)| n);
    let same_name = |word: &str| word.split_once('=').map_or(word, |(n, _)| n) == param_name;

    let lines: Vec<&str> = content.lines().collect();
    let active = lines.iter().position(|l| l.trim_start().starts_with(&prefix));
    let commented = || {
        lines.iter().position(|l| {
            let t = l.trim_start();
            t.starts_with('#') && t.trim_start_matches('#').trim_start().starts_with(&prefix)
        })
    };

    let mut words: Vec<&str> = match active {
        Some(i) => lines[i].trim_start()[prefix.len()..]
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .split_whitespace()
            .filter(|w| !same_name(*w))
            .collect(),
        None => Vec::new(),
    };
    words.push(param);
    let line = format!("{}\"{}\"", prefix, words.join(" "));

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    match active.or_else(commented) {
        Some(i) => out[i] = line,
        None => out.push(line),
    }

    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}

/// Rewrites a `zfs-list.cache` file recorded under the staging root so its
/// mountpoints are the ones of the installed system.
///
/// Fields are tab-separated. A field equal to `root` becomes `/`, and a field
/// under `root/` loses the prefix.
pub fn strip_staging_prefix(content: &str, root: &Path) -> String {
    let root = root.to_string_lossy();
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return content.to_string();
    }
    let nested = format!("{}/", root);

    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let fields: Vec<String> = line
            .split('\t')
            .map(|field| {
                if field == root {
                    "/".to_string()
                } else if let Some(rest) = field.strip_prefix(&nested) {
                    format!("/{}", rest)
                } else {
                    field.to_string()
                }
            })
            .collect();
        out.push_str(&fields.join("\t"));
        out.push('\n');
    }
    out
}
