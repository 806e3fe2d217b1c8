use std::path::{Path, PathBuf};

/// One line of `/proc/self/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
}

/// Parses the mount table in kernel order (oldest mount first).
pub fn parse(table: &str) -> Vec<MountEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = unescape(fields.next()?);
            let target = PathBuf::from(unescape(fields.next()?));
            let fstype = fields.next()?.to_string();
            Some(MountEntry {
                source,
                target,
                fstype,
            })
        })
        .collect()
}

/// Mounts at or below `root`, deepest and most recent first: the order
/// in which they can be unmounted without hitting "target is busy".
pub fn under(entries: &[MountEntry], root: &Path) -> Vec<MountEntry> {
    let mut found: Vec<(usize, MountEntry)> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.target.starts_with(root))
        .map(|(i, e)| (i, e.clone()))
        .collect();

    // Later mounts may stack on earlier ones; depth breaks the remaining ties.
    found.sort_by(|(ia, a), (ib, b)| {
        let depth = |e: &MountEntry| e.target.components().count();
        depth(b).cmp(&depth(a)).then(ib.cmp(ia))
    });
    found.into_iter().map(|(_, e)| e).collect()
}

/// Whether `candidate` is `disk` itself or one of its partitions
/// (`/dev/sda` → `/dev/sda3`, `/dev/nvme0n1` → `/dev/nvme0n1p3`).
pub fn is_on_disk(candidate: &str, disk: &str) -> bool {
    let Some(rest) = candidate.strip_prefix(disk) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    let digits = if disk.ends_with(|c: char| c.is_ascii_digit()) {
        match rest.strip_prefix('p') {
            Some(d) => d,
            None => return false,
        }
    } else {
        rest
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let oct = &bytes[i + 1..i + 4];
            if oct.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let v = oct.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(v) = u8::try_from(v) {
                    out.push(v);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
