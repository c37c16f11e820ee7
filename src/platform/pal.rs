//! Filesystem statistics and mount-table access: statvfs wrapper,
//! `/proc/self/mounts` parsing, backing-device name derivation.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{DwdError, Result};

/// Filesystem statistics for a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    /// Bytes available to unprivileged callers (what the watchdog acts on).
    pub available_bytes: u64,
    pub fs_type: String,
    pub mount_point: PathBuf,
    pub device: String,
}

/// Mount-point metadata from the kernel mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
}

/// Collect statvfs-backed stats for the mount owning `path`.
pub fn fs_stats(path: &Path) -> Result<FsStats> {
    let mounts = mount_points()?;
    let mount = find_mount(path, &mounts).ok_or_else(|| DwdError::MountUnavailable {
        path: path.to_path_buf(),
        details: "could not map path to a mount point".to_string(),
    })?;
    let stat = nix::sys::statvfs::statvfs(path).map_err(|error| DwdError::MountUnavailable {
        path: path.to_path_buf(),
        details: error.to_string(),
    })?;
    let fragment = stat.fragment_size();
    Ok(FsStats {
        total_bytes: stat.blocks().saturating_mul(fragment),
        free_bytes: stat.blocks_free().saturating_mul(fragment),
        available_bytes: stat.blocks_available().saturating_mul(fragment),
        fs_type: mount.fs_type.clone(),
        mount_point: mount.path.clone(),
        device: mount.device.clone(),
    })
}

/// Parse the kernel mount table.
pub fn mount_points() -> Result<Vec<MountPoint>> {
    let raw = fs::read_to_string("/proc/self/mounts").map_err(|source| DwdError::Io {
        path: PathBuf::from("/proc/self/mounts"),
        source,
    })?;
    parse_proc_mounts(&raw)
}

/// Longest-prefix mount lookup.
pub fn find_mount<'a>(path: &Path, mounts: &'a [MountPoint]) -> Option<&'a MountPoint> {
    mounts
        .iter()
        .filter(|mount| path.starts_with(&mount.path))
        .max_by_key(|mount| mount.path.as_os_str().len())
}

fn parse_proc_mounts(raw: &str) -> Result<Vec<MountPoint>> {
    let mut mounts = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            return Err(DwdError::MountParse {
                details: format!("invalid /proc/self/mounts line: {line}"),
            });
        }
        mounts.push(MountPoint {
            path: PathBuf::from(unescape_mount_field(fields[1])),
            device: fields[0].to_string(),
            fs_type: fields[2].to_string(),
        });
    }
    Ok(mounts)
}

/// Derive the backing block-device base name from a mount device path.
///
/// Strips the `/dev/` prefix and any trailing partition suffix, including
/// the `p<N>` form used by NVMe and MMC devices: `/dev/nvme1n1p2` →
/// `nvme1n1`, `/dev/sda3` → `sda`. Non-partitioned and virtual devices
/// (`tmpfs`, mapper names) pass through with only the prefix stripped.
#[must_use]
pub fn device_base_name(device: &str) -> String {
    let name = device.strip_prefix("/dev/").unwrap_or(device);

    // NVMe / MMC style: <base><digit>p<N>.
    if let Some(idx) = name.rfind('p') {
        let (head, tail) = name.split_at(idx);
        let part = &tail[1..];
        if !part.is_empty()
            && part.bytes().all(|b| b.is_ascii_digit())
            && head.ends_with(|c: char| c.is_ascii_digit())
        {
            return head.to_string();
        }
    }

    // Classic style: sdXN / vdXN. Namespaced devices (nvme0n1) keep their
    // trailing digits; they were handled above when partitioned.
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return name.to_string();
    }
    name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

/// Decode octal escape sequences (`\NNN`) used by the kernel in
/// `/proc/mounts` for special characters in paths.
fn unescape_mount_field(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let a = bytes[i + 1];
            let b = bytes[i + 2];
            let c = bytes[i + 3];
            if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() {
                let val = (a - b'0') * 64 + (b - b'0') * 8 + (c - b'0');
                result.push(char::from(val));
                i += 4;
                continue;
            }
        }
        result.push(char::from(bytes[i]));
        i += 1;
    }
    result
}
