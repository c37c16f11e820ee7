//! Space sampler: one call returns total/free bytes and the backing block
//! device for the monitored mount.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use crate::core::errors::Result;
use crate::platform::pal::{self, FsStats};

pub const BYTES_PER_GB: u64 = 1 << 30;

/// One sample of the monitored mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceSample {
    pub total_bytes: u64,
    pub free_bytes: u64,
    /// Backing block-device base name, e.g. `nvme1n1`.
    pub device: String,
}

impl SpaceSample {
    /// Free space in whole GB, truncating.
    #[must_use]
    pub const fn free_gb(&self) -> u64 {
        self.free_bytes / BYTES_PER_GB
    }

    /// Disk size in whole GB, truncating.
    #[must_use]
    pub const fn total_gb(&self) -> u64 {
        self.total_bytes / BYTES_PER_GB
    }

    /// Free space as a percentage of the disk.
    #[must_use]
    pub fn free_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            (self.free_bytes as f64 * 100.0) / self.total_bytes as f64
        }
    }
}

/// Sampler bound to one mount point.
#[derive(Debug, Clone)]
pub struct SpaceSampler {
    mount_point: PathBuf,
}

impl SpaceSampler {
    #[must_use]
    pub fn new(mount_point: &Path) -> Self {
        Self {
            mount_point: mount_point.to_path_buf(),
        }
    }

    #[must_use]
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Take one sample. Errors are iteration-transient: the control loop
    /// logs them and backs off rather than exiting.
    pub fn sample(&self) -> Result<SpaceSample> {
        let stats = pal::fs_stats(&self.mount_point)?;
        Ok(Self::from_stats(&stats))
    }

    fn from_stats(stats: &FsStats) -> SpaceSample {
        SpaceSample {
            total_bytes: stats.total_bytes,
            // Available (unprivileged) bytes, matching what the filesystem
            // will actually let workloads write.
            free_bytes: stats.available_bytes,
            device: pal::device_base_name(&stats.device),
        }
    }
}
