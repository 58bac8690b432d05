//! RAM-backed model staging volume.
//!
//! Lifecycle: Absent -> Sizing -> Mounted | MountFailed; Mounted ->
//! TornDown on shutdown or explicit clear. Mount is all-or-nothing and
//! every shortfall (permission, capacity) downgrades to ordinary storage
//! instead of failing startup. All state transitions serialize on one
//! lifecycle lock; concurrent mount/unmount races are unsafe by
//! construction.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use semvec_types::{bytes_hash, RamDiskSettings};

use crate::error::RamDiskError;

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RamDiskStatus {
    Absent,
    Sizing,
    Mounted,
    MountFailed,
    TornDown,
}

impl std::fmt::Display for RamDiskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RamDiskStatus::Absent => "absent",
            RamDiskStatus::Sizing => "sizing",
            RamDiskStatus::Mounted => "mounted",
            RamDiskStatus::MountFailed => "mount_failed",
            RamDiskStatus::TornDown => "torn_down",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the volume.
#[derive(Debug, Clone, Serialize)]
pub struct RamDiskSnapshot {
    pub status: RamDiskStatus,
    pub path: PathBuf,
    pub size_mb: u64,
    pub mounted: bool,
}

/// Host operations the manager drives. The real implementation shells out
/// to mount(8); tests inject fakes to simulate permission and capacity
/// failures.
pub trait MountOps: Send + Sync {
    /// Whether this process may manage tmpfs mounts.
    fn has_permission(&self) -> bool;

    /// Physical memory currently available, in megabytes.
    fn available_memory_mb(&self) -> Option<u64>;

    /// Mount a tmpfs of the given size at the path.
    fn mount(&self, path: &Path, size_mb: u64) -> Result<(), RamDiskError>;

    /// Unmount the volume at the path.
    fn unmount(&self, path: &Path) -> Result<(), RamDiskError>;
}

/// Production mount operations via the mount/umount binaries.
pub struct SystemMount;

impl MountOps for SystemMount {
    fn has_permission(&self) -> bool {
        // Managing tmpfs mounts needs root
        Command::new("id")
            .arg("-u")
            .output()
            .ok()
            .map(|out| String::from_utf8_lossy(&out.stdout).trim() == "0")
            .unwrap_or(false)
    }

    fn available_memory_mb(&self) -> Option<u64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemAvailable:") {
                let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
                return Some(kb / 1024);
            }
        }
        None
    }

    fn mount(&self, path: &Path, size_mb: u64) -> Result<(), RamDiskError> {
        std::fs::create_dir_all(path)?;
        let output = Command::new("mount")
            .args(["-t", "tmpfs", "-o"])
            .arg(format!("size={}m", size_mb))
            .arg("tmpfs")
            .arg(path)
            .output()
            .map_err(|e| RamDiskError::Command(e.to_string()))?;
        if !output.status.success() {
            return Err(RamDiskError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<(), RamDiskError> {
        let output = Command::new("umount")
            .arg(path)
            .output()
            .map_err(|e| RamDiskError::Command(e.to_string()))?;
        if !output.status.success() {
            return Err(RamDiskError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

struct LifecycleState {
    status: RamDiskStatus,
    size_mb: u64,
}

/// Manages the staging volume. One instance per process, lifecycle-bound
/// to startup/shutdown.
pub struct RamDiskManager<M: MountOps = SystemMount> {
    settings: RamDiskSettings,
    ops: M,
    state: Mutex<LifecycleState>,
}

impl RamDiskManager<SystemMount> {
    pub fn new(settings: RamDiskSettings) -> Self {
        Self::with_ops(settings, SystemMount)
    }
}

impl<M: MountOps> RamDiskManager<M> {
    pub fn with_ops(settings: RamDiskSettings, ops: M) -> Self {
        Self {
            settings,
            ops,
            state: Mutex::new(LifecycleState {
                status: RamDiskStatus::Absent,
                size_mb: 0,
            }),
        }
    }

    /// Volume mount point.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.settings.path)
    }

    /// Sizing policy: a bounded fraction of available memory, capped by
    /// the ceiling, and only if the remainder leaves the inference
    /// workload its reserve. None = do not mount.
    pub fn candidate_size_mb(&self, available_mb: u64) -> Option<u64> {
        let fraction = (available_mb as f64 * self.settings.memory_fraction) as u64;
        let candidate = fraction.min(self.settings.ceiling_mb);
        if candidate == 0 {
            return None;
        }
        if available_mb.saturating_sub(candidate) < self.settings.inference_reserve_mb {
            return None;
        }
        Some(candidate)
    }

    /// Bring the volume up. Permission or capacity shortfalls downgrade
    /// to `MountFailed` (logged once, non-fatal); the caller proceeds on
    /// ordinary storage.
    pub async fn setup(&self) -> RamDiskStatus {
        let mut state = self.state.lock().await;
        if state.status == RamDiskStatus::Mounted {
            return RamDiskStatus::Mounted;
        }
        state.status = RamDiskStatus::Sizing;

        let Some(available) = self.ops.available_memory_mb() else {
            warn!("Cannot determine available memory, continuing on ordinary storage");
            state.status = RamDiskStatus::MountFailed;
            return state.status;
        };

        let Some(size_mb) = self.candidate_size_mb(available) else {
            warn!(
                available_mb = available,
                reserve_mb = self.settings.inference_reserve_mb,
                "Insufficient memory for a RAM disk, continuing on ordinary storage"
            );
            state.status = RamDiskStatus::MountFailed;
            return state.status;
        };

        if !self.ops.has_permission() {
            warn!("Missing permission to manage RAM disks, continuing on ordinary storage");
            state.status = RamDiskStatus::MountFailed;
            return state.status;
        }

        match self.ops.mount(&self.path(), size_mb) {
            Ok(()) => {
                info!(path = %self.settings.path, size_mb = size_mb, "RAM disk mounted");
                state.status = RamDiskStatus::Mounted;
                state.size_mb = size_mb;
            }
            Err(e) => {
                warn!(error = %e, "RAM disk mount failed, continuing on ordinary storage");
                state.status = RamDiskStatus::MountFailed;
            }
        }
        state.status
    }

    /// Tear the volume down (shutdown or explicit clear).
    pub async fn teardown(&self) -> Result<RamDiskStatus, RamDiskError> {
        let mut state = self.state.lock().await;
        if state.status == RamDiskStatus::Mounted {
            self.ops.unmount(&self.path())?;
            info!(path = %self.settings.path, "RAM disk torn down");
        }
        state.status = RamDiskStatus::TornDown;
        state.size_mb = 0;
        Ok(state.status)
    }

    /// Current snapshot.
    pub async fn status(&self) -> RamDiskSnapshot {
        let state = self.state.lock().await;
        RamDiskSnapshot {
            status: state.status,
            path: self.path(),
            size_mb: state.size_mb,
            mounted: state.status == RamDiskStatus::Mounted,
        }
    }

    /// Copy model files onto the volume, then verify every byte landed.
    /// Any mismatch rolls the volume back so model loading falls through
    /// to the original directory. Never a partially staged volume.
    ///
    /// Returns the staged models directory.
    pub async fn stage_models(&self, source_dir: &Path) -> Result<PathBuf, RamDiskError> {
        let mut state = self.state.lock().await;
        if state.status != RamDiskStatus::Mounted {
            return Err(RamDiskError::Unavailable(format!(
                "volume is {}, not mounted",
                state.status
            )));
        }

        let dest_dir = self.path().join("models");
        match copy_and_verify(source_dir, &dest_dir) {
            Ok(count) => {
                info!(files = count, dest = ?dest_dir, "Models staged onto RAM disk");
                Ok(dest_dir)
            }
            Err(e) => {
                warn!(error = %e, "Staging failed, rolling back RAM disk");
                let _ = std::fs::remove_dir_all(&dest_dir);
                if let Err(unmount_err) = self.ops.unmount(&self.path()) {
                    warn!(error = %unmount_err, "Rollback unmount failed");
                }
                state.status = RamDiskStatus::MountFailed;
                state.size_mb = 0;
                Err(e)
            }
        }
    }
}

/// Copy every regular file in `source_dir` into `dest_dir`, then verify
/// each copy by content digest. Returns the file count.
fn copy_and_verify(source_dir: &Path, dest_dir: &Path) -> Result<usize, RamDiskError> {
    std::fs::create_dir_all(dest_dir)?;

    let mut count = 0;
    for entry in std::fs::read_dir(source_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let src = entry.path();
        let dest = dest_dir.join(entry.file_name());
        std::fs::copy(&src, &dest)?;

        if !copies_match(&src, &dest)? {
            return Err(RamDiskError::StagingFailed(format!(
                "digest mismatch for {}",
                entry.file_name().to_string_lossy()
            )));
        }
        count += 1;
    }
    Ok(count)
}

/// Compare two files by content digest.
fn copies_match(a: &Path, b: &Path) -> Result<bool, RamDiskError> {
    let bytes_a = std::fs::read(a)?;
    let bytes_b = std::fs::read(b)?;
    Ok(bytes_hash(&bytes_a) == bytes_hash(&bytes_b))
}
