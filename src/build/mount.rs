//! Overlay mount management
//!
//! A `MountTarget` is the ephemeral triple behind every RUN/CMD
//! instruction: a merged view (target), a private writable directory
//! (upper) and the ordered lower layers beneath them. Mounting goes
//! through the `MountDriver` trait so the engine can be exercised without
//! a real overlayfs; production uses the system mount/umount binaries.
//!
//! Cleanup (unmount plus deletion of target and upper) runs on every exit
//! path. A Drop backstop covers paths that never reach the explicit
//! cleanup call.

use crate::config::Layout;
use crate::error::{StrataError, StrataResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// Performs the actual mount and unmount operations
#[async_trait]
pub trait MountDriver: Send + Sync {
    /// Mount `lowers` (base first) merged under `target`, with writes
    /// diverted to `upper`
    async fn mount(&self, target: &Path, upper: &Path, lowers: &[PathBuf]) -> StrataResult<()>;

    /// Unmount a previously mounted target
    async fn unmount(&self, target: &Path) -> StrataResult<()>;
}

/// Overlayfs driver shelling out to mount(8)/umount(8)
pub struct OverlayDriver;

impl OverlayDriver {
    /// overlayfs needs a work directory on the same filesystem as upper;
    /// derive it from the target name so unmount can find it again
    fn work_dir(target: &Path) -> PathBuf {
        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(".work");
        target.with_file_name(name)
    }
}

/// overlayfs lists lowerdir topmost-first; callers pass layers base-first
fn overlay_options(upper: &Path, work: &Path, lowers: &[PathBuf]) -> String {
    let lowerdir = lowers
        .iter()
        .rev()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":");
    format!(
        "lowerdir={lowerdir},upperdir={},workdir={}",
        upper.display(),
        work.display()
    )
}

#[async_trait]
impl MountDriver for OverlayDriver {
    async fn mount(&self, target: &Path, upper: &Path, lowers: &[PathBuf]) -> StrataResult<()> {
        let work = Self::work_dir(target);
        tokio::fs::create_dir_all(&work)
            .await
            .map_err(|e| StrataError::io(format!("creating {}", work.display()), e))?;

        let options = overlay_options(upper, &work, lowers);
        debug!("mount -t overlay -o {options} {}", target.display());

        let output = Command::new("mount")
            .args(["-t", "overlay", "overlay", "-o", options.as_str()])
            .arg(target)
            .output()
            .await
            .map_err(|e| StrataError::command_failed("mount", e))?;

        if !output.status.success() {
            let _ = tokio::fs::remove_dir_all(&work).await;
            return Err(StrataError::MountFailed {
                target: target.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> StrataResult<()> {
        let output = Command::new("umount")
            .arg(target)
            .output()
            .await
            .map_err(|e| StrataError::command_failed("umount", e))?;

        if !output.status.success() {
            return Err(StrataError::UnmountFailed {
                target: target.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let work = Self::work_dir(target);
        let _ = tokio::fs::remove_dir_all(&work).await;
        Ok(())
    }
}

/// One mounted (or mountable) merged view
pub struct MountTarget {
    target: PathBuf,
    upper: PathBuf,
    lowers: Vec<PathBuf>,
    driver: Arc<dyn MountDriver>,
    mounted: bool,
    cleaned: bool,
}

impl MountTarget {
    /// Create a mount target. Fresh temporary directories are allocated
    /// for target and upper when not supplied. At least one lower layer
    /// is required.
    pub async fn new(
        layout: &Layout,
        target: Option<PathBuf>,
        upper: Option<PathBuf>,
        lowers: Vec<PathBuf>,
        driver: Arc<dyn MountDriver>,
    ) -> StrataResult<Self> {
        if lowers.is_empty() {
            return Err(StrataError::NoLowerLayers);
        }

        let target = match target {
            Some(dir) => dir,
            None => layout.mk_tmp_dir("target").await?,
        };
        let upper = match upper {
            Some(dir) => dir,
            None => layout.mk_tmp_dir("upper").await?,
        };

        Ok(Self {
            target,
            upper,
            lowers,
            driver,
            mounted: false,
            cleaned: false,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn upper(&self) -> &Path {
        &self.upper
    }

    pub async fn mount(&mut self) -> StrataResult<()> {
        self.driver
            .mount(&self.target, &self.upper, &self.lowers)
            .await?;
        self.mounted = true;
        Ok(())
    }

    pub async fn unmount(&mut self) -> StrataResult<()> {
        self.driver.unmount(&self.target).await?;
        self.mounted = false;
        Ok(())
    }

    /// Unmount if needed and delete the target and upper directories.
    /// Failures are logged, never propagated: cleanup runs on error paths
    /// where the original error must survive.
    pub async fn cleanup(mut self) {
        if self.mounted {
            if let Err(e) = self.driver.unmount(&self.target).await {
                warn!("cleanup: {e}");
            }
            self.mounted = false;
        }

        for dir in [&self.target, &self.upper] {
            if let Err(e) = remove_path(dir).await {
                warn!("cleanup: failed to remove {}: {e}", dir.display());
            }
        }
        self.cleaned = true;
    }
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl Drop for MountTarget {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        warn!(
            "mount target {} dropped without cleanup",
            self.target.display()
        );
        if self.mounted {
            let _ = std::process::Command::new("umount")
                .arg(&self.target)
                .status();
        }
        let _ = std::fs::remove_dir_all(&self.target);
        let _ = std::fs::remove_dir_all(&self.upper);
    }
}
