// Models-storage directory and free-space checks
use anyhow::{anyhow, Context};
use log::{error, warn};
use std::path::{Path, PathBuf};
use sysinfo::Disks;

use crate::error::ServiceError;

pub const APP_DIR: &str = "RemoveThatBG";
pub const DEFAULT_MIN_FREE_MB: u64 = 500;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Platform data directory for downloaded weights, without creating it.
pub fn default_models_dir() -> anyhow::Result<PathBuf> {
    Ok(platform_data_dir()?.join(APP_DIR).join("models"))
}

#[cfg(target_os = "macos")]
fn platform_data_dir() -> anyhow::Result<PathBuf> {
    Ok(home_dir()?.join("Library").join("Application Support"))
}

#[cfg(windows)]
fn platform_data_dir() -> anyhow::Result<PathBuf> {
    std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("APPDATA is not set"))
}

#[cfg(not(any(target_os = "macos", windows)))]
fn platform_data_dir() -> anyhow::Result<PathBuf> {
    match std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => Ok(home_dir()?.join(".local").join("share")),
    }
}

#[cfg(not(windows))]
fn home_dir() -> anyhow::Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set"))
}

pub fn ensure_dir(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create models directory {}", dir.display()))
}

/// Free space in MB on the volume holding `path`, if any mounted disk covers it.
pub fn available_mb(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space() / BYTES_PER_MB)
}

/// Fails with `InsufficientStorage` when the volume has less than `required_mb` free.
/// An undeterminable free space is treated as enough.
pub fn ensure_free_space(path: &Path, required_mb: u64) -> Result<(), ServiceError> {
    if required_mb == 0 {
        return Ok(());
    }
    let Some(available) = available_mb(path) else {
        warn!("Could not check disk space for {}", path.display());
        return Ok(());
    };
    if available < required_mb {
        error!(
            "Insufficient disk space in {}: {available} MB free, {required_mb} MB required",
            path.display()
        );
        return Err(ServiceError::InsufficientStorage {
            path: path.to_path_buf(),
            available_mb: available,
            required_mb,
        });
    }
    Ok(())
}
