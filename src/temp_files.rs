// Tracking and cleanup of uploaded images persisted to disk
use log::{debug, warn};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Upload paths that still have to be deleted.
#[derive(Debug)]
pub struct TempFileRegistry {
    dir: PathBuf,
    pending: Mutex<HashSet<PathBuf>>,
}

impl TempFileRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn track(&self, path: PathBuf) {
        self.lock().insert(path);
    }

    pub fn release(&self, path: &Path) {
        self.lock().remove(path);
    }

    pub fn pending(&self) -> Vec<PathBuf> {
        self.lock().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deletes every orphaned path. Returns how many were removed and how many failed.
    pub fn remove_all(&self) -> (usize, usize) {
        let paths: Vec<PathBuf> = self.lock().drain().collect();
        let mut removed = 0;
        let mut failed = 0;
        for path in paths {
            match remove_if_exists(&path) {
                Ok(true) => {
                    debug!("Removed temp file: {}", path.display());
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to remove temp file {}: {e}", path.display());
                    failed += 1;
                }
            }
        }
        (removed, failed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An upload written to a uniquely named file. Deleted and untracked on drop.
#[derive(Debug)]
pub struct TempUpload<'a> {
    registry: &'a TempFileRegistry,
    path: PathBuf,
}

impl<'a> TempUpload<'a> {
    pub fn persist(registry: &'a TempFileRegistry, bytes: &[u8]) -> io::Result<Self> {
        let path = registry
            .dir()
            .join(format!("removebg-{}.png", Uuid::new_v4().simple()));
        registry.track(path.clone());
        // constructed before writing so a failed write still cleans up
        let upload = Self { registry, path };
        std::fs::write(&upload.path, bytes)?;
        Ok(upload)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload<'_> {
    fn drop(&mut self) {
        match remove_if_exists(&self.path) {
            Ok(_) => self.registry.release(&self.path),
            Err(e) => warn!("Failed to cleanup temp file {}: {e}", self.path.display()),
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
