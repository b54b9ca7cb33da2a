// Lazily populated model-name -> session cache
use log::{debug, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use super::{SessionFactory, SharedSession};
use crate::error::{Result, ServiceError};
use crate::storage;

/// Sessions are loaded on first use and kept until `clear`.
///
/// Misses take a per-name load lock, so concurrent misses for the same name
/// load once while different models load in parallel.
pub struct ModelCache {
    factory: Arc<dyn SessionFactory>,
    models_dir: PathBuf,
    min_free_mb: u64,
    sessions: RwLock<HashMap<String, SharedSession>>,
    load_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ModelCache {
    pub fn new(factory: Arc<dyn SessionFactory>, models_dir: PathBuf, min_free_mb: u64) -> Self {
        Self {
            factory,
            models_dir,
            min_free_mb,
            sessions: RwLock::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn weights_path(&self, model_name: &str) -> PathBuf {
        self.factory.weights_path(model_name, &self.models_dir)
    }

    pub fn get_or_load(&self, model_name: &str) -> Result<SharedSession> {
        if let Some(cached) = self.cached(model_name) {
            debug!("Using cached model: {model_name}");
            return Ok(cached);
        }

        let load_lock = Arc::clone(lock(&self.load_locks).entry(model_name.to_string()).or_default());
        let loaded = {
            let _loading = lock(&load_lock);
            self.load_uncached(model_name)
        };
        self.release_load_lock(model_name, &load_lock);
        loaded
    }

    fn load_uncached(&self, model_name: &str) -> Result<SharedSession> {
        // another request may have finished loading while we waited
        if let Some(cached) = self.cached(model_name) {
            debug!("Using cached model: {model_name}");
            return Ok(cached);
        }

        storage::ensure_dir(&self.models_dir).map_err(|e| ServiceError::processing(format!("{e:#}")))?;
        storage::ensure_free_space(&self.models_dir, self.min_free_mb)?;

        let weights = self.weights_path(model_name);
        if weights.exists() {
            info!("Model {model_name} found at {}.", weights.display());
        } else {
            info!(
                "Model {model_name} not found at {}. It will be downloaded.",
                weights.display()
            );
        }

        info!("Loading model: {model_name}...");
        let loaded = self
            .factory
            .load(model_name, &self.models_dir)
            .map_err(|e| ServiceError::processing(format!("{e:#}")))?;
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model_name.to_string(), Arc::clone(&loaded));
        info!("Model {model_name} loaded and cached.");
        Ok(loaded)
    }

    /// Drops the name's load lock once no other request holds or waits on it.
    fn release_load_lock(&self, model_name: &str, load_lock: &Arc<Mutex<()>>) {
        let mut locks = lock(&self.load_locks);
        let ours = locks
            .get(model_name)
            .is_some_and(|current| Arc::ptr_eq(current, load_lock));
        // waiters clone the lock under `load_locks`, so the count is stable here
        if ours && Arc::strong_count(load_lock) == 2 {
            locks.remove(model_name);
        }
    }

    /// Names of models with a live session, sorted.
    pub fn loaded_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drops every cached session and returns how many there were.
    pub fn clear(&self) -> usize {
        let cleared = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            let count = sessions.len();
            sessions.clear();
            count
        };
        lock(&self.load_locks).clear();
        cleared
    }

    fn cached(&self, model_name: &str) -> Option<SharedSession> {
        self.read().get(model_name).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SharedSession>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
