// Shared state handed to every request handler
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::{ModelCache, SessionFactory};
use crate::temp_files::TempFileRegistry;

pub struct AppState {
    pub models: ModelCache,
    pub temp_files: TempFileRegistry,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        models_dir: PathBuf,
        min_free_mb: u64,
        upload_dir: PathBuf,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            models: ModelCache::new(factory, models_dir, min_free_mb),
            temp_files: TempFileRegistry::new(upload_dir),
            max_upload_bytes,
        }
    }
}
