// Inference backends and the per-process session cache
use image::{DynamicImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod cache;
pub mod u2net;

pub use cache::ModelCache;

/// A loaded model able to cut the background out of an image.
pub trait RemovalSession: Send + Sync {
    fn remove_background(&self, image: DynamicImage) -> anyhow::Result<RgbaImage>;
}

pub type SharedSession = Arc<dyn RemovalSession>;

/// Builds sessions for model names, fetching weights into `models_dir` when needed.
pub trait SessionFactory: Send + Sync {
    fn load(&self, model_name: &str, models_dir: &Path) -> anyhow::Result<SharedSession>;

    /// Where the weights for `model_name` live once downloaded.
    fn weights_path(&self, model_name: &str, models_dir: &Path) -> PathBuf {
        models_dir.join(format!("{model_name}.onnx"))
    }
}
