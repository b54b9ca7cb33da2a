// Command-line and environment configuration
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::handshake;
use crate::models::u2net::DEFAULT_BASE_URL;
use crate::storage;

#[derive(Debug, Clone, Parser)]
#[command(name = "removebg_server", about = "Local background removal service")]
pub struct ServerConfig {
    /// First port to try on 127.0.0.1
    #[arg(long, env = "REMOVEBG_START_PORT", default_value_t = 55000)]
    pub start_port: u16,

    /// How many consecutive ports to try
    #[arg(long, env = "REMOVEBG_PORT_ATTEMPTS", default_value_t = 10)]
    pub port_attempts: u16,

    /// Where model weights are stored, defaults to the platform data directory
    #[arg(long, env = "U2NET_HOME")]
    pub models_dir: Option<PathBuf>,

    /// Minimum free space required on the models volume before loading a model
    #[arg(long, env = "REMOVEBG_MIN_FREE_MB", default_value_t = storage::DEFAULT_MIN_FREE_MB)]
    pub min_free_mb: u64,

    /// Handshake file read by the desktop app
    #[arg(long, env = "REMOVEBG_HANDSHAKE_FILE")]
    pub handshake_file: Option<PathBuf>,

    #[arg(long, env = "REMOVEBG_MAX_UPLOAD_MB", default_value_t = 50)]
    pub max_upload_mb: usize,

    /// Seconds to wait for in-flight requests before cleanup
    #[arg(long, env = "REMOVEBG_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,

    #[arg(long, env = "REMOVEBG_WORKERS")]
    pub workers: Option<usize>,

    /// Intra-op threads per ONNX session, ONNX Runtime picks when unset
    #[arg(long, env = "REMOVEBG_INTRA_THREADS")]
    pub intra_threads: Option<usize>,

    /// Base URL model weights are downloaded from
    #[arg(long, env = "U2NET_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub model_base_url: String,
}

impl ServerConfig {
    pub fn models_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => storage::default_models_dir(),
        }
    }

    pub fn handshake_file(&self) -> PathBuf {
        self.handshake_file
            .clone()
            .unwrap_or_else(handshake::default_port_file)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}
