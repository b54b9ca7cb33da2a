// Background removal service library
pub mod api;
pub mod config;
pub mod error;
pub mod handshake;
pub mod lifecycle;
pub mod models;
pub mod requirements;
pub mod state;
pub mod storage;
pub mod temp_files;
pub mod time;

pub use error::ServiceError;

/// Model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "u2netp";
