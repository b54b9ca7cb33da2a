// Port discovery and the handshake file the desktop app reads
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};

use crate::error::{Result, ServiceError};
use crate::time::iso_now;

pub const PORT_FILE_NAME: &str = "removethatbg_port.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRecord {
    pub port: u16,
    pub timestamp: String,
}

pub fn default_port_file() -> PathBuf {
    std::env::temp_dir().join(PORT_FILE_NAME)
}

/// First loopback port in `[start_port, start_port + max_attempts)` that binds.
/// The test listener is closed before returning.
pub fn find_available_port(start_port: u16, max_attempts: u16) -> Result<u16> {
    let end = u32::from(start_port) + u32::from(max_attempts);
    for port in (u32::from(start_port)..end).filter_map(|p| u16::try_from(p).ok()) {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => {
                drop(listener);
                return Ok(port);
            }
            Err(e) => debug!("Port {port} unavailable: {e}"),
        }
    }
    Err(ServiceError::NoPortAvailable {
        start: start_port,
        end,
    })
}

/// Replaces `path` with the chosen port and the current time.
/// Readers see either the previous file or the complete new one.
pub fn write_port_file(path: &Path, port: u16) -> Result<HandshakeRecord> {
    let record = HandshakeRecord {
        port,
        timestamp: iso_now(),
    };
    let json = serde_json::to_vec(&record).map_err(ServiceError::processing)?;
    let staged = staging_path(path);
    let written = std::fs::write(&staged, json).and_then(|_| std::fs::rename(&staged, path));
    if let Err(e) = written {
        error!("Failed to write port file: {e}");
        let _ = std::fs::remove_file(&staged);
        return Err(e.into());
    }
    info!("Port file written: {}", path.display());
    Ok(record)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn read_port_file(path: &Path) -> Result<HandshakeRecord> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(ServiceError::processing)
}
