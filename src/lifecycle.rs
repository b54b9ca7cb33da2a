// Shutdown signal handling and resource cleanup
use log::info;

use crate::state::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub models_released: usize,
    pub temp_files_removed: usize,
    pub temp_files_failed: usize,
}

/// Clears the model cache and deletes every temp file still pending.
/// Failures are logged and counted, never returned.
pub fn cleanup_resources(state: &AppState) -> CleanupReport {
    info!("Cleaning up resources...");
    // dropping the last handle to each session frees its runtime memory
    let models_released = state.models.clear();
    let (temp_files_removed, temp_files_failed) = state.temp_files.remove_all();
    info!(
        "Cleanup complete: {models_released} model(s) released, {temp_files_removed} temp file(s) removed"
    );
    CleanupReport {
        models_released,
        temp_files_removed,
        temp_files_failed,
    }
}

/// Resolves on the first interrupt or termination signal.
pub async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal");
    Ok(())
}
