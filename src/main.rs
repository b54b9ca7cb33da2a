// Web server entry point
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;

use removebg_server::config::ServerConfig;
use removebg_server::models::u2net::OnnxSessionFactory;
use removebg_server::state::AppState;
use removebg_server::{api, handshake, lifecycle, storage};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = ServerConfig::parse();
    info!("Starting RemoveThatBG server...");

    let models_dir = config.models_dir()?;
    if let Err(e) = storage::ensure_dir(&models_dir) {
        warn!("{e:#}");
    }
    let factory = OnnxSessionFactory::new(config.model_base_url.clone())
        .with_intra_threads(config.intra_threads);
    let state = web::Data::new(AppState::new(
        Arc::new(factory),
        models_dir,
        config.min_free_mb,
        std::env::temp_dir(),
        config.max_upload_bytes(),
    ));

    let port = handshake::find_available_port(config.start_port, config.port_attempts)
        .inspect_err(|e| error!("{e}"))?;
    info!("Using port: {port}");
    handshake::write_port_file(&config.handshake_file(), port)?;

    let app_state = state.clone();
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(Logger::default())
            .configure(api::configure)
    })
    .disable_signals()
    .shutdown_timeout(config.shutdown_timeout().as_secs());
    if let Some(workers) = config.workers.filter(|w| *w > 0) {
        server = server.workers(workers);
    }
    let server = server
        .bind(("127.0.0.1", port))
        .with_context(|| format!("failed to bind 127.0.0.1:{port}"))?
        .run();
    info!("Server ready on http://127.0.0.1:{port}");

    // in-flight requests drain for up to the shutdown timeout before cleanup
    let handle = server.handle();
    let stopper = actix_web::rt::spawn(async move {
        if let Err(e) = lifecycle::shutdown_signal().await {
            error!("Failed to listen for shutdown signals: {e}");
            return;
        }
        handle.stop(true).await;
    });

    let served = server.await;
    stopper.abort();
    lifecycle::cleanup_resources(&state);
    served.context("server stopped with an error")
}
