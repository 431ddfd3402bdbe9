use anyhow::Result;
use std::path::PathBuf;
use tokio::signal;

use lib_esp::plugin::Datasource;
use servers::esp_logic::{config, logger, routes, state};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    logger::setup_logging(&log_dir, config.log_level.as_deref().unwrap_or("info"))?;

    let settings = config.datasource_settings()?;
    log::info!(
        "Serving datasource {} at {} (direct to ESP: {})",
        settings.uid,
        settings.url,
        settings.json_data.direct_to_esp
    );

    let datasource = Datasource::new(settings)?;
    let capacity = config.live_capacity.unwrap_or(lib_esp::frames::live::DEFAULT_CAPACITY);
    let app_state = state::AppState::new(datasource, capacity);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let server_handle = tokio::spawn(routes::run(config.clone(), app_state.clone(), shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }

    let _ = shutdown_tx.send(());

    match server_handle.await {
        Ok(Err(e)) => log::error!("Server error: {}", e),
        Err(e) => log::error!("Server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    log::info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            log::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
