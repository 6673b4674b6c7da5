use std::process::ExitCode;
use std::sync::Arc;

use dailyos_ingest::config::load_config;
use dailyos_ingest::poller::run_poller;
use dailyos_ingest::state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let state = match AppState::new(config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            log::error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let snapshot = state.registry.snapshot();
    log::info!(
        "dailyos-ingest starting with {} accounts (generation {})",
        snapshot.len(),
        snapshot.generation()
    );

    let poller = tokio::spawn(run_poller(state.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for ctrl-c: {}", e);
    }
    state.shutdown();

    if let Err(e) = poller.await {
        log::error!("Poll loop ended abnormally: {}", e);
        return ExitCode::FAILURE;
    }
    log::info!("dailyos-ingest stopped");
    ExitCode::SUCCESS
}
