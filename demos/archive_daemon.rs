//! Long-running archiver daemon
//!
//! Loads a JSON configuration, starts the watcher, scheduler and config
//! reload services, serves the REST API when enabled, and shuts down
//! cleanly on SIGTERM/SIGINT.
//!
//! ```text
//! cargo run --example archive_daemon -- archiver.json
//! ```
//!
//! With `api.enabled`, you can then:
//! - Start a run via POST http://127.0.0.1:8090/api/v1/runs
//! - Follow it via GET http://127.0.0.1:8090/api/v1/status
//! - Stream events via GET http://127.0.0.1:8090/api/v1/events

use playlist_archiver::{Archiver, Config, run_with_shutdown};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("archiver.json"));

    let config = Config::load(&config_path)?;
    let api_enabled = config.api.enabled;
    let bind_address = config.api.bind_address;

    let archiver = Archiver::new(config).await?;
    archiver.start_services(Some(config_path))?;

    let api = if api_enabled {
        println!("API Base: http://{bind_address}/api/v1");
        Some(archiver.spawn_api_server())
    } else {
        None
    };

    run_with_shutdown(archiver).await?;

    if let Some(api) = api
        && let Ok(Err(e)) = api.await
    {
        eprintln!("API server error: {e}");
    }
    Ok(())
}
