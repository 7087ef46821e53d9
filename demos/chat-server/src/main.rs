use std::time::Duration;

use ephemera::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, PartialEq)]
struct Settings {
    bind: String,
    /// `None` turns the background sweep off.
    sweep_interval: Option<Duration>,
}

/// Reads `EPHEMERA_BIND` and `EPHEMERA_SWEEP_SECS` (0 disables the sweep).
fn settings_from(var: impl Fn(&str) -> Option<String>) -> Result<Settings, String> {
    let bind = var("EPHEMERA_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
    let sweep_interval = match var("EPHEMERA_SWEEP_SECS") {
        None => Some(ephemera::DEFAULT_SWEEP_INTERVAL),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(0) => None,
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => return Err(format!("EPHEMERA_SWEEP_SECS must be a number, got {raw:?}")),
        },
    };
    Ok(Settings {
        bind,
        sweep_interval,
    })
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = settings_from(|key| std::env::var(key).ok())?;
    tracing::info!(bind = %settings.bind, sweep = ?settings.sweep_interval, "starting chat server");

    let server = EphemeraServer::builder()
        .bind(&settings.bind)
        .sweep_interval(settings.sweep_interval)
        .build()
        .await?;

    server.run().await?;
    Ok(())
}
