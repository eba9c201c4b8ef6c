mod connection;
mod console;
mod scanning;
mod settings;
mod signal;
mod transport;

use connection::{ConnectionConfig, ConnectionManager};
use console::Console;
use settings::SettingsStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let store = match std::env::var_os("RC_LINK_SETTINGS") {
        Some(path) => SettingsStore::load(path),
        None => SettingsStore::load_default(),
    };
    let settings = store.get();

    // RUST_LOG wins over the persisted level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("rc-link starting");
    if let Some(path) = store.path() {
        info!("  settings: {}", path.display());
    }
    info!("  transport: {}", settings.connection_type);

    let config = ConnectionConfig::from_settings(&settings);
    let (manager, events) = ConnectionManager::new(config, Arc::new(store));

    if !manager.initialize().await {
        info!("{} radio is not ready yet", manager.connection_type());
    }

    Console::new(manager).run(events).await
}
