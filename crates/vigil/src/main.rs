//! Validator signing watcher daemon.
//!
//! Configuration comes from the environment (see [vigil::WatcherConfig::from_env]); missing
//! identity or alert credentials exit with status 1 before anything is polled.
//!
//! Usage:
//!
//!   VALCONS_ADDRESS=<HEX> TELEGRAM_BOT_TOKEN=<TOKEN> TELEGRAM_CHAT_ID=<ID> vigil

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use vigil::{RpcOracle, StateStore, TelegramNotifier, Watcher, WatcherConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info")),
        )
        .init();

    let config = match WatcherConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("vigil: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        rpc = %config.rpc_url,
        validator = %config.validator,
        network = %config.network,
        double_confirm = config.double_confirm,
        state_file = %config.state_file.display(),
        "starting watcher"
    );

    let oracle = RpcOracle::from_config(&config).context("build RPC client")?;
    let notifier = TelegramNotifier::new(config.telegram.clone()).context("build notifier")?;
    let store = StateStore::new(&config.state_file, config.retention.clone());
    let watcher = Watcher::new(config, oracle, notifier);

    if !watcher.announce().await {
        tracing::warn!("startup notification not delivered");
    }
    watcher
        .run(&store, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}
