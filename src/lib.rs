//! POS bridge.
//!
//! Runs next to the point-of-sale frontend: supervises the local dashboard
//! backend, compiles receipts, kitchen tickets and timeclock slips into
//! printer-agnostic documents, dispatches them to the selected printers, and
//! prints clock-in slips pushed from the database. The frontend reaches the
//! print service through a loopback command channel.

use anyhow::Context;
use tracing::info;

pub mod bridge;
pub mod cache;
pub mod commands;
pub mod compiler;
pub mod config;
pub mod document;
pub mod drawer;
pub mod error;
pub mod escpos;
pub mod logging;
pub mod media;
pub mod models;
pub mod preview;
pub mod print;
pub mod printers;
pub mod settings;
pub mod sink;
pub mod subscriber;
pub mod supervisor;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};

/// Process entry point: configure, start logging, and run the bridge until
/// shutdown.
pub fn run() -> anyhow::Result<()> {
    let config = BridgeConfig::from_env().context("loading configuration")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    // Dropping the guard flushes the file writer, so it lives until return.
    let _log_guard = logging::init(&config.data_dir).context("initializing logging")?;
    info!("Starting POS bridge v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;

    runtime.block_on(async {
        let bridge = Bridge::new(config).context("assembling bridge")?;
        bridge.run().await.context("running bridge")
    })
}
