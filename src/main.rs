//! Keyplane daemon entry point.

use anyhow::Context;
use keyplane::{AppConfig, DataPlane};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs =
        std::env::var("KEYPLANE_LOG_JSON").map(|v| v == "true" || v == "1").unwrap_or(false);
    keyplane::observability::init_tracing(json_logs);

    let config = AppConfig::from_env().context("failed to load configuration")?;
    tracing::info!(
        app_name = keyplane::APP_NAME,
        version = keyplane::VERSION,
        backing_store = %config.store.backing_store,
        fips_compliant = config.crypto.fips_compliant,
        data_dir = %config.store.data_dir.display(),
        "starting keyplane data plane"
    );

    let plane = DataPlane::start(Arc::new(config), None).context("failed to start data plane")?;

    // Use the operator-supplied root key when present. An ephemeral key
    // keeps a fresh deployment usable, but its secrets do not survive a
    // restart.
    match std::env::var("KEYPLANE_ROOT_KEY") {
        Ok(material) => plane.root_key().set(&material),
        Err(_) => {
            let triplet = keyplane::crypto::generate_root_key()
                .context("failed to generate a root key")?;
            plane.root_key().set(&triplet.combine());
            tracing::warn!(
                "no root key supplied; generated an ephemeral one for this process"
            );
        }
    }

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    plane.shutdown().await;
    Ok(())
}
