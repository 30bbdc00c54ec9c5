use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use vpnsub_core::config::CoreConfig;
use vpnsub_core::deps::Deps;
use vpnsub_core::notification::HttpNotificationSink;
use vpnsub_core::scheduler::run_scheduler_loop;
use vpnsub_store::Store;
use vpnsub_vpn::HttpVpnProvisioner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CoreConfig::from_env()?;
    tracing::info!(database_path = %config.database_path, "starting vpnsub_node");

    let store = Arc::new(Store::new(&config.database_path)?);
    let vpn = Arc::new(HttpVpnProvisioner::new(config.vpn_api_base_url.clone(), config.vpn_cert_sha256.clone())?);
    let notifications = Arc::new(HttpNotificationSink::new(config.notification_webhook_url.clone())?);
    let deps = Arc::new(Deps::new(store, vpn, notifications));

    let scheduler_deps = Arc::clone(&deps);
    let scheduler_poll_interval = config.scheduler_poll_interval;
    let scheduler_handle = tokio::spawn(async move {
        run_scheduler_loop(scheduler_deps, scheduler_poll_interval).await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    scheduler_handle.abort();
    Ok(())
}
