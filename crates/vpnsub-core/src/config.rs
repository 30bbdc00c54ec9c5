use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for environment variable {0}: {1}")]
    Invalid(&'static str, String),
}

/// Process configuration, loaded once at startup from the environment the
/// same way the teacher's node configuration is — no config file, no CLI
/// flags, everything overridable by an env var with a sane default.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub database_path: String,
    pub vpn_api_base_url: String,
    pub vpn_cert_sha256: Option<String>,
    pub notification_webhook_url: String,
    pub scheduler_poll_interval: Duration,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = env::var("VPNSUB_DATABASE_PATH").unwrap_or_else(|_| "vpnsub.sqlite3".to_string());
        let vpn_api_base_url = required("VPNSUB_VPN_API_BASE_URL")?;
        let vpn_cert_sha256 = env::var("VPNSUB_VPN_CERT_SHA256").ok();
        let notification_webhook_url = required("VPNSUB_NOTIFICATION_WEBHOOK_URL")?;
        let scheduler_poll_interval = env::var("VPNSUB_SCHEDULER_POLL_INTERVAL_SECS")
            .ok()
            .map(|raw| {
                raw.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::Invalid("VPNSUB_SCHEDULER_POLL_INTERVAL_SECS", raw))
            })
            .transpose()?
            .unwrap_or(Duration::from_secs(30));

        Ok(CoreConfig {
            database_path,
            vpn_api_base_url,
            vpn_cert_sha256,
            notification_webhook_url,
            scheduler_poll_interval,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}
