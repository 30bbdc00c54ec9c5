mod errors;
mod retry;

pub use errors::VpnError;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnKey {
    pub id: String,
    pub access_url: String,
}

/// Contract for the external VPN key-issuance API: create/delete a single
/// access key. Implementations are safe to invoke concurrently and hold
/// no per-key state — a Subscription, not the provisioner, owns the key.
#[async_trait]
pub trait VpnProvisioner: Send + Sync {
    async fn create_key(&self, name: &str) -> Result<VpnKey, VpnError>;

    /// Idempotent from the caller's point of view: deleting an id that no
    /// longer exists on the server (404) is treated as success.
    async fn delete_key(&self, id: &str) -> Result<(), VpnError>;
}

const RETRY_BUDGET: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct CreateKeyResponse {
    id: String,
    #[serde(rename = "accessUrl")]
    access_url: String,
}

pub struct HttpVpnProvisioner {
    client: reqwest::Client,
    base_url: String,
    cert_sha256: Option<String>,
}

impl HttpVpnProvisioner {
    pub fn new(base_url: impl Into<String>, cert_sha256: Option<String>) -> Result<Self, VpnError> {
        let client = reqwest::Client::builder().timeout(RETRY_BUDGET).build()?;
        Ok(HttpVpnProvisioner { client, base_url: base_url.into(), cert_sha256 })
    }

    fn apply_cert_header(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cert_sha256 {
            Some(hex) => builder.header("Outline-Cert-SHA256", hex),
            None => builder,
        }
    }
}

#[async_trait]
impl VpnProvisioner for HttpVpnProvisioner {
    async fn create_key(&self, name: &str) -> Result<VpnKey, VpnError> {
        let url = format!("{}/access-keys", self.base_url);
        retry::retry_with_backoff(RETRY_BUDGET, || async {
            let request = self.apply_cert_header(self.client.post(&url).json(&serde_json::json!({ "name": name })));
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(VpnError::Rejected(status.as_u16()));
            }
            let parsed: CreateKeyResponse = response
                .json()
                .await
                .map_err(|e| VpnError::Decode(e.to_string()))?;
            Ok(VpnKey { id: parsed.id, access_url: parsed.access_url })
        })
        .await
    }

    async fn delete_key(&self, id: &str) -> Result<(), VpnError> {
        let url = format!("{}/access-keys/{}", self.base_url, id);
        retry::retry_with_backoff(RETRY_BUDGET, || async {
            let request = self.apply_cert_header(self.client.delete(&url));
            let response = request.send().await?;
            let status = response.status();
            if status.as_u16() == 404 || status.is_success() {
                tracing::debug!(vpn_key_id = id, status = status.as_u16(), "deleted vpn key");
                return Ok(());
            }
            Err(VpnError::Rejected(status.as_u16()))
        })
        .await
    }
}

/// Deterministic in-memory stand-in for the external provider, used by
/// `vpnsub-core`'s tests so the state machine can be exercised without a
/// live VPN API.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    pub struct FakeVpnProvisioner {
        counter: AtomicU64,
        pub deleted: Mutex<Vec<String>>,
    }

    impl Default for FakeVpnProvisioner {
        fn default() -> Self {
            FakeVpnProvisioner { counter: AtomicU64::new(0), deleted: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl VpnProvisioner for FakeVpnProvisioner {
        async fn create_key(&self, name: &str) -> Result<VpnKey, VpnError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(VpnKey { id: format!("key-{n}"), access_url: format!("ss://{name}-{n}") })
        }

        async fn delete_key(&self, id: &str) -> Result<(), VpnError> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }
}
