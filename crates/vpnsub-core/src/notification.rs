use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("notification transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Outbound `send(user_id, text)` to the chat platform. The core never
/// speaks the chat protocol itself (spec Non-goal) — this trait is the
/// entire surface scheduler jobs and services need to reach a user.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, user_id: i64, text: &str) -> Result<(), NotificationError>;
}

/// Posts to a webhook URL supplied by the caller (the chat front-end's own
/// send-message endpoint). Bounded to a 5s timeout per spec.
pub struct HttpNotificationSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl HttpNotificationSink {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(HttpNotificationSink { client, webhook_url: webhook_url.into() })
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn send(&self, user_id: i64, text: &str) -> Result<(), NotificationError> {
        self.client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "user_id": user_id, "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub const EXPIRY_REMINDER_TEXT: &str =
    "Ваша подписка закончится через 3 дня. Продлите ее, чтобы оставаться на связи!";

/// Not cfg-gated: integration tests under `tests/` link against this crate
/// built without `cfg(test)`, so a gate here would need a self-referential
/// dev-dependency just to turn it back on. The type is tiny and harmless
/// to carry in a release build.
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingNotificationSink {
        pub sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingNotificationSink {
        async fn send(&self, user_id: i64, text: &str) -> Result<(), NotificationError> {
            self.sent.lock().unwrap().push((user_id, text.to_string()));
            Ok(())
        }
    }
}
