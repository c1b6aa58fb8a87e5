use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::store::{Webhook, WebhookStore};

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const BASE_BACKOFF_SECS: u64 = 1;

/// Async webhook delivery, grounded on
/// `original_source/openclaw/webhook.py`'s `WebhookDispatcher`. The
/// original spawns a daemon thread per delivery; this spawns a
/// detached `tokio::task` per delivery instead, which is the async
/// equivalent for a "fire and don't wait" dispatch.
pub struct WebhookDispatcher {
    store: Arc<WebhookStore>,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<WebhookStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("reqwest client builds with static config");
        Self { store, client }
    }

    /// Fires `event_type` to every active, subscribed webhook without
    /// waiting for delivery to complete.
    pub fn dispatch(&self, event_type: &str, payload: Value) {
        let webhooks = match self.store.get_active_webhooks(event_type) {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!(event_type, error = %err, "failed to look up webhooks for dispatch");
                return;
            }
        };

        for webhook in webhooks {
            let store = self.store.clone();
            let client = self.client.clone();
            let event_type = event_type.to_string();
            let payload = payload.clone();

            tokio::spawn(async move {
                deliver(&client, &store, webhook, &event_type, payload).await;
            });
        }
    }
}

async fn deliver(client: &reqwest::Client, store: &WebhookStore, webhook: Webhook, event_type: &str, payload: Value) {
    let max_retries = webhook.max_retries.max(1);
    let payload_bytes = serde_json::to_vec(&payload).unwrap_or_default();
    let signature = sign_payload(&payload_bytes, &webhook.secret);
    let payload_json = String::from_utf8_lossy(&payload_bytes).into_owned();

    for attempt in 1..=max_retries {
        let result = client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-Flux-Signature", &signature)
            .header("X-Flux-Event", event_type)
            .header("User-Agent", "flux-webhooks/1.0")
            .body(payload_bytes.clone())
            .send()
            .await;

        let (status, body) = match result {
            Ok(resp) => {
                let status = resp.status().as_u16() as i64;
                let body = resp.text().await.unwrap_or_default();
                (status, body)
            }
            Err(err) => (0, err.to_string()),
        };

        if let Err(err) = store.record_delivery(&webhook.id, event_type, &payload_json, status, &body, attempt) {
            tracing::warn!(webhook_id = %webhook.id, error = %err, "failed to record webhook delivery");
        }

        if (200..300).contains(&status) {
            let _ = store.reset_failure(&webhook.id);
            tracing::info!(webhook_id = %webhook.id, event_type, status, attempt, "webhook delivered");
            return;
        }

        if attempt < max_retries {
            let backoff = BASE_BACKOFF_SECS * 2u64.pow((attempt - 1) as u32);
            tracing::warn!(
                webhook_id = %webhook.id,
                event_type,
                status,
                attempt,
                max_retries,
                backoff,
                "webhook delivery failed, retrying"
            );
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        }
    }

    if let Err(err) = store.increment_failure(&webhook.id) {
        tracing::warn!(webhook_id = %webhook.id, error = %err, "failed to record webhook failure count");
    }
    tracing::error!(webhook_id = %webhook.id, event_type, url = %webhook.url, max_retries, "webhook delivery failed after all attempts");
}

fn sign_payload(payload_bytes: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload_bytes);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_format_matches_sha256_prefix() {
        let sig = sign_payload(b"{}", "secret");
        assert!(sig.starts_with("sha256="));
        assert_eq!(sig.len(), "sha256=".len() + 64);
    }
}
