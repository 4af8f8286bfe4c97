//! C8 — webhook subscription management and delivery. Deliveries run on a
//! bounded worker pool so a slow or hostile endpoint can't back up the
//! server; every outcome is appended to the durable webhook log.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};
use uuid::Uuid;
use url::Url;

use crate::error::{CoreError, Result};
use crate::models::WebhookSubscription;
use crate::store::{NewSubscription, Store};

/// Delivery concurrency cap: at most this many in-flight HTTP requests
/// across every subscriber at once.
const MAX_CONCURRENT_DELIVERIES: usize = 10;
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_SECRET_LEN: usize = 32;
const MAX_SUBSCRIPTIONS_PER_PROJECT: i64 = 50;
const MAX_SUBSCRIPTIONS_GLOBAL: i64 = 200;
/// Default bounded wait for in-flight deliveries during [`WebhookDispatcher::shutdown`].
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

pub const ALLOWED_EVENT_TYPES: &[&str] = &[
    "*",
    "doc.created",
    "doc.updated",
    "task.created",
    "task.updated",
    "plan.created",
    "plan.updated",
    "session.logged",
    "project.initialized",
    "index.reindexed",
];

/// Hostnames rejected outright at registration, before any DNS lookup.
const HOSTNAME_BLOCKLIST: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
    "::1",
    "metadata.google.internal",
    "169.254.169.254",
];

#[derive(Debug, Default)]
pub struct WebhookMetrics {
    pub attempted: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub skipped_no_subscribers: AtomicU64,
}

pub struct WebhookDispatcher {
    store: Arc<Store>,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    metrics: Arc<WebhookMetrics>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            client: reqwest::Client::builder()
                .timeout(DELIVERY_TIMEOUT)
                .build()
                .unwrap_or_default(),
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_DELIVERIES)),
            cancel: CancellationToken::new(),
            metrics: Arc::new(WebhookMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &WebhookMetrics {
        &self.metrics
    }

    /// Signals new `fire_event` calls to become no-ops, then waits up to
    /// `grace` for any already-admitted deliveries (those holding a
    /// semaphore permit) to finish on their own. In-flight requests are
    /// never aborted by this call — only their own per-delivery timeout
    /// bounds them — `grace` just bounds how long shutdown itself waits.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        let semaphore = self.semaphore.clone();
        let wait_for_drain = async move {
            // Acquiring every permit succeeds only once all in-flight
            // deliveries have released theirs.
            let _ = semaphore.acquire_many(MAX_CONCURRENT_DELIVERIES as u32).await;
        };
        if tokio::time::timeout(grace, wait_for_drain).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "webhook shutdown grace period elapsed with deliveries still in flight");
        }
    }

    #[instrument(skip(self, secret))]
    pub async fn subscribe(
        &self,
        url: &str,
        secret: &str,
        event_types: Vec<String>,
        project: Option<String>,
        description: Option<String>,
    ) -> Result<WebhookSubscription> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(CoreError::InvalidArgument(format!(
                "webhook secret must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        if event_types.is_empty() {
            return Err(CoreError::InvalidArgument(
                "at least one event type is required".into(),
            ));
        }
        for et in &event_types {
            if !ALLOWED_EVENT_TYPES.contains(&et.as_str()) {
                return Err(CoreError::InvalidArgument(format!("unknown event type: {et}")));
            }
        }
        validate_url(url).await?;

        let total = self.store.webhook_count_total().await?;
        if total >= MAX_SUBSCRIPTIONS_GLOBAL {
            return Err(CoreError::LimitExceeded(
                "global webhook subscription limit reached".into(),
            ));
        }
        if let Some(p) = &project {
            let per_project = self.store.webhook_count_for_project(p).await?;
            if per_project >= MAX_SUBSCRIPTIONS_PER_PROJECT {
                return Err(CoreError::LimitExceeded(format!(
                    "webhook subscription limit reached for project {p}"
                )));
            }
        }

        self.store
            .create_subscription(NewSubscription {
                url: url.to_string(),
                secret: secret.to_string(),
                event_types,
                project,
                description,
            })
            .await
    }

    pub async fn unsubscribe(&self, id: i64) -> Result<()> {
        self.store.deactivate_subscription(id).await
    }

    /// Fan out `event_type` to every matching active subscription. Spawns a
    /// background task per subscriber bounded by the shared semaphore;
    /// callers are not blocked waiting on delivery.
    #[instrument(skip(self, data))]
    pub fn fire_event(&self, event_type: &str, project: Option<&str>, data: serde_json::Value) {
        if self.cancel.is_cancelled() {
            return;
        }
        let store = self.store.clone();
        let client = self.client.clone();
        let semaphore = self.semaphore.clone();
        let metrics = self.metrics.clone();
        let event_type = event_type.to_string();
        let project = project.map(|s| s.to_string());

        tokio::spawn(async move {
            let subs = match store.matching_subscriptions(&event_type, project.as_deref()).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to load webhook subscriptions");
                    return;
                }
            };
            if subs.is_empty() {
                metrics.skipped_no_subscribers.fetch_add(1, Ordering::Relaxed);
                return;
            }

            let event_id = Uuid::new_v4().to_string();
            let payload = json!({
                "event_id": event_id,
                "event_type": event_type,
                "project": project,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "data": data,
            });
            let payload_str = payload.to_string();

            for sub in subs {
                let client = client.clone();
                let store = store.clone();
                let semaphore = semaphore.clone();
                let metrics = metrics.clone();
                let payload_str = payload_str.clone();
                let event_type = event_type.clone();
                let event_id = event_id.clone();

                tokio::spawn(async move {
                    let Ok(permit) = semaphore.acquire_owned().await else { return };
                    metrics.attempted.fetch_add(1, Ordering::Relaxed);

                    // Once admitted (permit held), a delivery always runs to
                    // completion — shutdown only stops new fire_event calls
                    // and waits for the permit this task holds to be
                    // released, it does not abort in-flight requests.
                    let (status_code, success, error_message) =
                        deliver(&client, &sub, &event_type, &event_id, &payload_str).await;
                    drop(permit);

                    if success {
                        metrics.delivered.fetch_add(1, Ordering::Relaxed);
                    } else {
                        metrics.failed.fetch_add(1, Ordering::Relaxed);
                    }

                    if let Err(e) = store
                        .append_webhook_log(
                            sub.id,
                            &event_type,
                            &event_id,
                            &payload_str,
                            status_code,
                            success,
                            error_message.as_deref(),
                        )
                        .await
                    {
                        warn!(error = %e, "failed to append webhook log");
                    }
                });
            }
        });
    }
}

/// Exposes the signing primitive to the crate's integration tests, which
/// cannot reach a private `fn` in this module from `tests/`.
pub mod test_support {
    pub fn sign(secret: &str, payload: &str) -> String {
        super::sign(secret, payload)
    }
}

type HmacSha256 = Hmac<Sha256>;

fn sign(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(payload.as_bytes());
    let digest = mac.finalize().into_bytes();
    format!("sha256={}", hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

async fn deliver(
    client: &reqwest::Client,
    sub: &WebhookSubscription,
    event_type: &str,
    event_id: &str,
    payload: &str,
) -> (Option<i64>, bool, Option<String>) {
    let signature = sign(&sub.secret, payload);

    let result = client
        .post(&sub.url)
        .header("Content-Type", "application/json")
        .header("X-Vibe-Event", event_type)
        .header("X-Vibe-Event-ID", event_id)
        .header("X-Vibe-Signature", signature)
        .body(payload.to_string())
        .send()
        .await;

    match result {
        Ok(resp) => {
            let status = resp.status();
            let code = status.as_u16() as i64;
            if status.is_success() {
                (Some(code), true, None)
            } else {
                (Some(code), false, Some(format!("endpoint returned {code}")))
            }
        }
        Err(e) => (None, false, Some(e.to_string())),
    }
}

/// SSRF-safe URL validation: scheme must be `https` (or `http` for loopback
/// tests only via the hostname blocklist check below, which rejects
/// loopback outright), host must resolve, and none of its resolved
/// addresses may be in a private/loopback/link-local/reserved range.
pub async fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).map_err(|e| CoreError::InvalidArgument(format!("invalid url: {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(CoreError::Unsafe("webhook url must use http or https".into()));
    }

    let host = url
        .host_str()
        .ok_or_else(|| CoreError::InvalidArgument("url has no host".into()))?;
    let lower_host = host.to_lowercase();
    if HOSTNAME_BLOCKLIST.contains(&lower_host.as_str()) {
        return Err(CoreError::Unsafe(format!("webhook host is blocked: {host}")));
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| CoreError::InvalidArgument(format!("cannot resolve host: {e}")))?;

    let mut resolved_any = false;
    for addr in addrs {
        resolved_any = true;
        if is_disallowed(addr.ip()) {
            return Err(CoreError::Unsafe(format!(
                "webhook host resolves to a disallowed address: {}",
                addr.ip()
            )));
        }
    }
    if !resolved_any {
        return Err(CoreError::InvalidArgument("host did not resolve to any address".into()));
    }

    Ok(())
}

fn is_disallowed(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified()
                // 169.254.169.254 is covered by is_link_local, kept for clarity.
                || v4.octets() == [169, 254, 169, 254]
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00 // unique local fc00::/7
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // link-local fe80::/10
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_and_verifiable() {
        let sig_a = sign("shared-secret-value", "{\"a\":1}");
        let sig_b = sign("shared-secret-value", "{\"a\":1}");
        assert_eq!(sig_a, sig_b);
        assert!(sig_a.starts_with("sha256="));

        let sig_different_secret = sign("other-secret-value", "{\"a\":1}");
        assert_ne!(sig_a, sig_different_secret);
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let err = validate_url("ftp://example.com/hook").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsafe);
    }

    #[tokio::test]
    async fn rejects_loopback_host() {
        let err = validate_url("http://localhost:9000/in").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsafe);
    }

    #[tokio::test]
    async fn rejects_private_ip_literal() {
        let err = validate_url("https://127.0.0.1/hook").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsafe);
    }

    #[test]
    fn link_local_metadata_address_is_disallowed() {
        assert!(is_disallowed("169.254.169.254".parse().unwrap()));
        assert!(is_disallowed("10.0.0.5".parse().unwrap()));
        assert!(is_disallowed("192.168.1.1".parse().unwrap()));
        assert!(!is_disallowed("8.8.8.8".parse().unwrap()));
    }

    #[tokio::test]
    async fn subscribe_rejects_short_secret() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let dispatcher = WebhookDispatcher::new(store);
        let err = dispatcher
            .subscribe("https://example.com/hook", "short", vec!["*".into()], None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn shutdown_makes_fire_event_a_no_op() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let dispatcher = WebhookDispatcher::new(store.clone());
        dispatcher
            .subscribe(
                "https://example.invalid/hook",
                "a-long-enough-secret-value-above-32-chars",
                vec!["*".into()],
                None,
                None,
            )
            .await
            .unwrap();

        dispatcher.shutdown(Duration::from_millis(50)).await;
        dispatcher.fire_event("doc.created", None, json!({}));
        // Give any errantly-spawned task a chance to run before asserting.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.metrics().attempted.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn subscribe_rejects_unknown_event_type() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let dispatcher = WebhookDispatcher::new(store);
        let err = dispatcher
            .subscribe(
                "https://example.com/hook",
                "a-long-enough-secret-value-above-32-chars",
                vec!["not.a.real.event".into()],
                None,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
