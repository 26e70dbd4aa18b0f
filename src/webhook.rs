//! Inbound webhook surface.
//!
//! `POST /webhooks/github`, HMAC-SHA256 verified against the raw request
//! body, with the template name extracted from the payload text by regex
//! and duplicate deliveries suppressed by `webhook_id` within a
//! configurable window. A plain `axum` server (state via `Arc`, JSON
//! body extraction).

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use hmac::{Hmac, Mac};
use regex::Regex;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

type HmacSha256 = Hmac<Sha256>;

static TEMPLATE_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\badw_[a-z]+(?:_[a-z]+)*_iso\b").expect("valid regex"));

/// Extract the first `adw_..._iso`-shaped template name mentioned in
/// webhook payload text, if any.
pub fn extract_template_name(payload_text: &str) -> Option<String> {
    TEMPLATE_NAME_PATTERN.find(payload_text).map(|m| m.as_str().to_string())
}

/// Verify `sha256=<hex>` against `body` computed with `secret`, in
/// constant time. Rejects a missing or malformed header before comparing.
pub fn verify_signature(secret: &[u8], body: &[u8], signature_header: Option<&str>) -> bool {
    let Some(header) = signature_header else { return false };
    let Some(hex_sig) = header.strip_prefix("sha256=") else { return false };
    let Ok(expected_bytes) = hex_decode(hex_sig) else { return false };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else { return false };
    mac.update(body);
    mac.verify_slice(&expected_bytes).is_ok()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

/// Tracks `webhook_id`s seen within the dedup window, pruning entries
/// older than the window on every check.
pub struct DedupWindow {
    seen: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Returns `true` the first time `webhook_id` is observed within the
    /// window; `false` for a duplicate delivery.
    pub fn observe(&self, webhook_id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap();
        let now = Instant::now();
        seen.retain(|_, at| now.duration_since(*at) < self.window);
        if seen.contains_key(webhook_id) {
            false
        } else {
            seen.insert(webhook_id.to_string(), now);
            true
        }
    }
}

pub struct WebhookState {
    pub secret: String,
    pub dedup: DedupWindow,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks/github", post(handle_github_webhook))
        .with_state(state)
}

async fn handle_github_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers.get("X-Hub-Signature-256").and_then(|v| v.to_str().ok());
    if !verify_signature(state.secret.as_bytes(), &body, signature) {
        return StatusCode::UNAUTHORIZED;
    }

    let webhook_id = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !webhook_id.is_empty() && !state.dedup.observe(webhook_id) {
        return StatusCode::OK;
    }

    let payload_text = String::from_utf8_lossy(&body);
    let _template_name = extract_template_name(&payload_text);

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex_encode(&mac.finalize().into_bytes()))
    }

    fn hex_encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = b"payload text";
        let sig = sign("topsecret", body);
        assert!(verify_signature(b"topsecret", body, Some(&sig)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = b"payload text";
        let sig = sign("topsecret", body);
        assert!(!verify_signature(b"wrongsecret", body, Some(&sig)));
    }

    #[test]
    fn missing_signature_header_is_rejected() {
        assert!(!verify_signature(b"topsecret", b"payload", None));
    }

    #[test]
    fn malformed_signature_header_is_rejected() {
        assert!(!verify_signature(b"topsecret", b"payload", Some("not-a-sig")));
    }

    #[test]
    fn template_name_is_extracted_from_payload() {
        let text = "triggering workflow adw_plan_build_iso now";
        assert_eq!(extract_template_name(text), Some("adw_plan_build_iso".to_string()));
    }

    #[test]
    fn no_template_name_present_returns_none() {
        assert_eq!(extract_template_name("just a regular comment"), None);
    }

    #[test]
    fn dedup_window_blocks_duplicate_within_30_seconds() {
        let window = DedupWindow::new(Duration::from_secs(30));
        assert!(window.observe("delivery-1"));
        assert!(!window.observe("delivery-1"), "second delivery within window must be suppressed");
    }

    #[test]
    fn dedup_window_allows_distinct_ids() {
        let window = DedupWindow::new(Duration::from_secs(30));
        assert!(window.observe("delivery-1"));
        assert!(window.observe("delivery-2"));
    }

    #[test]
    fn dedup_window_allows_replay_after_expiry() {
        let window = DedupWindow::new(Duration::from_millis(10));
        assert!(window.observe("delivery-1"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(window.observe("delivery-1"), "delivery outside the window is not a duplicate");
    }
}
