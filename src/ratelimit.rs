//! Rate-Limit Guard.
//!
//! Pre-flight quota check before any phase that requires the remote LLM or
//! the Version Control Host. Two backends: a cheap LLM ping, and the
//! Version Control Host's REST/GraphQL rate-limit endpoints. A
//! `QuotaExhausted` failure happens before any compute is spent; any
//! *other* failure (network error, auth failure) is treated as
//! "unknown, proceed" rather than blocking the workflow on an unrelated
//! outage.

use reqwest::Client;
use sdlc_common::{CoreError, RateLimitInfo};
use std::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ApiBackend {
    Llm,
    VersionControlRest,
    VersionControlGraphql,
}

pub struct RateLimitGuard {
    client: Client,
    llm_ping_url: Option<String>,
    vcs_rest_url: Option<String>,
    vcs_graphql_url: Option<String>,
}

impl RateLimitGuard {
    pub fn new(llm_ping_url: Option<String>, vcs_rest_url: Option<String>, vcs_graphql_url: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            llm_ping_url,
            vcs_rest_url,
            vcs_graphql_url,
        }
    }

    /// Query the given backend's quota. Returns `None` when the probe could
    /// not be completed for reasons unrelated to quota (network error,
    /// missing endpoint, auth failure) — callers treat `None` as
    /// "unknown, proceed".
    pub async fn probe(&self, backend: ApiBackend) -> Option<RateLimitInfo> {
        match backend {
            ApiBackend::Llm => self.probe_llm().await,
            ApiBackend::VersionControlRest => self.probe_vcs_rest().await,
            ApiBackend::VersionControlGraphql => self.probe_vcs_graphql().await,
        }
    }

    async fn probe_llm(&self) -> Option<RateLimitInfo> {
        let url = self.llm_ping_url.as_ref()?;
        let resp = self.client.get(url).send().await.ok()?;
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Some(RateLimitInfo {
                limit: 0,
                remaining: 0,
                reset_at: chrono::Utc::now(),
            });
        }
        if !resp.status().is_success() {
            // auth failure, transient outage, etc.: unrelated to quota
            return None;
        }
        Some(RateLimitInfo {
            limit: u64::MAX,
            remaining: u64::MAX,
            reset_at: chrono::Utc::now(),
        })
    }

    async fn probe_vcs_rest(&self) -> Option<RateLimitInfo> {
        let url = self.vcs_rest_url.as_ref()?;
        let resp = self.client.get(url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let headers = resp.headers().clone();
        let header_u64 = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).and_then(|s| s.parse().ok());
        let limit = header_u64("x-ratelimit-limit")?;
        let remaining = header_u64("x-ratelimit-remaining")?;
        let reset_secs: i64 = header_u64("x-ratelimit-reset")?;
        Some(RateLimitInfo {
            limit,
            remaining,
            reset_at: chrono::DateTime::from_timestamp(reset_secs, 0).unwrap_or_else(chrono::Utc::now),
        })
    }

    async fn probe_vcs_graphql(&self) -> Option<RateLimitInfo> {
        let url = self.vcs_graphql_url.as_ref()?;
        let body = serde_json::json!({ "query": "{ rateLimit { limit remaining resetAt } }" });
        let resp = self.client.post(url).json(&body).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let parsed: serde_json::Value = resp.json().await.ok()?;
        let rate_limit = parsed.get("data")?.get("rateLimit")?;
        let limit = rate_limit.get("limit")?.as_u64()?;
        let remaining = rate_limit.get("remaining")?.as_u64()?;
        let reset_at = rate_limit
            .get("resetAt")?
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        Some(RateLimitInfo { limit, remaining, reset_at })
    }

    /// Raise `QuotaExhausted` the moment `remaining < min_remaining`,
    /// before the calling phase does any other work. An unreachable/unknown
    /// probe does not block.
    pub async fn ensure_rate_limit_available(&self, backend: ApiBackend, min_remaining: u64) -> Result<(), CoreError> {
        if let Some(info) = self.probe(backend).await
            && info.remaining < min_remaining
        {
            return Err(CoreError::QuotaExhausted(format!(
                "{backend:?}: {} remaining, need at least {min_remaining}",
                info.remaining
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ApiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApiBackend::Llm => "llm",
            ApiBackend::VersionControlRest => "version_control_rest",
            ApiBackend::VersionControlGraphql => "version_control_graphql",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_computation_saturates() {
        let info = RateLimitInfo {
            limit: 100,
            remaining: 150,
            reset_at: chrono::Utc::now(),
        };
        assert_eq!(info.used(), 0);
    }

    #[tokio::test]
    async fn probe_with_no_endpoint_returns_none() {
        let guard = RateLimitGuard::new(None, None, None);
        assert!(guard.probe(ApiBackend::Llm).await.is_none());
        assert!(guard.probe(ApiBackend::VersionControlRest).await.is_none());
    }

    #[tokio::test]
    async fn missing_endpoint_does_not_block_workflow() {
        let guard = RateLimitGuard::new(None, None, None);
        let result = guard.ensure_rate_limit_available(ApiBackend::Llm, 10).await;
        assert!(result.is_ok(), "unknown quota must not fail the workflow");
    }
}
