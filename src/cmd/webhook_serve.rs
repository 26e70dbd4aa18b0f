//! `sdlc webhook-serve` — host the inbound Version Control Host webhook
//! surface.

use crate::config::SdlcConfig;
use crate::webhook::{DedupWindow, WebhookState, router};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub async fn cmd_webhook_serve(project_dir: &Path, port: u16) -> Result<()> {
    let config = SdlcConfig::load(project_dir)?;
    let secret = std::env::var("SDLC_WEBHOOK_SECRET").context("SDLC_WEBHOOK_SECRET must be set to serve webhooks")?;

    let state = Arc::new(WebhookState {
        secret,
        dedup: DedupWindow::new(Duration::from_secs(config.webhook_dedup_window_seconds)),
    });

    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr, "webhook server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("webhook server failed")?;
    Ok(())
}
