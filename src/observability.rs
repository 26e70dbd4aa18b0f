//! Observability Emitter.
//!
//! Fire-and-forget writes: every event is first appended as a JSON line to
//! a per-workflow file under a structured log directory (so a broken Event
//! Sink never loses history), then POSTed to the Event Sink. Both paths
//! are best-effort — failures are logged via `tracing` and swallowed, never
//! propagated to the caller.

use chrono::Utc;
use reqwest::Client;
use sdlc_common::events::{EventType, ObservabilityEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

pub struct ObservabilityEmitter {
    log_dir: PathBuf,
    endpoint: Option<String>,
    client: Client,
    write_lock: Mutex<()>,
}

impl ObservabilityEmitter {
    pub fn new(log_dir: impl Into<PathBuf>, endpoint: Option<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            endpoint,
            client: Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| Client::new()),
            write_lock: Mutex::new(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log_phase(
        &self,
        workflow_id: &str,
        issue_id: &str,
        phase_name: &str,
        phase_number: u32,
        status: &str,
        duration_seconds: Option<f64>,
        cost_usd: Option<f64>,
        error_message: Option<String>,
        context: HashMap<String, Value>,
    ) {
        let event = ObservabilityEvent {
            event_id: ObservabilityEvent::new_id(),
            timestamp: Utc::now(),
            event_type: EventType::Phase,
            workflow_id: workflow_id.to_string(),
            issue_id: issue_id.to_string(),
            phase_name: Some(phase_name.to_string()),
            phase_number: Some(phase_number),
            status: status.to_string(),
            duration_seconds,
            cost_usd,
            error_message,
            context,
        };
        self.emit(event).await;
    }

    pub async fn log_workflow(
        &self,
        workflow_id: &str,
        issue_id: &str,
        status: &str,
        duration_seconds: Option<f64>,
        cost_usd: Option<f64>,
        error_message: Option<String>,
        context: HashMap<String, Value>,
    ) {
        let event = ObservabilityEvent {
            event_id: ObservabilityEvent::new_id(),
            timestamp: Utc::now(),
            event_type: EventType::Workflow,
            workflow_id: workflow_id.to_string(),
            issue_id: issue_id.to_string(),
            phase_name: None,
            phase_number: None,
            status: status.to_string(),
            duration_seconds,
            cost_usd,
            error_message,
            context,
        };
        self.emit(event).await;
    }

    pub async fn log_tool_call(&self, workflow_id: &str, issue_id: &str, phase_name: &str, record: &sdlc_common::ToolCallRecord) {
        let event = ObservabilityEvent {
            event_id: ObservabilityEvent::new_id(),
            timestamp: Utc::now(),
            event_type: EventType::ToolCall,
            workflow_id: workflow_id.to_string(),
            issue_id: issue_id.to_string(),
            phase_name: Some(phase_name.to_string()),
            phase_number: None,
            status: if record.success { "completed".to_string() } else { "failed".to_string() },
            duration_seconds: Some(record.duration_ms as f64 / 1000.0),
            cost_usd: None,
            error_message: None,
            context: HashMap::from([
                ("tool_name".to_string(), serde_json::json!(record.tool_name)),
                ("args".to_string(), serde_json::json!(record.args)),
            ]),
        };
        self.emit(event).await;
    }

    async fn emit(&self, event: ObservabilityEvent) {
        if let Err(e) = self.append_to_file(&event) {
            tracing::warn!(workflow_id = %event.workflow_id, error = %e, "failed to append observability event to log file");
        }
        self.post_best_effort(&event).await;
    }

    fn append_to_file(&self, event: &ObservabilityEvent) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        std::fs::create_dir_all(&self.log_dir)?;
        let path = self.log_dir.join(format!("{}.jsonl", event.workflow_id));
        let line = serde_json::to_string(event).unwrap_or_default();
        let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{line}")
    }

    async fn post_best_effort(&self, event: &ObservabilityEvent) {
        let Some(endpoint) = &self.endpoint else { return };
        let path = match event.event_type {
            EventType::Workflow => "/api/v1/observability/workflows",
            _ => "/api/v1/observability/phases",
        };
        let url = format!("{}{}", endpoint.trim_end_matches('/'), path);
        match self.client.post(&url).json(event).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => tracing::debug!(status = %resp.status(), "event sink returned non-2xx"),
            Err(e) => tracing::debug!(error = %e, "event sink unreachable, continuing"),
        }
    }

    /// Read back the per-workflow JSONL log, in emitted order — used by
    /// tests and by `status` to reconstruct a visible timeline without
    /// round-tripping through the Event Sink.
    pub fn read_log(&self, workflow_id: &str) -> Vec<ObservabilityEvent> {
        let path = self.log_dir.join(format!("{workflow_id}.jsonl"));
        let Ok(raw) = std::fs::read_to_string(path) else { return Vec::new() };
        raw.lines().filter_map(|line| serde_json::from_str(line).ok()).collect()
    }
}

pub fn monotonic_ok(events: &[ObservabilityEvent]) -> bool {
    events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}
