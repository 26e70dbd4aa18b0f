//! Shared domain types for the SDLC orchestration engine.
//!
//! These types are the wire/disk format every component agrees on: the
//! orchestrator, the queue, the executor and the CLI all serialize and
//! deserialize the same structs so that a `WorkflowState` written by one
//! process round-trips through another without loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod events;

/// Classification assigned once per issue and never changed afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Feature,
    Bug,
    Chore,
    Patch,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Classification::Feature => "feature",
            Classification::Bug => "bug",
            Classification::Chore => "chore",
            Classification::Patch => "patch",
        };
        write!(f, "{s}")
    }
}

/// Complexity tier produced by the Classifier & Cost Estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityLevel {
    Lightweight,
    Standard,
    Complex,
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComplexityLevel::Lightweight => "lightweight",
            ComplexityLevel::Standard => "standard",
            ComplexityLevel::Complex => "complex",
        };
        write!(f, "{s}")
    }
}

/// Overall workflow status, see WorkflowState invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

/// One per (workflow, phase) execution result, stored under
/// `WorkflowState::phase_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_name: String,
    pub success: bool,
    #[serde(default)]
    pub summary: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<ToolError>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    pub duration_seconds: f64,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

/// One error/failure entry returned by an external tool subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub column: Option<u32>,
    pub kind: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub fixable: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Baseline error counts captured by the Validate phase, carried forward
/// so Build's output can be diffed against a known-good snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineErrors {
    #[serde(default)]
    pub frontend_type_errors: u32,
    #[serde(default)]
    pub backend_type_errors: u32,
    #[serde(default)]
    pub lint_errors: u32,
}

/// WorkflowState: one per workflow, the single source of truth for
/// coordination. Extra top-level keys set by subprocess phases
/// (`external_build_results` etc.) live inside `context` and `phase_results`
/// so that `serde_json::Value` round-trips preserve fields this struct
/// doesn't know about (downstream readers tolerate extra fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub issue_id: String,
    pub template_name: String,
    pub classification: Option<Classification>,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub worktree_path: Option<String>,
    #[serde(default)]
    pub backend_port: Option<u16>,
    #[serde(default)]
    pub frontend_port: Option<u16>,
    #[serde(default)]
    pub baseline_errors: Option<BaselineErrors>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phase_results: HashMap<String, PhaseResult>,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub template_deprecated_from: Option<String>,
    /// Free-form tool-specific payloads (`external_build_results`, ...).
    /// Deliberately a raw JSON map: the core does not interpret these
    /// values, it only guarantees they survive read-before-merge saves.
    #[serde(default, flatten)]
    pub context: HashMap<String, serde_json::Value>,
}

impl WorkflowState {
    pub fn new(workflow_id: String, issue_id: String, template_name: String) -> Self {
        Self {
            workflow_id,
            issue_id,
            template_name,
            classification: None,
            status: WorkflowStatus::Pending,
            current_phase: None,
            branch_name: None,
            worktree_path: None,
            backend_port: None,
            frontend_port: None,
            baseline_errors: None,
            start_time: Utc::now(),
            end_time: None,
            phase_results: HashMap::new(),
            cancel_requested: false,
            template_deprecated_from: None,
            context: HashMap::new(),
        }
    }
}

/// Phase lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Queued,
    Ready,
    Running,
    Completed,
    Blocked,
    Failed,
    Cancelled,
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PhaseStatus::Completed
                | PhaseStatus::Failed
                | PhaseStatus::Blocked
                | PhaseStatus::Cancelled
        )
    }
}

/// One queue entry: a single (workflow, phase) unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub queue_id: String,
    pub workflow_id: String,
    pub parent_issue: String,
    pub phase_number: u32,
    pub phase_name: String,
    #[serde(default)]
    pub depends_on_phase: Option<u32>,
    pub status: PhaseStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub phase_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub ready_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// `workflow_id -> (backend, frontend, allocated_at)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortAllocation {
    pub backend_port: u16,
    pub frontend_port: u16,
    pub allocated_at: DateTime<Utc>,
}

/// On-disk shape of the Phase-Completion Tracker sidecar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionSidecar {
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Per-backend remote-API quota snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitInfo {
    pub fn used(&self) -> u64 {
        self.limit.saturating_sub(self.remaining)
    }
}

/// `(tool_name, args, started_at, duration_ms, success)` — accumulated per
/// phase execution, flushed to the Event Sink on phase completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
}

/// The core's error taxonomy. One flat enum shared across all
/// components so the Coordinator and the CLI can match on it uniformly.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("blocked by safety gate: {0}")]
    SafetyBlocked(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("tool failure: {0}")]
    ToolFailure(String),

    #[error("agent failure: {0}")]
    AgentFailure(String),

    #[error("tool output did not match the expected schema: {0}")]
    SchemaMismatch(String),

    #[error("state store corruption: {0}")]
    StateCorruption(String),

    #[error("port pool exhausted (size {pool_size})")]
    PortPoolExhausted { pool_size: usize },

    #[error("phase blocked by dependency failure: {0}")]
    DependencyBlocked(String),

    #[error("cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Unknown(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
