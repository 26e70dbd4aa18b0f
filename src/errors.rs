//! Typed error hierarchy for the SDLC orchestration engine.
//!
//! One `thiserror` enum per subsystem, each convertible into
//! [`sdlc_common::CoreError`] via `#[from]` — the same layering the rest of
//! this workspace uses (compare `sdlc_common::CoreError`, which carries the
//! cross-cutting error taxonomy). CLI boundaries use `anyhow::Result`
//! with `.context(...)` for human-facing messages; everything below that
//! boundary is a typed enum so callers can match on failure kind.

use sdlc_common::CoreError;
use thiserror::Error;

/// Identity & State Store failures.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("workflow {0} not found")]
    NotFound(String),

    #[error("state document for {workflow_id} is corrupt: {reason}")]
    Corrupt { workflow_id: String, reason: String },

    #[error("workflow {workflow_id} is already terminal with status {current}, cannot mark {requested}")]
    AlreadyTerminal {
        workflow_id: String,
        current: String,
        requested: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<StateStoreError> for CoreError {
    fn from(e: StateStoreError) -> Self {
        match e {
            StateStoreError::NotFound(id) => CoreError::Unknown(format!("workflow not found: {id}")),
            StateStoreError::Corrupt { reason, .. } => CoreError::StateCorruption(reason),
            StateStoreError::AlreadyTerminal { .. } => CoreError::Unknown(e.to_string()),
            StateStoreError::Io(e) => CoreError::Io(e),
            StateStoreError::Json(e) => CoreError::Json(e),
        }
    }
}

/// Port Pool failures.
#[derive(Debug, Error)]
pub enum PortPoolError {
    #[error("port pool exhausted (size {pool_size})")]
    Exhausted { pool_size: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<PortPoolError> for CoreError {
    fn from(e: PortPoolError) -> Self {
        match e {
            PortPoolError::Exhausted { pool_size } => CoreError::PortPoolExhausted { pool_size },
            PortPoolError::Io(e) => CoreError::Io(e),
            PortPoolError::Json(e) => CoreError::Json(e),
        }
    }
}

/// Phase Queue & Dependency Tracker failures.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid transition for phase {queue_id}: {from} -> {to}")]
    InvalidTransition {
        queue_id: String,
        from: String,
        to: String,
    },

    #[error("queue record {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<QueueError> for CoreError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::InvalidTransition { .. } => CoreError::Unknown(e.to_string()),
            QueueError::NotFound(id) => CoreError::DependencyBlocked(format!("no such phase record: {id}")),
            QueueError::Io(e) => CoreError::Io(e),
            QueueError::Json(e) => CoreError::Json(e),
        }
    }
}

/// Safety Gate failures (the gate "blocking" something is not an error —
/// it is a `SafetyBlocked` variant of `CoreError` returned as a value,
/// never a panic or thrown exception).
#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("malformed tool input: {0}")]
    MalformedInput(String),
}

impl From<SafetyError> for CoreError {
    fn from(e: SafetyError) -> Self {
        CoreError::Unknown(e.to_string())
    }
}

/// Working-Tree Manager failures.
#[derive(Debug, Error)]
pub enum WorkingTreeError {
    #[error("working tree for {0} already exists")]
    AlreadyExists(String),

    #[error("base branch {0} not found")]
    BaseBranchMissing(String),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<WorkingTreeError> for CoreError {
    fn from(e: WorkingTreeError) -> Self {
        CoreError::Unknown(e.to_string())
    }
}
