//! Identity & State Store.
//!
//! Assigns workflow ids and persists one JSON document per workflow at
//! `agents/<workflow_id>/adw_state.json`. The critical contract
//! here is read-before-merge: `update`
//! always re-reads the current document from disk, merges the patch into
//! it, and writes the merged result back — never the in-memory struct the
//! caller built at the start of a long-running phase. That is what lets a
//! subprocess-written `external_build_results` survive a parent process's
//! later, unrelated save.

use crate::config::agent_dir;
use crate::errors::StateStoreError;
use chrono::Utc;
use sdlc_common::{WorkflowState, WorkflowStatus};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

const STATE_FILE: &str = "adw_state.json";

pub struct StateStore {
    project_dir: PathBuf,
    // Guards the read-modify-write cycle against concurrent mutation from
    // within this process; cross-process safety comes from the atomic
    // rename-on-write below.
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// A short, opaque, collision-resistant workflow id.
    pub fn new_workflow_id() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("wf-{}", &id[..12])
    }

    fn state_path(&self, workflow_id: &str) -> PathBuf {
        agent_dir(&self.project_dir, workflow_id).join(STATE_FILE)
    }

    /// Allocate (if `workflow_id` is `None`) and initialize a state
    /// document with `status=pending`, `start_time=now`. Idempotent: if a
    /// document already exists for the given id, it is returned unchanged.
    pub fn ensure(&self, workflow_id: Option<String>, issue_id: &str) -> Result<String, StateStoreError> {
        let _guard = self.lock.lock().unwrap();
        let workflow_id = workflow_id.unwrap_or_else(Self::new_workflow_id);
        let path = self.state_path(&workflow_id);
        if path.exists() {
            return Ok(workflow_id);
        }
        let state = WorkflowState::new(workflow_id.clone(), issue_id.to_string(), String::new());
        self.write_atomic(&path, &state)?;
        Ok(workflow_id)
    }

    /// Load the current document. A missing file is `NotFound`, not a
    /// corruption — callers distinguish "never created" from "broken".
    pub fn load(&self, workflow_id: &str) -> Result<WorkflowState, StateStoreError> {
        let path = self.state_path(workflow_id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateStoreError::NotFound(workflow_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|e| StateStoreError::Corrupt {
            workflow_id: workflow_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Load, tolerating corruption by returning a fresh empty state with a
    /// warning logged.
    pub fn load_or_empty(&self, workflow_id: &str, issue_id: &str) -> WorkflowState {
        match self.load(workflow_id) {
            Ok(state) => state,
            Err(StateStoreError::NotFound(_)) => {
                WorkflowState::new(workflow_id.to_string(), issue_id.to_string(), String::new())
            }
            Err(e) => {
                tracing::warn!(workflow_id, error = %e, "state store corruption, returning empty state");
                WorkflowState::new(workflow_id.to_string(), issue_id.to_string(), String::new())
            }
        }
    }

    /// Save a full document as-is, tagging the write for debugging. Unlike
    /// `update`, this does not merge — callers that hold a freshly loaded
    /// `state` (no intervening mutation from elsewhere) use this; anything
    /// that might race with a subprocess must use `update` instead.
    pub fn save(&self, state: &WorkflowState, label: &str) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock().unwrap();
        tracing::debug!(workflow_id = %state.workflow_id, label, "saving workflow state");
        let path = self.state_path(&state.workflow_id);
        self.write_atomic(&path, state)
    }

    /// Read-modify-write: reload the persisted document, apply `patch`
    /// (given the freshly loaded state), write the result back. This is
    /// the only safe way to mutate a field without clobbering concurrent
    /// writers.
    pub fn update(
        &self,
        workflow_id: &str,
        label: &str,
        patch: impl FnOnce(&mut WorkflowState),
    ) -> Result<WorkflowState, StateStoreError> {
        let _guard = self.lock.lock().unwrap();
        let mut state = self.load(workflow_id)?;
        patch(&mut state);
        tracing::debug!(workflow_id, label, "updating workflow state");
        let path = self.state_path(workflow_id);
        self.write_atomic(&path, &state)?;
        Ok(state)
    }

    /// Set `status` and `end_time=now`. Fails if the workflow is already
    /// terminal with a *different* status — re-marking the same terminal
    /// status is idempotent.
    pub fn mark_terminal(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
    ) -> Result<WorkflowState, StateStoreError> {
        if !status.is_terminal() {
            return Err(StateStoreError::Corrupt {
                workflow_id: workflow_id.to_string(),
                reason: format!("mark_terminal called with non-terminal status {status}"),
            });
        }
        let _guard = self.lock.lock().unwrap();
        let mut state = self.load(workflow_id)?;
        if state.status.is_terminal() && state.status != status {
            return Err(StateStoreError::AlreadyTerminal {
                workflow_id: workflow_id.to_string(),
                current: state.status.to_string(),
                requested: status.to_string(),
            });
        }
        state.status = status;
        state.end_time = Some(Utc::now());
        let path = self.state_path(workflow_id);
        self.write_atomic(&path, &state)?;
        Ok(state)
    }

    /// Atomic write: write to a sibling temp file then rename over the
    /// target, so a reader never observes a half-written document.
    fn write_atomic(&self, path: &Path, state: &WorkflowState) -> Result<(), StateStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)?;
        {
            let mut f = std::fs::File::create(&tmp_path)?;
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let id = store.ensure(None, "42").unwrap();
        let id2 = store.ensure(Some(id.clone()), "42").unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(StateStoreError::NotFound(_))));
    }

    #[test]
    fn update_does_not_clobber_external_results() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let id = store.ensure(None, "42").unwrap();

        // subprocess phase writes external_build_results
        store
            .update(&id, "build-phase", |s| {
                s.context
                    .insert("external_build_results".into(), serde_json::json!({"errors": 0}));
            })
            .unwrap();

        // parent process saves an unrelated field afterward, loading fresh
        // state first (the read-before-merge contract)
        store
            .update(&id, "parent-save", |s| {
                s.current_phase = Some("lint".into());
            })
            .unwrap();

        let reloaded = store.load(&id).unwrap();
        assert_eq!(reloaded.current_phase.as_deref(), Some("lint"));
        assert_eq!(
            reloaded.context.get("external_build_results"),
            Some(&serde_json::json!({"errors": 0}))
        );
    }

    #[test]
    fn mark_terminal_sets_end_time_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let id = store.ensure(None, "1").unwrap();
        let state = store.mark_terminal(&id, WorkflowStatus::Completed).unwrap();
        assert!(state.end_time.is_some());
        assert!(state.end_time.unwrap() >= state.start_time);

        // idempotent re-mark with same status
        let state2 = store.mark_terminal(&id, WorkflowStatus::Completed).unwrap();
        assert_eq!(state2.status, WorkflowStatus::Completed);
    }

    #[test]
    fn mark_terminal_rejects_status_flip() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let id = store.ensure(None, "1").unwrap();
        store.mark_terminal(&id, WorkflowStatus::Completed).unwrap();
        let err = store.mark_terminal(&id, WorkflowStatus::Failed).unwrap_err();
        assert!(matches!(err, StateStoreError::AlreadyTerminal { .. }));
    }
}
