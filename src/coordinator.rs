//! Phase Coordinator.
//!
//! The long-running loop that drives the Phase Queue for `standard` and
//! `complex` workflows (`lightweight` chains its phases directly in-process
//! instead). Each tick polls for `ready` records, runs one to completion
//! through the Phase Executor, and applies the resulting transition —
//! `trigger_next` on success, `block_dependents` on a hard failure. A
//! soft phase (only Lint) failing does not block its dependents
//! unless `stop_on_lint_failure` is set.

use crate::completion_tracker::CompletionTracker;
use crate::config::{SdlcConfig, agent_dir, trees_dir};
use crate::errors::QueueError;
use crate::executor::PhaseExecutor;
use crate::observability::ObservabilityEmitter;
use crate::queue::PhaseQueue;
use crate::registry::PhaseKind;
use crate::state_store::StateStore;
use sdlc_common::{PhaseRecord, PhaseStatus, WorkflowStatus};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::sleep;

/// Broadcast to any websocket subscribers:
/// `{type: phase_update, workflow_id, phase, status}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PhaseUpdate {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub workflow_id: String,
    pub phase: String,
    pub status: String,
}

pub struct PhaseCoordinator {
    project_dir: PathBuf,
    queue: Arc<PhaseQueue>,
    state_store: Arc<StateStore>,
    executor: Arc<PhaseExecutor>,
    observability: Arc<ObservabilityEmitter>,
    config: SdlcConfig,
    updates: broadcast::Sender<PhaseUpdate>,
}

impl PhaseCoordinator {
    pub fn new(
        project_dir: impl Into<PathBuf>,
        queue: Arc<PhaseQueue>,
        state_store: Arc<StateStore>,
        executor: Arc<PhaseExecutor>,
        observability: Arc<ObservabilityEmitter>,
        config: SdlcConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            project_dir: project_dir.into(),
            queue,
            state_store,
            executor,
            observability,
            config,
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PhaseUpdate> {
        self.updates.subscribe()
    }

    /// Drive `workflow_id` until its WorkflowState reaches a terminal
    /// status, sleeping `poll_interval_seconds` between empty ticks.
    pub async fn run_until_terminal(&self, workflow_id: &str) -> Result<WorkflowStatus, QueueError> {
        loop {
            let state = match self.state_store.load(workflow_id) {
                Ok(state) => state,
                Err(e) => return Err(QueueError::NotFound(format!("{workflow_id}: {e}"))),
            };
            if state.status.is_terminal() {
                return Ok(state.status);
            }
            if state.cancel_requested {
                self.queue.cancel_workflow(workflow_id)?;
                let state = self
                    .state_store
                    .mark_terminal(workflow_id, WorkflowStatus::Cancelled)
                    .map_err(|e| QueueError::NotFound(e.to_string()))?;
                return Ok(state.status);
            }

            match self.next_ready_for(workflow_id)? {
                Some(record) => self.run_one(record).await?,
                None => sleep(std::time::Duration::from_secs(self.config.poll_interval_seconds)).await,
            }
        }
    }

    /// One Coordinator tick scoped to `workflow_id`: highest priority,
    /// then earliest created, among that workflow's `ready` records.
    pub(crate) fn next_ready_for(&self, workflow_id: &str) -> Result<Option<PhaseRecord>, QueueError> {
        let records = self.queue.records_for(workflow_id)?;
        Ok(records
            .into_iter()
            .filter(|r| r.status == PhaseStatus::Ready)
            .max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| b.created_at.cmp(&a.created_at))))
    }

    /// Drive one `PhaseRecord` to completion: mark it running, execute it,
    /// fold the result back into `WorkflowState`, and apply the resulting
    /// transition. Exposed at crate visibility so the Workflow Orchestrator
    /// can drive the same primitive in-process for every template instead
    /// of duplicating this logic.
    pub(crate) async fn run_one(&self, record: PhaseRecord) -> Result<(), QueueError> {
        self.queue.mark(&record.queue_id, PhaseStatus::Running, None)?;

        let working_dir = trees_dir(&self.project_dir, &record.workflow_id);
        let tracker = CompletionTracker::new(agent_dir(&self.project_dir, &record.workflow_id));
        let _ = tracker.set_current(Some(&record.phase_name));

        let phase_kind = PhaseKind::parse(&record.phase_name);
        let prompt = format!("Execute phase {} for workflow {}", record.phase_name, record.workflow_id);

        let outcome = match phase_kind {
            Some(kind) => {
                self.executor
                    .execute(kind, &record.phase_data, &working_dir, &prompt)
                    .await
            }
            None => Err(sdlc_common::CoreError::Unknown(format!(
                "unrecognized phase name {}",
                record.phase_name
            ))),
        };

        let is_soft = phase_kind.map(|k| k.is_soft()).unwrap_or(false);

        match outcome {
            Ok(execution) => {
                for call in &execution.tool_calls {
                    self.observability
                        .log_tool_call(&record.workflow_id, &record.parent_issue, &record.phase_name, call)
                        .await;
                }

                let status_label = if execution.result.success { "completed" } else { "failed" };
                self.observability
                    .log_phase(
                        &record.workflow_id,
                        &record.parent_issue,
                        &record.phase_name,
                        record.phase_number,
                        status_label,
                        Some(execution.result.duration_seconds),
                        execution.result.cost_usd,
                        None,
                        HashMap::new(),
                    )
                    .await;

                let phase_name = record.phase_name.clone();
                let workflow_id = record.workflow_id.clone();
                let result = execution.result.clone();
                self.state_store
                    .update(&workflow_id, "coordinator-phase-result", move |state| {
                        state
                            .context
                            .insert(format!("external_{phase_name}_results"), serde_json::to_value(&result).unwrap_or_default());
                        state.phase_results.insert(phase_name.clone(), result);
                    })
                    .map_err(|e| QueueError::NotFound(e.to_string()))?;

                if execution.result.success || (is_soft && !self.config.stop_on_lint_failure) {
                    let _ = tracker.mark_completed(&record.phase_name);
                    let promoted = self.queue.trigger_next(&record.queue_id)?;
                    let _ = self.updates.send(PhaseUpdate {
                        event_type: "phase_update",
                        workflow_id: record.workflow_id.clone(),
                        phase: record.phase_name.clone(),
                        status: "completed".to_string(),
                    });
                    if promoted.is_none() && !matches!(phase_kind, Some(PhaseKind::Ship | PhaseKind::Cleanup | PhaseKind::Verify)) {
                        // no sibling to promote and this was not a terminal
                        // phase: nothing left queued for this workflow.
                    }
                } else {
                    self.fail_phase(&record, "phase reported failure").await?;
                }
            }
            Err(e) => {
                let status_label = if is_soft && !self.config.stop_on_lint_failure { "completed" } else { "failed" };
                self.observability
                    .log_phase(
                        &record.workflow_id,
                        &record.parent_issue,
                        &record.phase_name,
                        record.phase_number,
                        status_label,
                        None,
                        None,
                        Some(e.to_string()),
                        HashMap::new(),
                    )
                    .await;

                if is_soft && !self.config.stop_on_lint_failure {
                    let _ = tracker.mark_completed(&record.phase_name);
                    self.queue.trigger_next(&record.queue_id)?;
                    let _ = self.updates.send(PhaseUpdate {
                        event_type: "phase_update",
                        workflow_id: record.workflow_id.clone(),
                        phase: record.phase_name.clone(),
                        status: "completed".to_string(),
                    });
                } else {
                    self.fail_phase(&record, &e.to_string()).await?;
                }
            }
        }

        Ok(())
    }

    async fn fail_phase(&self, record: &PhaseRecord, reason: &str) -> Result<(), QueueError> {
        self.queue.block_dependents(&record.queue_id, reason)?;
        let _ = self.updates.send(PhaseUpdate {
            event_type: "phase_update",
            workflow_id: record.workflow_id.clone(),
            phase: record.phase_name.clone(),
            status: "failed".to_string(),
        });

        let workflow_id = record.workflow_id.clone();
        let reason_owned = reason.to_string();
        self.state_store
            .update(&workflow_id, "coordinator-phase-failure", move |state| {
                state.status = WorkflowStatus::Failed;
                state.end_time = Some(chrono::Utc::now());
                state
                    .context
                    .insert("failure_reason".to_string(), serde_json::Value::String(reason_owned));
            })
            .map_err(|e| QueueError::NotFound(e.to_string()))?;
        Ok(())
    }
}
