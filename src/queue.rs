//! Phase Queue & Dependency Tracker.
//!
//! A durable, JSON-file-backed ordered set of `PhaseRecord`s per workflow,
//! enforcing the state machine:
//!
//! ```text
//! queued --(deps resolved)--> ready --(executor picks up)--> running
//! running --(success)--> completed
//! running --(failure)--> failed
//! queued|ready|running --(upstream failure)--> blocked
//! queued|ready --(user/Coordinator)--> cancelled
//! ```
//!
//! `completed`/`failed`/`blocked`/`cancelled` are absorbing. Dependencies
//! are a single predecessor phase number per record — the schema keeps a
//! `depends_on_phase: Option<u32>` general enough to admit a future DAG,
//! but this queue only ever populates it with `phase_number - 1` — every
//! template here is a linear chain.

use crate::errors::QueueError;
use chrono::Utc;
use sdlc_common::{PhaseRecord, PhaseStatus};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

const QUEUE_FILE: &str = "phase_queue.json";

pub struct PhaseQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PhaseQueue {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: project_dir.into().join(".sdlc").join(QUEUE_FILE),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<Vec<PhaseRecord>, QueueError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_all(&self, records: &[PhaseRecord]) -> Result<(), QueueError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Insert new records for a workflow, all `queued` except phase 1 of a
    /// freshly enqueued workflow, which enters `ready` immediately.
    pub fn enqueue(
        &self,
        workflow_id: &str,
        parent_issue: &str,
        phase_names: &[String],
        priority: i32,
    ) -> Result<Vec<PhaseRecord>, QueueError> {
        let _guard = self.lock.lock().unwrap();
        let mut all = self.read_all()?;
        let now = Utc::now();
        let mut new_records = Vec::new();
        for (i, name) in phase_names.iter().enumerate() {
            let phase_number = (i + 1) as u32;
            let status = if phase_number == 1 { PhaseStatus::Ready } else { PhaseStatus::Queued };
            let record = PhaseRecord {
                queue_id: Uuid::new_v4().to_string(),
                workflow_id: workflow_id.to_string(),
                parent_issue: parent_issue.to_string(),
                phase_number,
                phase_name: name.clone(),
                depends_on_phase: if phase_number == 1 { None } else { Some(phase_number - 1) },
                status,
                priority,
                phase_data: crate::registry::PhaseKind::parse(name)
                    .map(crate::registry::default_phase_data)
                    .unwrap_or(serde_json::Value::Null),
                created_at: now,
                updated_at: now,
                ready_at: if phase_number == 1 { Some(now) } else { None },
                started_at: None,
                completed_at: None,
                error_message: None,
            };
            new_records.push(record);
        }
        all.extend(new_records.clone());
        self.write_all(&all)?;
        Ok(new_records)
    }

    fn find_mut<'a>(all: &'a mut [PhaseRecord], queue_id: &str) -> Result<&'a mut PhaseRecord, QueueError> {
        all.iter_mut()
            .find(|r| r.queue_id == queue_id)
            .ok_or_else(|| QueueError::NotFound(queue_id.to_string()))
    }

    fn validate_transition(from: PhaseStatus, to: PhaseStatus) -> bool {
        use PhaseStatus::*;
        matches!(
            (from, to),
            (Queued, Ready)
                | (Ready, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Queued, Blocked)
                | (Ready, Blocked)
                | (Running, Blocked)
                | (Queued, Cancelled)
                | (Ready, Cancelled)
                // re-marking the same terminal status is a no-op, not an error
                | (Completed, Completed)
                | (Failed, Failed)
                | (Blocked, Blocked)
                | (Cancelled, Cancelled)
        )
    }

    /// Validate and apply a transition, updating timestamps and persisting.
    pub fn mark(
        &self,
        queue_id: &str,
        new_status: PhaseStatus,
        error: Option<String>,
    ) -> Result<PhaseRecord, QueueError> {
        let _guard = self.lock.lock().unwrap();
        let mut all = self.read_all()?;
        let record = Self::find_mut(&mut all, queue_id)?;
        if !Self::validate_transition(record.status, new_status) {
            return Err(QueueError::InvalidTransition {
                queue_id: queue_id.to_string(),
                from: format!("{:?}", record.status),
                to: format!("{:?}", new_status),
            });
        }
        let now = Utc::now();
        record.status = new_status;
        record.updated_at = now;
        match new_status {
            PhaseStatus::Ready => record.ready_at = Some(now),
            PhaseStatus::Running => record.started_at = Some(now),
            PhaseStatus::Completed | PhaseStatus::Failed | PhaseStatus::Blocked | PhaseStatus::Cancelled => {
                record.completed_at = Some(now);
                if let Some(err) = error {
                    record.error_message = Some(err);
                }
            }
            PhaseStatus::Queued => {}
        }
        let updated = record.clone();
        self.write_all(&all)?;
        Ok(updated)
    }

    /// Among `ready` records, pick highest priority then earliest
    /// `created_at`.
    pub fn next_ready(&self) -> Result<Option<PhaseRecord>, QueueError> {
        let _guard = self.lock.lock().unwrap();
        let all = self.read_all()?;
        Ok(all
            .into_iter()
            .filter(|r| r.status == PhaseStatus::Ready)
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }))
    }

    /// Mark `completed_id` completed and promote the next sibling phase in
    /// the same workflow to `ready` if present and `queued`.
    pub fn trigger_next(&self, completed_id: &str) -> Result<Option<PhaseRecord>, QueueError> {
        let completed = self.mark(completed_id, PhaseStatus::Completed, None)?;
        let _guard = self.lock.lock().unwrap();
        let mut all = self.read_all()?;
        let next = all.iter_mut().find(|r| {
            r.workflow_id == completed.workflow_id
                && r.phase_number == completed.phase_number + 1
                && r.status == PhaseStatus::Queued
        });
        let promoted = if let Some(next) = next {
            next.status = PhaseStatus::Ready;
            next.ready_at = Some(Utc::now());
            next.updated_at = Utc::now();
            Some(next.clone())
        } else {
            None
        };
        self.write_all(&all)?;
        Ok(promoted)
    }

    /// Mark the failing phase `failed` and every later phase in the same
    /// workflow currently `{queued, ready}` to `blocked` with `reason`.
    pub fn block_dependents(&self, failed_id: &str, reason: &str) -> Result<Vec<PhaseRecord>, QueueError> {
        let failed = self.mark(failed_id, PhaseStatus::Failed, Some(reason.to_string()))?;
        let _guard = self.lock.lock().unwrap();
        let mut all = self.read_all()?;
        let now = Utc::now();
        let mut blocked = Vec::new();
        for record in all.iter_mut() {
            if record.workflow_id == failed.workflow_id
                && record.phase_number > failed.phase_number
                && matches!(record.status, PhaseStatus::Queued | PhaseStatus::Ready)
            {
                record.status = PhaseStatus::Blocked;
                record.error_message = Some(reason.to_string());
                record.completed_at = Some(now);
                record.updated_at = now;
                blocked.push(record.clone());
            }
        }
        self.write_all(&all)?;
        Ok(blocked)
    }

    /// Mark every non-terminal phase in the workflow `cancelled` (used by
    /// the Coordinator when `cancel_requested` is observed).
    pub fn cancel_workflow(&self, workflow_id: &str) -> Result<Vec<PhaseRecord>, QueueError> {
        let _guard = self.lock.lock().unwrap();
        let mut all = self.read_all()?;
        let now = Utc::now();
        let mut cancelled = Vec::new();
        for record in all.iter_mut() {
            if record.workflow_id == workflow_id && !record.status.is_terminal() {
                record.status = PhaseStatus::Cancelled;
                record.completed_at = Some(now);
                record.updated_at = now;
                cancelled.push(record.clone());
            }
        }
        self.write_all(&all)?;
        Ok(cancelled)
    }

    pub fn records_for(&self, workflow_id: &str) -> Result<Vec<PhaseRecord>, QueueError> {
        let _guard = self.lock.lock().unwrap();
        let all = self.read_all()?;
        Ok(all.into_iter().filter(|r| r.workflow_id == workflow_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn phase_names() -> Vec<String> {
        vec!["plan".into(), "validate".into(), "build".into()]
    }

    #[test]
    fn enqueue_only_first_phase_is_ready() {
        let dir = tempdir().unwrap();
        let queue = PhaseQueue::new(dir.path());
        let records = queue.enqueue("wf-1", "42", &phase_names(), 0).unwrap();
        assert_eq!(records[0].status, PhaseStatus::Ready);
        assert_eq!(records[1].status, PhaseStatus::Queued);
        assert_eq!(records[2].status, PhaseStatus::Queued);
        assert_eq!(records[1].depends_on_phase, Some(1));
    }

    #[test]
    fn trigger_next_promotes_sibling() {
        let dir = tempdir().unwrap();
        let queue = PhaseQueue::new(dir.path());
        let records = queue.enqueue("wf-1", "42", &phase_names(), 0).unwrap();
        let promoted = queue.trigger_next(&records[0].queue_id).unwrap().unwrap();
        assert_eq!(promoted.phase_number, 2);
        assert_eq!(promoted.status, PhaseStatus::Ready);
    }

    #[test]
    fn block_dependents_blocks_all_later_phases() {
        let dir = tempdir().unwrap();
        let queue = PhaseQueue::new(dir.path());
        let records = queue.enqueue("wf-1", "42", &phase_names(), 0).unwrap();
        // mark phase 1 running first so failing it is a valid transition
        queue.mark(&records[0].queue_id, PhaseStatus::Running, None).unwrap();
        let blocked = queue.block_dependents(&records[0].queue_id, "build broke").unwrap();
        assert_eq!(blocked.len(), 2);
        assert!(blocked.iter().all(|r| r.status == PhaseStatus::Blocked));
        let failed = queue.records_for("wf-1").unwrap();
        let phase1 = failed.iter().find(|r| r.phase_number == 1).unwrap();
        assert_eq!(phase1.status, PhaseStatus::Failed);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let dir = tempdir().unwrap();
        let queue = PhaseQueue::new(dir.path());
        let records = queue.enqueue("wf-1", "42", &phase_names(), 0).unwrap();
        // queued -> running directly (skipping ready) is invalid
        let err = queue.mark(&records[1].queue_id, PhaseStatus::Running, None).unwrap_err();
        assert!(matches!(err, QueueError::InvalidTransition { .. }));
    }

    #[test]
    fn next_ready_picks_highest_priority_then_earliest() {
        let dir = tempdir().unwrap();
        let queue = PhaseQueue::new(dir.path());
        queue.enqueue("wf-1", "1", &["plan".to_string()], 0).unwrap();
        queue.enqueue("wf-2", "2", &["plan".to_string()], 5).unwrap();
        let next = queue.next_ready().unwrap().unwrap();
        assert_eq!(next.workflow_id, "wf-2");
    }

    #[test]
    fn cancel_workflow_marks_non_terminal_cancelled() {
        let dir = tempdir().unwrap();
        let queue = PhaseQueue::new(dir.path());
        let records = queue.enqueue("wf-1", "1", &phase_names(), 0).unwrap();
        queue.mark(&records[0].queue_id, PhaseStatus::Running, None).unwrap();
        let cancelled = queue.cancel_workflow("wf-1").unwrap();
        assert_eq!(cancelled.len(), 3);
    }

    #[test]
    fn single_phase_vs_ten_phase_queue() {
        let dir = tempdir().unwrap();
        let queue = PhaseQueue::new(dir.path());
        let one = queue.enqueue("wf-single", "1", &["plan".to_string()], 0).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].status, PhaseStatus::Ready);

        let ten_names: Vec<String> = (0..10).map(|i| format!("phase-{i}")).collect();
        let ten = queue.enqueue("wf-ten", "2", &ten_names, 0).unwrap();
        assert_eq!(ten.len(), 10);
        assert_eq!(ten.iter().filter(|r| r.status == PhaseStatus::Ready).count(), 1);
    }
}
