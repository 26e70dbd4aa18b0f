//! Phase-Completion Tracker.
//!
//! Per-workflow sidecar at `agents/<workflow_id>/completed_phases.json`,
//! independent of the Phase Queue so external scripts can read resume state
//! without touching queue internals. Spec §9 resolves the two-stores
//! duplication by making the Queue authoritative for scheduling; this
//! tracker is a view the Coordinator writes on every completion, used
//! solely to implement `resume`.

use chrono::Utc;
use sdlc_common::CompletionSidecar;
use std::path::PathBuf;

const SIDECAR_FILE: &str = "completed_phases.json";

pub struct CompletionTracker {
    path: PathBuf,
}

impl CompletionTracker {
    pub fn new(agent_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: agent_dir.into().join(SIDECAR_FILE),
        }
    }

    fn load(&self) -> CompletionSidecar {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save(&self, sidecar: &CompletionSidecar) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(sidecar)?;
        std::fs::write(&self.path, json)
    }

    pub fn is_completed(&self, phase: &str) -> bool {
        self.load().completed.iter().any(|p| p == phase)
    }

    pub fn mark_completed(&self, phase: &str) -> std::io::Result<()> {
        let mut sidecar = self.load();
        if !sidecar.completed.iter().any(|p| p == phase) {
            sidecar.completed.push(phase.to_string());
        }
        sidecar.last_updated = Some(Utc::now());
        self.save(&sidecar)
    }

    pub fn set_current(&self, phase: Option<&str>) -> std::io::Result<()> {
        let mut sidecar = self.load();
        sidecar.current = phase.map(|p| p.to_string());
        sidecar.last_updated = Some(Utc::now());
        self.save(&sidecar)
    }

    /// The first phase in `phase_list` not yet recorded as completed, or
    /// `None` if all have finished.
    pub fn next_to_run(&self, phase_list: &[String]) -> Option<String> {
        let sidecar = self.load();
        phase_list
            .iter()
            .find(|p| !sidecar.completed.contains(p))
            .cloned()
    }

    pub fn reset(&self) -> std::io::Result<()> {
        self.save(&CompletionSidecar::default())
    }

    pub fn snapshot(&self) -> CompletionSidecar {
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mark_completed_is_idempotent() {
        let dir = tempdir().unwrap();
        let tracker = CompletionTracker::new(dir.path());
        tracker.mark_completed("plan").unwrap();
        tracker.mark_completed("plan").unwrap();
        let sidecar = tracker.snapshot();
        assert_eq!(sidecar.completed, vec!["plan".to_string()]);
    }

    #[test]
    fn next_to_run_skips_completed_phases() {
        let dir = tempdir().unwrap();
        let tracker = CompletionTracker::new(dir.path());
        tracker.mark_completed("plan").unwrap();
        tracker.mark_completed("validate").unwrap();
        tracker.mark_completed("build").unwrap();
        let phases = vec!["plan".into(), "validate".into(), "build".into(), "lint".into()];
        assert_eq!(tracker.next_to_run(&phases), Some("lint".to_string()));
    }

    #[test]
    fn next_to_run_none_when_all_done() {
        let dir = tempdir().unwrap();
        let tracker = CompletionTracker::new(dir.path());
        let phases = vec!["plan".to_string()];
        tracker.mark_completed("plan").unwrap();
        assert_eq!(tracker.next_to_run(&phases), None);
    }

    #[test]
    fn reset_clears_sidecar() {
        let dir = tempdir().unwrap();
        let tracker = CompletionTracker::new(dir.path());
        tracker.mark_completed("plan").unwrap();
        tracker.reset().unwrap();
        assert!(!tracker.is_completed("plan"));
    }
}
