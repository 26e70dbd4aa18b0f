//! Workflow Orchestrator.
//!
//! Owns the top-level lifecycle of one workflow run: assign identity,
//! classify, reserve resources, enqueue the template's phase list, drive
//! every phase to completion, then report and clean up. This is the one
//! component that ever transitions a `WorkflowState` to `Completed` — the
//! Phase Coordinator's primitives carry a workflow through `running`, but
//! stop short of the terminal happy path (see `coordinator::PhaseCoordinator`).
//!
//! `lightweight` and `standard`/`complex` templates share the same driving
//! loop here; they differ only in which phases `registry::phases_for_template`
//! enqueues. A dedicated long-lived Coordinator process watching the same
//! on-disk queue is a deployment choice this binary does not make for you —
//! `sdlc run` drives its own workflow to completion in one invocation.

use crate::classifier::{self, Classifier};
use crate::completion_tracker::CompletionTracker;
use crate::config::{SdlcConfig, agent_dir, trees_dir};
use crate::coordinator::PhaseCoordinator;
use crate::errors::WorkingTreeError;
use crate::observability::ObservabilityEmitter;
use crate::port_pool::PortPool;
use crate::queue::PhaseQueue;
use crate::registry::{self, PhaseKind};
use crate::state_store::StateStore;
use crate::vcs::VcsClient;
use crate::workingtree::WorkingTreeManager;
use sdlc_common::{CoreError, PhaseStatus, WorkflowStatus};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Everything a Version Control Host issue contributes to a new workflow.
pub struct IssueInput<'a> {
    pub issue_id: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub type_label: Option<&'a str>,
    pub base_branch: &'a str,
}

/// CLI-level flags from `sdlc run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub template_override: Option<String>,
    pub workflow_id: Option<String>,
    pub resume: bool,
    pub skip_e2e: bool,
    pub skip_resolution: bool,
}

pub struct WorkflowOrchestrator {
    project_dir: PathBuf,
    config: SdlcConfig,
    state_store: Arc<StateStore>,
    queue: Arc<PhaseQueue>,
    port_pool: Arc<PortPool>,
    working_trees: Arc<WorkingTreeManager>,
    classifier: Arc<Classifier>,
    coordinator: Arc<PhaseCoordinator>,
    observability: Arc<ObservabilityEmitter>,
    vcs: Option<Arc<VcsClient>>,
}

impl WorkflowOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_dir: impl Into<PathBuf>,
        config: SdlcConfig,
        state_store: Arc<StateStore>,
        queue: Arc<PhaseQueue>,
        port_pool: Arc<PortPool>,
        working_trees: Arc<WorkingTreeManager>,
        classifier: Arc<Classifier>,
        coordinator: Arc<PhaseCoordinator>,
        observability: Arc<ObservabilityEmitter>,
        vcs: Option<Arc<VcsClient>>,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            config,
            state_store,
            queue,
            port_pool,
            working_trees,
            classifier,
            coordinator,
            observability,
            vcs,
        }
    }

    /// Run `issue` through its classified (or overridden) template to a
    /// terminal status, following the orchestrator's seven-step lifecycle.
    pub async fn run(&self, issue: IssueInput<'_>, options: RunOptions) -> Result<WorkflowStatus, CoreError> {
        let workflow_id = self.state_store.ensure(options.workflow_id.clone(), issue.issue_id)?;

        let classification = self.classifier.classify(issue.issue_id, issue.title, issue.body, issue.type_label);
        let requested_template = options
            .template_override
            .clone()
            .unwrap_or_else(|| classification.template_name.clone());
        let deprecated_from =
            registry::is_deprecated_alias(&requested_template).then(|| requested_template.clone());
        let resolved_template = registry::resolve_template_alias(&requested_template);
        let category = classifier::category_for(issue.title, issue.body, issue.type_label);

        let (backend_port, frontend_port) = self.port_pool.reserve(&workflow_id)?;
        let tree_path = match self.working_trees.create(&workflow_id, issue.base_branch) {
            Ok(path) => path,
            Err(WorkingTreeError::AlreadyExists(_)) => trees_dir(&self.project_dir, &workflow_id),
            Err(e) => return Err(e.into()),
        };
        self.working_trees.configure_env(&tree_path, backend_port, frontend_port)?;

        let branch_name = format!("{category}/{}-{workflow_id}", issue.issue_id);
        self.state_store.update(&workflow_id, "orchestrator-init", |state| {
            state.status = WorkflowStatus::Running;
            state.template_name = resolved_template.clone();
            state.template_deprecated_from = deprecated_from.clone();
            state.classification = Some(category);
            state.branch_name = Some(branch_name.clone());
            state.worktree_path = Some(tree_path.display().to_string());
            state.backend_port = Some(backend_port);
            state.frontend_port = Some(frontend_port);
        })?;

        let mut phases = registry::phases_for_template(&resolved_template);
        if options.skip_e2e {
            phases.retain(|p| *p != PhaseKind::Test);
        }
        if options.skip_resolution {
            phases.retain(|p| *p != PhaseKind::Review);
        }
        let phase_names: Vec<String> = phases.iter().map(|p| p.as_str().to_string()).collect();

        self.ensure_enqueued(&workflow_id, issue.issue_id, &phase_names, options.resume)?;

        let status = self.drive(&workflow_id).await?;
        self.finalize(&workflow_id, issue.issue_id, status).await;
        Ok(status)
    }

    /// Enqueue the phase list unless it is already on the queue. On
    /// `resume`, consult the Phase-Completion Tracker sidecar and enqueue
    /// only the phases not yet recorded as completed — the sidecar
    /// survives even if the queue file itself was lost.
    fn ensure_enqueued(
        &self,
        workflow_id: &str,
        issue_id: &str,
        phase_names: &[String],
        resume: bool,
    ) -> Result<(), CoreError> {
        let existing = self.queue.records_for(workflow_id)?;
        if !existing.is_empty() {
            return Ok(());
        }

        let to_enqueue: Vec<String> = if resume {
            let tracker = CompletionTracker::new(agent_dir(&self.project_dir, workflow_id));
            match tracker.next_to_run(phase_names) {
                Some(next) => {
                    let start = phase_names.iter().position(|p| p == &next).unwrap_or(0);
                    phase_names[start..].to_vec()
                }
                None => Vec::new(),
            }
        } else {
            phase_names.to_vec()
        };

        if !to_enqueue.is_empty() {
            self.queue.enqueue(workflow_id, issue_id, &to_enqueue, 0)?;
        }
        Ok(())
    }

    /// Drive `workflow_id`'s queue to a terminal state: run every `ready`
    /// phase in turn via the Coordinator's single-phase primitive, checking
    /// for cancellation and for "every phase completed" (the happy path the
    /// Coordinator itself stops short of) on each tick.
    async fn drive(&self, workflow_id: &str) -> Result<WorkflowStatus, CoreError> {
        loop {
            let state = self.state_store.load(workflow_id)?;
            if state.status.is_terminal() {
                return Ok(state.status);
            }
            if state.cancel_requested {
                self.queue.cancel_workflow(workflow_id)?;
                let state = self.state_store.mark_terminal(workflow_id, WorkflowStatus::Cancelled)?;
                return Ok(state.status);
            }

            let records = self.queue.records_for(workflow_id)?;
            if !records.is_empty() && records.iter().all(|r| r.status == PhaseStatus::Completed) {
                let state = self.state_store.mark_terminal(workflow_id, WorkflowStatus::Completed)?;
                return Ok(state.status);
            }

            match self.coordinator.next_ready_for(workflow_id)? {
                Some(record) => self.coordinator.run_one(record).await?,
                None => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    }

    /// Post a summary comment, emit a workflow-level observability event,
    /// and release every resource the run acquired — regardless of outcome,
    /// since a failed or cancelled workflow still needs its port and
    /// working tree reclaimed.
    async fn finalize(&self, workflow_id: &str, issue_id: &str, status: WorkflowStatus) {
        if let Some(vcs) = &self.vcs
            && let Ok(issue_number) = issue_id.parse::<i64>()
        {
            let body = format!("Workflow `{workflow_id}` finished with status `{status}`.");
            if let Err(e) = vcs.post_comment(issue_number, &body).await {
                tracing::warn!(workflow_id, issue_id, error = %e, "failed to post summary comment");
            }
        }

        self.observability
            .log_workflow(workflow_id, issue_id, &status.to_string(), None, None, None, HashMap::new())
            .await;

        if let Err(e) = self.working_trees.teardown(workflow_id) {
            tracing::warn!(workflow_id, error = %e, "failed to tear down working tree during cleanup");
        }
        if let Err(e) = self.port_pool.release(workflow_id) {
            tracing::warn!(workflow_id, error = %e, "failed to release port allocation during cleanup");
        }
    }

    /// Request cooperative cancellation: the next `drive` tick (in this
    /// process or any other watching the same queue) observes the flag.
    pub fn cancel(&self, workflow_id: &str) -> Result<(), CoreError> {
        self.state_store.update(workflow_id, "cancel-request", |state| {
            state.cancel_requested = true;
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::TestStubRunner;
    use crate::executor::PhaseExecutor;
    use git2::{Repository, Signature};
    use std::path::Path;
    use tempfile::tempdir;

    fn init_repo_with_commit(dir: &Path) {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("README.md"), "hello").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        let _ = repo.branch("main", &head, false);
    }

    fn build(
        dir: &Path,
        runner: Arc<dyn crate::agent_runner::AgentRunner>,
    ) -> WorkflowOrchestrator {
        let config = SdlcConfig::default();
        let state_store = Arc::new(StateStore::new(dir));
        let queue = Arc::new(PhaseQueue::new(dir));
        let port_pool = Arc::new(PortPool::new(dir, &config));
        let working_trees = Arc::new(WorkingTreeManager::new(dir));
        let classifier = Arc::new(Classifier::new());
        let executor = Arc::new(PhaseExecutor::new(runner, true));
        let observability = Arc::new(ObservabilityEmitter::new(dir.join("logs"), None));
        let coordinator = Arc::new(PhaseCoordinator::new(
            dir,
            queue.clone(),
            state_store.clone(),
            executor,
            observability.clone(),
            config.clone(),
        ));
        WorkflowOrchestrator::new(
            dir,
            config,
            state_store,
            queue,
            port_pool,
            working_trees,
            classifier,
            coordinator,
            observability,
            None,
        )
    }

    #[tokio::test]
    async fn lightweight_issue_runs_to_completed() {
        let dir = tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let orchestrator = build(dir.path(), Arc::new(TestStubRunner::succeeding("done")));

        let status = orchestrator
            .run(
                IssueInput {
                    issue_id: "1",
                    title: "Fix a typo in the README",
                    body: "single file change",
                    type_label: None,
                    base_branch: "main",
                },
                RunOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn complex_issue_chooses_the_complete_template() {
        let dir = tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let orchestrator = build(dir.path(), Arc::new(TestStubRunner::succeeding("done")));

        let status = orchestrator
            .run(
                IssueInput {
                    issue_id: "2",
                    title: "Rework authentication across services",
                    body: "full-stack database migration with security review",
                    type_label: None,
                    base_branch: "main",
                },
                RunOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(status, WorkflowStatus::Completed);
        let records = orchestrator.queue.records_for("wf-does-not-exist").unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn build_failure_fails_the_whole_workflow() {
        let dir = tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let orchestrator = build(dir.path(), Arc::new(TestStubRunner::failing("build broke")));

        let status = orchestrator
            .run(
                IssueInput {
                    issue_id: "3",
                    title: "Add a settings page",
                    body: "nothing fancy",
                    type_label: None,
                    base_branch: "main",
                },
                RunOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn template_override_forces_lightweight_regardless_of_classification() {
        let dir = tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let orchestrator = build(dir.path(), Arc::new(TestStubRunner::succeeding("done")));

        let status = orchestrator
            .run(
                IssueInput {
                    issue_id: "4",
                    title: "Rework authentication across services",
                    body: "full-stack database migration with security review",
                    type_label: None,
                    base_branch: "main",
                },
                RunOptions {
                    template_override: Some("lightweight".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(status, WorkflowStatus::Completed);
        let state = orchestrator.state_store.load("wf-not-real");
        assert!(state.is_err());
    }

    #[tokio::test]
    async fn deprecated_template_alias_is_forwarded_and_recorded() {
        let dir = tempdir().unwrap();
        init_repo_with_commit(dir.path());
        let orchestrator = build(dir.path(), Arc::new(TestStubRunner::succeeding("done")));

        let workflow_id = orchestrator.state_store.ensure(None, "5").unwrap();
        let status = orchestrator
            .run(
                IssueInput {
                    issue_id: "5",
                    title: "Quick fix",
                    body: "typo",
                    type_label: None,
                    base_branch: "main",
                },
                RunOptions {
                    template_override: Some("adw_patch".to_string()),
                    workflow_id: Some(workflow_id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(status, WorkflowStatus::Completed);
        let state = orchestrator.state_store.load(&workflow_id).unwrap();
        assert_eq!(state.template_name, "lightweight");
        assert_eq!(state.template_deprecated_from.as_deref(), Some("adw_patch"));
    }
}
