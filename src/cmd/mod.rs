//! CLI command implementations.
//!
//! Each submodule owns one subcommand's handler, wiring the `clap`-parsed
//! arguments in `main.rs` to the domain modules in `crate::*`.

pub mod cancel;
pub mod config;
pub mod phase;
pub mod ports;
pub mod run;
pub mod status;
pub mod webhook_serve;

pub use cancel::cmd_cancel;
pub use config::cmd_config;
pub use phase::cmd_phase;
pub use ports::{cmd_ports_cleanup_stale, cmd_ports_list, cmd_ports_release};
pub use run::cmd_run;
pub use status::cmd_status;
pub use webhook_serve::cmd_webhook_serve;

use crate::agent_runner::{AgentRunner, LocalSubprocessRunner, RemoteLlmRunner};
use crate::classifier::Classifier;
use crate::config::SdlcConfig;
use crate::coordinator::PhaseCoordinator;
use crate::executor::PhaseExecutor;
use crate::observability::ObservabilityEmitter;
use crate::port_pool::PortPool;
use crate::queue::PhaseQueue;
use crate::ratelimit::RateLimitGuard;
use crate::state_store::StateStore;
use crate::vcs::VcsClient;
use crate::workingtree::WorkingTreeManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Everything a CLI command needs to drive a workflow. Built once per
/// invocation from the environment variables the core recognizes and the
/// project directory.
pub struct Context {
    pub project_dir: PathBuf,
    pub config: SdlcConfig,
    pub state_store: Arc<StateStore>,
    pub queue: Arc<PhaseQueue>,
    pub port_pool: Arc<PortPool>,
    pub working_trees: Arc<WorkingTreeManager>,
    pub classifier: Arc<Classifier>,
    pub coordinator: Arc<PhaseCoordinator>,
    pub observability: Arc<ObservabilityEmitter>,
    pub vcs: Option<Arc<VcsClient>>,
}

impl Context {
    /// Resolve the agent runner from environment: a remote LLM endpoint if
    /// `SDLC_LLM_ENDPOINT`/`SDLC_LLM_API_KEY` are both set, otherwise a
    /// local subprocess runner invoking `SDLC_AGENT_COMMAND` (default `claude`).
    fn build_agent_runner() -> Arc<dyn AgentRunner> {
        let endpoint = std::env::var("SDLC_LLM_ENDPOINT").ok();
        let api_key = std::env::var("SDLC_LLM_API_KEY").ok();
        if let (Some(endpoint), Some(api_key)) = (endpoint, api_key) {
            return Arc::new(RemoteLlmRunner::new(endpoint, api_key));
        }
        let command = std::env::var("SDLC_AGENT_COMMAND").unwrap_or_else(|_| "claude".to_string());
        Arc::new(LocalSubprocessRunner::new(command, vec![], Duration::from_secs(1800)))
    }

    fn build_vcs_client() -> Option<Arc<VcsClient>> {
        let token = std::env::var("SDLC_VCS_TOKEN").ok()?;
        let owner_repo = std::env::var("SDLC_VCS_REPO").ok()?;
        Some(Arc::new(VcsClient::new(token, owner_repo)))
    }

    pub fn build(project_dir: &Path, no_external: bool) -> anyhow::Result<Self> {
        let mut config = SdlcConfig::load(project_dir)?;
        if no_external {
            config.external_tool_enabled = false;
        }

        let state_store = Arc::new(StateStore::new(project_dir));
        let queue = Arc::new(PhaseQueue::new(project_dir));
        let port_pool = Arc::new(PortPool::new(project_dir, &config));
        let working_trees = Arc::new(WorkingTreeManager::new(project_dir));
        let classifier = Arc::new(Classifier::new());
        let observability = Arc::new(ObservabilityEmitter::new(
            crate::config::sdlc_dir(project_dir).join("logs"),
            config.observability_endpoint.clone(),
        ));
        let mut executor = PhaseExecutor::new(Self::build_agent_runner(), config.external_tool_enabled);
        if let Ok(llm_ping_url) = std::env::var("SDLC_LLM_ENDPOINT") {
            let vcs_rest_url = std::env::var("SDLC_VCS_RATE_LIMIT_URL").ok();
            let vcs_graphql_url = std::env::var("SDLC_VCS_GRAPHQL_URL").ok();
            let guard = Arc::new(RateLimitGuard::new(Some(llm_ping_url), vcs_rest_url, vcs_graphql_url));
            executor = executor.with_rate_limit_guard(guard, config.llm_quota_threshold);
        }
        let executor = Arc::new(executor);
        let coordinator = Arc::new(PhaseCoordinator::new(
            project_dir,
            queue.clone(),
            state_store.clone(),
            executor,
            observability.clone(),
            config.clone(),
        ));

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config,
            state_store,
            queue,
            port_pool,
            working_trees,
            classifier,
            coordinator,
            observability,
            vcs: Self::build_vcs_client(),
        })
    }

    pub fn orchestrator(&self) -> crate::orchestrator::WorkflowOrchestrator {
        crate::orchestrator::WorkflowOrchestrator::new(
            self.project_dir.clone(),
            self.config.clone(),
            self.state_store.clone(),
            self.queue.clone(),
            self.port_pool.clone(),
            self.working_trees.clone(),
            self.classifier.clone(),
            self.coordinator.clone(),
            self.observability.clone(),
            self.vcs.clone(),
        )
    }
}
