use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sdlc_orchestrator::cmd::{
    self, cmd_cancel, cmd_config, cmd_phase, cmd_ports_cleanup_stale, cmd_ports_list, cmd_ports_release, cmd_run,
    cmd_status, cmd_webhook_serve,
};

#[derive(Parser)]
#[command(name = "sdlc")]
#[command(version, about = "SDLC workflow orchestration engine")]
pub struct Cli {
    /// Project root; defaults to the current directory.
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify an issue, drive it through its phase list, and report the
    /// terminal status.
    Run {
        issue_id: String,

        /// Force a specific template instead of the Classifier's pick.
        #[arg(long)]
        template: Option<String>,

        /// Reuse an existing workflow id instead of allocating a new one.
        #[arg(long = "workflow-id")]
        workflow_id: Option<String>,

        /// Resume from the Phase-Completion Tracker instead of starting over.
        #[arg(long)]
        resume: bool,

        /// Skip the Test phase.
        #[arg(long = "skip-e2e")]
        skip_e2e: bool,

        /// Skip the Review phase.
        #[arg(long = "skip-resolution")]
        skip_resolution: bool,

        /// Disable external tool subprocesses (Build/Lint/Test run as
        /// unavailable rather than spawning anything).
        #[arg(long = "no-external")]
        no_external: bool,

        /// Force deprecated-alias resolution to the `complete` template
        /// regardless of `--template`.
        #[arg(long = "forward-to-complete")]
        forward_to_complete: bool,

        /// Issue title, for use without a configured Version Control Host client.
        #[arg(long)]
        title: Option<String>,

        /// Issue body, for use without a configured Version Control Host client.
        #[arg(long)]
        body: Option<String>,

        /// Issue type label (e.g. `bug`, `feature`), used by the Classifier.
        #[arg(long = "type-label")]
        type_label: Option<String>,

        /// Branch the working tree is created from.
        #[arg(long = "base-branch", default_value = "main")]
        base_branch: String,
    },
    /// Run a single dedicated phase executable against a workflow.
    Phase {
        name: String,
        issue_id: String,
        #[arg(long = "workflow-id")]
        workflow_id: Option<String>,
    },
    /// Print a workflow's current state and phase queue.
    Status { workflow_id: String },
    /// Request cooperative cancellation of a running workflow.
    Cancel { workflow_id: String },
    /// Inspect or maintain the Port Pool.
    Ports {
        #[command(subcommand)]
        command: PortsCommands,
    },
    /// Host the inbound Version Control Host webhook surface.
    WebhookServe {
        #[arg(long, default_value = "8787")]
        port: u16,
    },
    /// Inspect or initialize the layered configuration file.
    Config {
        #[command(subcommand)]
        command: Option<cmd::config::ConfigAction>,
    },
}

#[derive(Subcommand)]
pub enum PortsCommands {
    /// List active port allocations.
    List,
    /// Release a workflow's port allocation.
    Release { workflow_id: String },
    /// Remove allocations older than `--max-age-seconds`.
    CleanupStale {
        #[arg(long = "max-age-seconds", default_value = "86400")]
        max_age_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("sdlc_orchestrator=info".parse()?))
        .init();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    match cli.command {
        Commands::Run {
            issue_id,
            template,
            workflow_id,
            resume,
            skip_e2e,
            skip_resolution,
            no_external,
            forward_to_complete,
            title,
            body,
            type_label,
            base_branch,
        } => {
            cmd_run(
                &project_dir,
                &issue_id,
                template,
                workflow_id,
                resume,
                skip_e2e,
                skip_resolution,
                no_external,
                forward_to_complete,
                title,
                body,
                type_label,
                &base_branch,
            )
            .await?;
        }
        Commands::Phase { name, issue_id, workflow_id } => {
            cmd_phase(&project_dir, &name, &issue_id, workflow_id).await?;
        }
        Commands::Status { workflow_id } => cmd_status(&project_dir, &workflow_id)?,
        Commands::Cancel { workflow_id } => cmd_cancel(&project_dir, &workflow_id)?,
        Commands::Ports { command } => match command {
            PortsCommands::List => cmd_ports_list(&project_dir)?,
            PortsCommands::Release { workflow_id } => cmd_ports_release(&project_dir, &workflow_id)?,
            PortsCommands::CleanupStale { max_age_seconds } => cmd_ports_cleanup_stale(&project_dir, max_age_seconds)?,
        },
        Commands::WebhookServe { port } => cmd_webhook_serve(&project_dir, port).await?,
        Commands::Config { command } => cmd_config(&project_dir, command)?,
    }

    Ok(())
}
