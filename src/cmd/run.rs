//! `sdlc run <issue-id>` — drive one workflow from classification to a
//! terminal state.

use super::Context;
use crate::orchestrator::{IssueInput, RunOptions};
use anyhow::{Context as _, Result};
use std::path::Path;

#[allow(clippy::too_many_arguments)]
pub async fn cmd_run(
    project_dir: &Path,
    issue_id: &str,
    template: Option<String>,
    workflow_id: Option<String>,
    resume: bool,
    skip_e2e: bool,
    skip_resolution: bool,
    no_external: bool,
    forward_to_complete: bool,
    title: Option<String>,
    body: Option<String>,
    type_label: Option<String>,
    base_branch: &str,
) -> Result<()> {
    let ctx = Context::build(project_dir, no_external)?;
    let orchestrator = ctx.orchestrator();

    let (title, body) = match (title, body) {
        (Some(title), Some(body)) => (title, body),
        (title, body) => {
            let issue_number: i64 = issue_id
                .parse()
                .with_context(|| format!("issue id {issue_id} is not numeric and no --title/--body were given"))?;
            let vcs = ctx
                .vcs
                .as_ref()
                .context("no --title/--body given and SDLC_VCS_TOKEN/SDLC_VCS_REPO are not set")?;
            let issue = vcs.read_issue(issue_number).await.context("failed to read issue from version control host")?;
            (title.unwrap_or(issue.title), body.unwrap_or_else(|| issue.body.unwrap_or_default()))
        }
    };

    let template_override = if forward_to_complete { Some("complete".to_string()) } else { template };

    let status = orchestrator
        .run(
            IssueInput {
                issue_id,
                title: &title,
                body: &body,
                type_label: type_label.as_deref(),
                base_branch,
            },
            RunOptions {
                template_override,
                workflow_id,
                resume,
                skip_e2e,
                skip_resolution,
            },
        )
        .await
        .context("workflow run failed")?;

    println!("workflow for issue {issue_id} finished with status: {status}");
    if status == sdlc_common::WorkflowStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}
