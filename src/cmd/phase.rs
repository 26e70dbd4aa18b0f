//! `sdlc phase <name> <issue-id>` — run one dedicated phase executable
//! against an existing (or freshly ensured) workflow.

use super::Context;
use crate::registry::PhaseKind;
use anyhow::{Context as _, Result, bail};
use sdlc_common::PhaseStatus;
use std::path::Path;

pub async fn cmd_phase(
    project_dir: &Path,
    phase_name: &str,
    issue_id: &str,
    workflow_id: Option<String>,
) -> Result<()> {
    let phase_kind = PhaseKind::parse(phase_name).with_context(|| format!("unrecognized phase name: {phase_name}"))?;
    let ctx = Context::build(project_dir, false)?;

    let workflow_id = ctx.state_store.ensure(workflow_id, issue_id)?;
    std::fs::create_dir_all(crate::config::trees_dir(project_dir, &workflow_id))?;

    let mut records = ctx.queue.records_for(&workflow_id)?;
    let existing = records.iter().position(|r| r.phase_name == phase_kind.as_str());

    let record = if let Some(idx) = existing {
        records.remove(idx)
    } else {
        let enqueued = ctx.queue.enqueue(&workflow_id, issue_id, &[phase_kind.as_str().to_string()], 0)?;
        enqueued.into_iter().next().expect("enqueue of one name yields one record")
    };

    if record.status != PhaseStatus::Ready {
        bail!("phase {phase_name} is not ready to run (status: {:?})", record.status);
    }

    ctx.coordinator.run_one(record.clone()).await.context("phase execution failed")?;

    let updated = ctx
        .queue
        .records_for(&workflow_id)?
        .into_iter()
        .find(|r| r.queue_id == record.queue_id)
        .context("phase record disappeared after execution")?;

    println!("phase {phase_name} for workflow {workflow_id}: {:?}", updated.status);

    match updated.status {
        PhaseStatus::Completed => Ok(()),
        PhaseStatus::Failed => {
            if updated.error_message.as_deref().is_some_and(|m| m.contains("blocked by safety gate")) {
                std::process::exit(2);
            }
            std::process::exit(1);
        }
        _ => std::process::exit(1),
    }
}
