//! `sdlc cancel <workflow-id>` — request cooperative cancellation.

use super::Context;
use anyhow::Result;
use std::path::Path;

pub fn cmd_cancel(project_dir: &Path, workflow_id: &str) -> Result<()> {
    let ctx = Context::build(project_dir, false)?;
    ctx.orchestrator().cancel(workflow_id)?;
    println!("cancellation requested for workflow {workflow_id}");
    Ok(())
}
