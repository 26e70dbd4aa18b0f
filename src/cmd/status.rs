//! `sdlc status <workflow-id>` — print a workflow's current state and its
//! phase queue.

use super::Context;
use anyhow::{Context as _, Result};
use std::path::Path;

pub fn cmd_status(project_dir: &Path, workflow_id: &str) -> Result<()> {
    let ctx = Context::build(project_dir, false)?;
    let state = ctx.state_store.load(workflow_id).context("failed to load workflow state")?;
    let records = ctx.queue.records_for(workflow_id)?;

    println!("workflow:     {workflow_id}");
    println!("issue:        {}", state.issue_id);
    println!("template:     {}", state.template_name);
    if let Some(from) = &state.template_deprecated_from {
        println!("  (forwarded from deprecated alias: {from})");
    }
    println!("status:       {}", state.status);
    println!("current:      {}", state.current_phase.as_deref().unwrap_or("-"));
    println!("started:      {}", state.start_time);
    println!("ended:        {}", state.end_time.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()));
    println!();
    println!("{:<6} {:<12} {:<10}", "#", "phase", "status");
    for record in &records {
        println!("{:<6} {:<12} {:?}", record.phase_number, record.phase_name, record.status);
    }
    Ok(())
}
