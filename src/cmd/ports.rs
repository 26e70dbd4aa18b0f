//! `sdlc ports [list|release|cleanup-stale]` — Port Pool inspection and
//! maintenance.

use super::Context;
use anyhow::Result;
use std::path::Path;
use std::time::Duration;

pub fn cmd_ports_list(project_dir: &Path) -> Result<()> {
    let ctx = Context::build(project_dir, false)?;
    let allocations = ctx.port_pool.list()?;
    if allocations.is_empty() {
        println!("no active port allocations");
        return Ok(());
    }
    println!("{:<28} {:<8} {:<8} allocated_at", "workflow_id", "backend", "frontend");
    for (workflow_id, allocation) in allocations {
        println!(
            "{:<28} {:<8} {:<8} {}",
            workflow_id, allocation.backend_port, allocation.frontend_port, allocation.allocated_at
        );
    }
    Ok(())
}

pub fn cmd_ports_release(project_dir: &Path, workflow_id: &str) -> Result<()> {
    let ctx = Context::build(project_dir, false)?;
    let released = ctx.port_pool.release(workflow_id)?;
    if released {
        println!("released port allocation for {workflow_id}");
    } else {
        println!("no port allocation found for {workflow_id}");
    }
    Ok(())
}

pub fn cmd_ports_cleanup_stale(project_dir: &Path, max_age_seconds: u64) -> Result<()> {
    let ctx = Context::build(project_dir, false)?;
    let removed = ctx.port_pool.cleanup_stale(Duration::from_secs(max_age_seconds))?;
    println!("removed {removed} stale port allocation(s) older than {max_age_seconds}s");
    Ok(())
}
