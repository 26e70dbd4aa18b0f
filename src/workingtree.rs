//! Working-Tree Manager.
//!
//! Creates an isolated checkout rooted at `trees/<workflow_id>/` from a
//! base branch using `git2`'s native worktree support (`Repository::worktree`,
//! `WorktreeAddOptions`), seeds a per-worktree environment file binding
//! the allocated ports, and tears the worktree down on Cleanup.

use crate::config::trees_dir;
use crate::errors::WorkingTreeError;
use git2::{Repository, WorktreeAddOptions};
use std::path::{Path, PathBuf};

pub struct WorkingTreeManager {
    project_dir: PathBuf,
}

impl WorkingTreeManager {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    /// Create `trees/<workflow_id>/` as a git worktree branched from
    /// `base_branch`. Fails if the path already exists or the base branch
    /// is missing.
    pub fn create(&self, workflow_id: &str, base_branch: &str) -> Result<PathBuf, WorkingTreeError> {
        let path = trees_dir(&self.project_dir, workflow_id);
        if path.exists() {
            return Err(WorkingTreeError::AlreadyExists(workflow_id.to_string()));
        }
        let repo = Repository::open(&self.project_dir)?;

        let base_ref = repo
            .find_branch(base_branch, git2::BranchType::Local)
            .map_err(|_| WorkingTreeError::BaseBranchMissing(base_branch.to_string()))?;
        let base_commit = base_ref.get().peel_to_commit()?;

        let branch_name = format!("workflow/{workflow_id}");
        let new_branch = repo.branch(&branch_name, &base_commit, false)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(new_branch.get()));
        repo.worktree(workflow_id, &path, Some(&opts))?;

        Ok(path)
    }

    /// Write `KEY=VALUE` lines binding the allocated ports plus derived
    /// URLs.
    pub fn configure_env(&self, path: &Path, backend: u16, frontend: u16) -> Result<PathBuf, WorkingTreeError> {
        let env_path = path.join(".env.sdlc");
        let contents = format!(
            "BACKEND_PORT={backend}\nFRONTEND_PORT={frontend}\nVITE_BACKEND_URL=http://localhost:{backend}\n"
        );
        std::fs::write(&env_path, contents)?;
        Ok(env_path)
    }

    /// Remove the worktree and release its branch lock. Idempotent: a
    /// missing worktree is not an error — Cleanup may run twice.
    pub fn teardown(&self, workflow_id: &str) -> Result<(), WorkingTreeError> {
        let path = trees_dir(&self.project_dir, workflow_id);
        let repo = Repository::open(&self.project_dir)?;

        if let Ok(mut wt) = repo.find_worktree(workflow_id) {
            // pruning removes git's worktree administrative files; we then
            // remove the checkout directory itself.
            let mut prune_opts = git2::WorktreePruneOptions::new();
            prune_opts.valid(true).working_tree(true);
            wt.prune(Some(&mut prune_opts))?;
        }
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }

        let branch_name = format!("workflow/{workflow_id}");
        if let Ok(mut branch) = repo.find_branch(&branch_name, git2::BranchType::Local) {
            let _ = branch.delete();
        }

        Ok(())
    }
}
