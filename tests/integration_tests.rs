//! CLI-level integration tests for the `sdlc` workflow orchestration engine.
//!
//! These exercise the binary as a user would invoke it: `assert_cmd`
//! spawns `sdlc` in a temporary project directory and asserts on exit
//! code / stdout / on-disk state, the way a driver for this CLI would.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn sdlc() -> Command {
    cargo_bin_cmd!("sdlc")
}

fn project(dir: &TempDir) -> Command {
    let mut cmd = sdlc();
    cmd.arg("--project-dir").arg(dir.path());
    cmd
}

/// `git init` plus a `main` branch with one commit, so working-tree
/// creation in `sdlc run` has a base branch to checkout.
fn init_git_repo(dir: &Path) {
    let repo = git2::Repository::init(dir).unwrap();
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new("README.md")).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = git2::Signature::now("test", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    let _ = repo.branch("main", &head, false);
}

// =============================================================================
// Basic CLI surface
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn help_lists_every_subcommand() {
        sdlc()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("phase"))
            .stdout(predicate::str::contains("status"))
            .stdout(predicate::str::contains("cancel"))
            .stdout(predicate::str::contains("ports"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn version_prints_something() {
        sdlc().arg("--version").assert().success();
    }

    #[test]
    fn no_subcommand_is_a_usage_error() {
        sdlc().assert().failure();
    }

    #[test]
    fn unknown_subcommand_is_a_usage_error() {
        sdlc().arg("not-a-real-command").assert().failure();
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn config_show_prints_defaults_without_a_project_file() {
        let dir = TempDir::new().unwrap();
        project(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port_range_start = 9100"))
            .stdout(predicate::str::contains("poll_interval_seconds = 2"));
    }

    #[test]
    fn config_init_writes_sdlc_toml() {
        let dir = TempDir::new().unwrap();
        project(&dir).args(["config", "init"]).assert().success();

        let path = dir.path().join(".sdlc").join("sdlc.toml");
        assert!(path.exists());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("port_range_start"));
    }

    #[test]
    fn config_show_reflects_a_project_file_override() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".sdlc")).unwrap();
        std::fs::write(
            dir.path().join(".sdlc/sdlc.toml"),
            "stop_on_lint_failure = true\npoll_interval_seconds = 7\n",
        )
        .unwrap();

        project(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("stop_on_lint_failure = true"))
            .stdout(predicate::str::contains("poll_interval_seconds = 7"));
    }

    #[test]
    fn config_with_no_subcommand_defaults_to_show() {
        let dir = TempDir::new().unwrap();
        project(&dir)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("port_range_start"));
    }
}

// =============================================================================
// Port Pool
// =============================================================================

mod ports {
    use super::*;

    #[test]
    fn ports_list_is_empty_on_a_fresh_project() {
        let dir = TempDir::new().unwrap();
        project(&dir)
            .args(["ports", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("no active port allocations"));
    }

    #[test]
    fn ports_release_on_unknown_workflow_reports_nothing_found() {
        let dir = TempDir::new().unwrap();
        project(&dir)
            .args(["ports", "release", "wf-does-not-exist"])
            .assert()
            .success()
            .stdout(predicate::str::contains("no port allocation found"));
    }

    #[test]
    fn ports_cleanup_stale_on_empty_pool_removes_zero() {
        let dir = TempDir::new().unwrap();
        project(&dir)
            .args(["ports", "cleanup-stale", "--max-age-seconds", "60"])
            .assert()
            .success()
            .stdout(predicate::str::contains("removed 0 stale"));
    }
}

// =============================================================================
// Status / Cancel against unknown workflows
// =============================================================================

mod status_and_cancel {
    use super::*;

    #[test]
    fn status_on_unknown_workflow_fails() {
        let dir = TempDir::new().unwrap();
        project(&dir).args(["status", "wf-does-not-exist"]).assert().failure();
    }

    #[test]
    fn cancel_on_unknown_workflow_fails() {
        let dir = TempDir::new().unwrap();
        project(&dir).args(["cancel", "wf-does-not-exist"]).assert().failure();
    }
}

// =============================================================================
// `sdlc phase` — single-phase execution
// =============================================================================

mod phases {
    use super::*;

    #[test]
    fn phase_with_unrecognized_name_fails_before_touching_disk() {
        let dir = TempDir::new().unwrap();
        project(&dir)
            .args(["phase", "not-a-real-phase", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unrecognized phase name"));

        // no workflow directory should have been created
        assert!(!dir.path().join("agents").exists());
    }

    #[test]
    fn phase_build_without_external_tools_enabled_runs_and_fails_closed() {
        // `SDLC_EXTERNAL_TOOL_ENABLED=false` turns off tool-mode execution;
        // the Build phase (tool-mode) must fail closed rather than hang or
        // panic.
        let dir = TempDir::new().unwrap();
        project(&dir)
            .env("SDLC_EXTERNAL_TOOL_ENABLED", "false")
            .args(["phase", "build", "1"])
            .assert()
            .failure();

        let workflows: Vec<_> = std::fs::read_dir(dir.path().join("agents")).unwrap().collect();
        assert_eq!(workflows.len(), 1, "exactly one workflow directory should be created");
    }
}

// =============================================================================
// `sdlc run` — full workflow drive
// =============================================================================

mod run_command {
    use super::*;

    #[test]
    fn run_without_a_git_repo_fails_during_working_tree_creation() {
        let dir = TempDir::new().unwrap();
        project(&dir)
            .args(["run", "1", "--title", "Fix typo in README", "--body", "docs only"])
            .assert()
            .failure();
    }

    #[test]
    fn run_without_title_body_or_vcs_credentials_fails_fast() {
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        project(&dir)
            .args(["run", "not-numeric"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not numeric"));
    }

    #[test]
    fn run_allocates_a_working_tree_and_ports_before_failing_on_the_agent() {
        // With no `SDLC_AGENT_COMMAND`/`SDLC_LLM_ENDPOINT` configured, Plan
        // (agent-mode) cannot reach a real LLM; the workflow should still
        // get as far as reserving ports and creating the working tree
        // before the phase itself fails.
        let dir = TempDir::new().unwrap();
        init_git_repo(dir.path());
        project(&dir)
            .args(["run", "1", "--title", "Add a small feature", "--body", "details", "--no-external"])
            .assert()
            .failure();

        assert!(dir.path().join(".sdlc/ports.json").exists());
    }
}

// =============================================================================
// Webhook surface wiring (dedup window)
// =============================================================================

mod webhook_wiring {
    use super::*;

    #[test]
    fn webhook_serve_requires_a_secret() {
        let dir = TempDir::new().unwrap();
        project(&dir)
            .env_remove("SDLC_WEBHOOK_SECRET")
            .args(["webhook-serve", "--port", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("SDLC_WEBHOOK_SECRET"));
    }
}
