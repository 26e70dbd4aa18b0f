//! Phase registry: static, ordered phase dispatch.
//!
//! Replaces filename-based phase dispatch with a static, ordered list of
//! tagged variants plus a map from variant to `(executable, timeout,
//! softness)`. Templates name an ordered phase list; deprecated template
//! names forward to a current one via a static alias table rather than
//! being removed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Plan,
    Validate,
    Build,
    Lint,
    Test,
    Review,
    Document,
    Ship,
    Cleanup,
    Verify,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 10] = [
        PhaseKind::Plan,
        PhaseKind::Validate,
        PhaseKind::Build,
        PhaseKind::Lint,
        PhaseKind::Test,
        PhaseKind::Review,
        PhaseKind::Document,
        PhaseKind::Ship,
        PhaseKind::Cleanup,
        PhaseKind::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Plan => "plan",
            PhaseKind::Validate => "validate",
            PhaseKind::Build => "build",
            PhaseKind::Lint => "lint",
            PhaseKind::Test => "test",
            PhaseKind::Review => "review",
            PhaseKind::Document => "document",
            PhaseKind::Ship => "ship",
            PhaseKind::Cleanup => "cleanup",
            PhaseKind::Verify => "verify",
        }
    }

    /// Dedicated executable name for the CLI's phase-per-executable
    /// contract: `sdlc phase <name>` shells out to
    /// `sdlc-phase-<name>` conceptually; here it dispatches in-process via
    /// [`crate::executor::PhaseExecutor`], but the naming mirrors the
    /// contract a real dedicated-binary layout would expose.
    pub fn executable_name(&self) -> String {
        format!("sdlc-phase-{}", self.as_str())
    }

    /// Only Lint is soft: its failure does not fail the workflow.
    pub fn is_soft(&self) -> bool {
        matches!(self, PhaseKind::Lint)
    }

    /// Default timeout (build 10 min, test 10 min, agent 30 min);
    /// phases not explicitly called out default to the agent budget
    /// since Plan/Validate/Review/Document/Ship/Cleanup/Verify are agent-mode.
    pub fn default_timeout(&self) -> Duration {
        match self {
            PhaseKind::Build => Duration::from_secs(600),
            PhaseKind::Test => Duration::from_secs(600),
            _ => Duration::from_secs(1800),
        }
    }

    /// Tool-mode phases invoke an External Tool subprocess; agent-mode
    /// phases invoke the Agent Runner.
    pub fn is_tool_mode(&self) -> bool {
        matches!(self, PhaseKind::Build | PhaseKind::Lint | PhaseKind::Test)
    }

    pub fn parse(name: &str) -> Option<PhaseKind> {
        PhaseKind::ALL.into_iter().find(|p| p.as_str().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// `complete` runs all ten phases; `lightweight` omits Lint, Test, Review,
/// Document, Cleanup, Verify.
pub fn phases_for_template(template_name: &str) -> Vec<PhaseKind> {
    let resolved = resolve_template_alias(template_name);
    match resolved.as_str() {
        "lightweight" => vec![
            PhaseKind::Plan,
            PhaseKind::Validate,
            PhaseKind::Build,
            PhaseKind::Ship,
        ],
        _ => PhaseKind::ALL.to_vec(),
    }
}

/// Static alias table for deprecated template names, resolved transparently.
/// Returns the canonical name unchanged if it is not an alias.
pub fn resolve_template_alias(template_name: &str) -> String {
    match template_name {
        "adw_plan_build" | "plan_build" => "complete".to_string(),
        "quick" | "adw_patch" => "lightweight".to_string(),
        other => other.to_string(),
    }
}

/// Whether `template_name` is a deprecated alias (used to populate
/// `WorkflowState.template_deprecated_from`).
pub fn is_deprecated_alias(template_name: &str) -> bool {
    resolve_template_alias(template_name) != template_name
}

/// The `phase_data` a freshly enqueued record gets for `phase`: `Null` for
/// agent-mode phases, a [`crate::executor::ToolInvocation`] for tool-mode
/// ones. `SDLC_<PHASE>_COMMAND`/`SDLC_<PHASE>_ARGS` (e.g.
/// `SDLC_BUILD_COMMAND`) point this at a real build/lint/test runner;
/// absent that, falls back to a portable stub that reports success so a
/// workflow is never blocked for want of a configured tool.
pub fn default_phase_data(phase: PhaseKind) -> serde_json::Value {
    let (command_var, args_var) = match phase {
        PhaseKind::Build => ("SDLC_BUILD_COMMAND", "SDLC_BUILD_ARGS"),
        PhaseKind::Lint => ("SDLC_LINT_COMMAND", "SDLC_LINT_ARGS"),
        PhaseKind::Test => ("SDLC_TEST_COMMAND", "SDLC_TEST_ARGS"),
        _ => return serde_json::Value::Null,
    };

    if let Ok(command) = std::env::var(command_var) {
        let args: Vec<String> = std::env::var(args_var)
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        return serde_json::json!({ "command": command, "args": args });
    }

    let stub_output = format!(
        "{{\"success\": true, \"summary\": {{}}, \"errors\": [], \"next_steps\": \
         [\"configure {command_var} to run a real {phase} tool\"]}}"
    );
    // `echo` spawned directly (no shell) so the JSON payload needs no
    // quoting; it becomes a single literal argv entry.
    serde_json::json!({ "command": "echo", "args": [stub_output] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_template_has_all_ten_phases() {
        let phases = phases_for_template("complete");
        assert_eq!(phases.len(), 10);
        assert_eq!(phases[0], PhaseKind::Plan);
        assert_eq!(phases[9], PhaseKind::Verify);
    }

    #[test]
    fn lightweight_template_omits_four_phases() {
        let phases = phases_for_template("lightweight");
        assert_eq!(phases, vec![PhaseKind::Plan, PhaseKind::Validate, PhaseKind::Build, PhaseKind::Ship]);
        assert!(!phases.contains(&PhaseKind::Lint));
        assert!(!phases.contains(&PhaseKind::Review));
        assert!(!phases.contains(&PhaseKind::Document));
        assert!(!phases.contains(&PhaseKind::Cleanup));
        assert!(!phases.contains(&PhaseKind::Verify));
    }

    #[test]
    fn only_lint_is_soft() {
        for phase in PhaseKind::ALL {
            assert_eq!(phase.is_soft(), phase == PhaseKind::Lint);
        }
    }

    #[test]
    fn deprecated_template_forwards_to_complete() {
        assert_eq!(resolve_template_alias("adw_plan_build"), "complete");
        assert!(is_deprecated_alias("adw_plan_build"));
        assert!(!is_deprecated_alias("complete"));
    }

    #[test]
    fn parse_roundtrips_as_str() {
        for phase in PhaseKind::ALL {
            assert_eq!(PhaseKind::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(PhaseKind::parse("nonsense"), None);
    }

    #[test]
    fn agent_mode_phases_get_null_phase_data() {
        assert_eq!(default_phase_data(PhaseKind::Plan), serde_json::Value::Null);
        assert_eq!(default_phase_data(PhaseKind::Ship), serde_json::Value::Null);
    }

    #[test]
    fn tool_mode_phases_get_a_runnable_stub_invocation_absent_env_config() {
        // Other tests in this binary enqueue Build/Lint/Test phases and rely
        // on the same env-var-absent stub path, so this does not set/unset
        // `SDLC_*_COMMAND` itself — doing so would race those tests.
        for phase in [PhaseKind::Build, PhaseKind::Lint, PhaseKind::Test] {
            let data = default_phase_data(phase);
            if std::env::var(match phase {
                PhaseKind::Build => "SDLC_BUILD_COMMAND",
                PhaseKind::Lint => "SDLC_LINT_COMMAND",
                _ => "SDLC_TEST_COMMAND",
            })
            .is_err()
            {
                assert_eq!(data["command"], serde_json::json!("echo"));
            }
            assert!(data["args"].as_array().is_some());
        }
    }
}
