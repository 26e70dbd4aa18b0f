//! Phase Executor.
//!
//! Runs exactly one phase, dispatching on [`crate::registry::PhaseKind::is_tool_mode`]:
//! agent-mode phases call the [`crate::agent_runner::AgentRunner`] with a
//! prompt; tool-mode phases (Build, Lint, Test) spawn a scoped external
//! tool subprocess, enforce a per-tool timeout, and parse its stdout
//! against the tool-output schema. Every tool-mode subprocess passes
//! through the Safety Gate first; a block aborts only that spawn.

use crate::agent_runner::AgentRunner;
use crate::ratelimit::{ApiBackend, RateLimitGuard};
use crate::registry::PhaseKind;
use crate::safety::{self, ToolInput};
use chrono::Utc;
use sdlc_common::{CoreError, PhaseResult, Severity, ToolCallRecord, ToolError};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

/// What a tool-mode phase spawns: `phase_data` must deserialize into this
/// for Build/Lint/Test.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ToolInvocation {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

pub struct PhaseExecutor {
    agent_runner: Arc<dyn AgentRunner>,
    external_tool_enabled: bool,
    rate_limit_guard: Option<Arc<RateLimitGuard>>,
    llm_quota_threshold: u64,
}

/// Everything the Executor needs back besides the PhaseResult itself —
/// the tool-call ledger for the enclosing phase, flushed to the
/// Observability Emitter by the caller on phase completion.
pub struct ExecutionOutcome {
    pub result: PhaseResult,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl PhaseExecutor {
    pub fn new(agent_runner: Arc<dyn AgentRunner>, external_tool_enabled: bool) -> Self {
        Self {
            agent_runner,
            external_tool_enabled,
            rate_limit_guard: None,
            llm_quota_threshold: 0,
        }
    }

    /// Gate every agent-mode phase behind a Rate-Limit Guard probe of the
    /// remote LLM backend before spending any compute on it.
    pub fn with_rate_limit_guard(mut self, guard: Arc<RateLimitGuard>, llm_quota_threshold: u64) -> Self {
        self.rate_limit_guard = Some(guard);
        self.llm_quota_threshold = llm_quota_threshold;
        self
    }

    /// Run `phase` with `phase_data` (agent prompt payload, or tool
    /// invocation spec) rooted at `working_dir`. `working_dir` is
    /// mandatory for every worktree-aware phase.
    pub async fn execute(
        &self,
        phase: PhaseKind,
        phase_data: &serde_json::Value,
        working_dir: &Path,
        prompt: &str,
    ) -> Result<ExecutionOutcome, CoreError> {
        if phase.is_tool_mode() {
            self.run_tool_phase(phase, phase_data, working_dir).await
        } else {
            self.run_agent_phase(phase, working_dir, prompt).await
        }
    }

    async fn run_agent_phase(
        &self,
        phase: PhaseKind,
        working_dir: &Path,
        prompt: &str,
    ) -> Result<ExecutionOutcome, CoreError> {
        if let Some(guard) = &self.rate_limit_guard {
            guard.ensure_rate_limit_available(ApiBackend::Llm, self.llm_quota_threshold).await?;
        }

        let started = Instant::now();
        let started_at = Utc::now();
        let outcome = self.agent_runner.run_prompt(working_dir, prompt).await?;
        let duration = started.elapsed();

        let mut summary = HashMap::new();
        summary.insert("text".to_string(), serde_json::Value::String(outcome.summary.clone()));

        let result = PhaseResult {
            phase_name: phase.as_str().to_string(),
            success: outcome.success,
            summary,
            errors: Vec::new(),
            next_steps: Vec::new(),
            duration_seconds: duration.as_secs_f64(),
            tokens_used: outcome.tokens_used,
            cost_usd: outcome.cost_usd,
        };

        let tool_call = ToolCallRecord {
            tool_name: format!("agent:{phase}"),
            args: vec![],
            started_at,
            duration_ms: duration.as_millis() as u64,
            success: outcome.success,
        };

        Ok(ExecutionOutcome {
            result,
            tool_calls: vec![tool_call],
        })
    }

    async fn run_tool_phase(
        &self,
        phase: PhaseKind,
        phase_data: &serde_json::Value,
        working_dir: &Path,
    ) -> Result<ExecutionOutcome, CoreError> {
        if !self.external_tool_enabled {
            return Err(CoreError::ToolFailure(format!(
                "external tools are disabled; cannot run tool-mode phase {phase}"
            )));
        }

        let invocation: ToolInvocation = serde_json::from_value(phase_data.clone())
            .map_err(|e| CoreError::SchemaMismatch(format!("invalid tool invocation for {phase}: {e}")))?;

        let rendered_command = format!("{} {}", invocation.command, invocation.args.join(" "));
        let safety_input = ToolInput {
            command: Some(rendered_command.clone()),
            file_path: None,
            path: None,
        };
        if let safety::SafetyVerdict::Blocked { reason } = safety::evaluate(&invocation.command, &safety_input) {
            return Err(CoreError::SafetyBlocked(reason));
        }

        let phase_timeout = invocation
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| phase.default_timeout());

        let started_at = Utc::now();
        let started = Instant::now();

        let mut cmd = Command::new(&invocation.command);
        cmd.args(&invocation.args)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| CoreError::ToolFailure(format!("failed to spawn {}: {e}", invocation.command)))?;

        let output = match timeout(phase_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(CoreError::ToolFailure(format!("tool process wait failed: {e}"))),
            Err(_) => return Err(CoreError::Timeout(phase_timeout)),
        };

        let duration = started.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        let tool_call = ToolCallRecord {
            tool_name: invocation.command.clone(),
            args: invocation.args.clone(),
            started_at,
            duration_ms: duration.as_millis() as u64,
            success: output.status.success(),
        };

        let result = Self::parse_tool_output(phase, &stdout, duration)?;

        Ok(ExecutionOutcome {
            result,
            tool_calls: vec![tool_call],
        })
    }

    /// Parse the tool-output schema:
    /// `{ success, summary: {...}, errors|failures: [...], next_steps: [...] }`.
    fn parse_tool_output(phase: PhaseKind, stdout: &str, duration: Duration) -> Result<PhaseResult, CoreError> {
        let json = crate::util::extract_json_object(stdout)
            .ok_or_else(|| CoreError::SchemaMismatch(format!("{phase}: tool produced no JSON object on stdout")))?;
        let parsed: serde_json::Value = serde_json::from_str(&json)
            .map_err(|e| CoreError::SchemaMismatch(format!("{phase}: invalid tool output JSON: {e}")))?;

        let success = parsed
            .get("success")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| CoreError::SchemaMismatch(format!("{phase}: tool output missing `success`")))?;

        let summary: HashMap<String, serde_json::Value> = parsed
            .get("summary")
            .and_then(|v| v.as_object())
            .map(|obj| obj.clone().into_iter().collect())
            .unwrap_or_default();

        let errors_value = parsed.get("errors").or_else(|| parsed.get("failures"));
        let errors = errors_value
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| {
                        let file = entry.get("file")?.as_str()?.to_string();
                        let line = entry.get("line")?.as_u64()? as u32;
                        let column = entry.get("column").and_then(|v| v.as_u64()).map(|v| v as u32);
                        let kind = entry
                            .get("kind")
                            .or_else(|| entry.get("rule"))
                            .or_else(|| entry.get("error_type"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("unknown")
                            .to_string();
                        let severity = match entry.get("severity").and_then(|v| v.as_str()) {
                            Some("warning") => Severity::Warning,
                            _ => Severity::Error,
                        };
                        let message = entry.get("message").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        let fixable = entry.get("fixable").and_then(|v| v.as_bool());
                        Some(ToolError {
                            file,
                            line,
                            column,
                            kind,
                            severity,
                            message,
                            fixable,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let next_steps = parsed
            .get("next_steps")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let duration_seconds = summary
            .get("duration_seconds")
            .and_then(|v| v.as_f64())
            .unwrap_or(duration.as_secs_f64());

        Ok(PhaseResult {
            phase_name: phase.as_str().to_string(),
            success,
            summary,
            errors,
            next_steps,
            duration_seconds,
            tokens_used: None,
            cost_usd: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::TestStubRunner;
    use tempfile::tempdir;

    #[tokio::test]
    async fn agent_phase_uses_agent_runner() {
        let runner = Arc::new(TestStubRunner::succeeding("plan drafted"));
        let executor = PhaseExecutor::new(runner, true);
        let dir = tempdir().unwrap();
        let outcome = executor
            .execute(PhaseKind::Plan, &serde_json::json!({}), dir.path(), "write a plan")
            .await
            .unwrap();
        assert!(outcome.result.success);
        assert_eq!(outcome.result.phase_name, "plan");
        assert_eq!(outcome.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn tool_phase_rejects_disabled_external_tools() {
        let runner = Arc::new(TestStubRunner::succeeding("n/a"));
        let executor = PhaseExecutor::new(runner, false);
        let dir = tempdir().unwrap();
        let err = executor
            .execute(PhaseKind::Build, &serde_json::json!({"command": "true"}), dir.path(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolFailure(_)));
    }

    #[tokio::test]
    async fn tool_phase_blocks_dangerous_command_via_safety_gate() {
        let runner = Arc::new(TestStubRunner::succeeding("n/a"));
        let executor = PhaseExecutor::new(runner, true);
        let dir = tempdir().unwrap();
        let err = executor
            .execute(
                PhaseKind::Build,
                &serde_json::json!({"command": "rm", "args": ["-rf", "/"]}),
                dir.path(),
                "",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SafetyBlocked(_)));
    }

    #[tokio::test]
    async fn tool_phase_parses_success_json_from_stdout() {
        let runner = Arc::new(TestStubRunner::succeeding("n/a"));
        let executor = PhaseExecutor::new(runner, true);
        let dir = tempdir().unwrap();
        let script = dir.path().join("tool.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"success\": true, \"summary\": {\"duration_seconds\": 1.5}, \"errors\": [], \"next_steps\": []}'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let outcome = executor
            .execute(
                PhaseKind::Test,
                &serde_json::json!({"command": "sh", "args": [script.to_string_lossy()]}),
                dir.path(),
                "",
            )
            .await
            .unwrap();
        assert!(outcome.result.success);
        assert_eq!(outcome.result.duration_seconds, 1.5);
    }

    #[tokio::test]
    async fn agent_phase_without_guard_configured_is_not_gated() {
        let runner = Arc::new(TestStubRunner::succeeding("plan drafted"));
        let executor = PhaseExecutor::new(runner, true).with_rate_limit_guard(Arc::new(RateLimitGuard::new(None, None, None)), 10);
        let dir = tempdir().unwrap();
        let outcome = executor
            .execute(PhaseKind::Plan, &serde_json::json!({}), dir.path(), "write a plan")
            .await
            .unwrap();
        assert!(outcome.result.success, "an unreachable probe must not block the phase");
    }

    #[tokio::test]
    async fn tool_phase_reports_schema_mismatch_on_non_json_stdout() {
        let runner = Arc::new(TestStubRunner::succeeding("n/a"));
        let executor = PhaseExecutor::new(runner, true);
        let dir = tempdir().unwrap();
        let err = executor
            .execute(
                PhaseKind::Lint,
                &serde_json::json!({"command": "echo", "args": ["not json"]}),
                dir.path(),
                "",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SchemaMismatch(_)));
    }
}
