//! Agent Runner capability.
//!
//! The Agent Runner is an external collaborator: something that executes a
//! prompt inside a working tree and returns structured output, cost, and a
//! success flag. The Phase Executor only ever depends on the
//! [`AgentRunner`] trait, never on a concrete process; three
//! implementations exist: a local subprocess runner (spawns the
//! configured CLI and pipes the prompt over stdin/stdout), a remote-LLM
//! HTTP runner, and an in-memory test stub used by the integration tests.

use async_trait::async_trait;
use sdlc_common::CoreError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// The result of one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub summary: String,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run `prompt` with `working_dir` as the process's current directory.
    /// `working_dir` is mandatory: Ownership discipline requires the
    /// Executor to pass it on every call.
    async fn run_prompt(&self, working_dir: &Path, prompt: &str) -> Result<AgentOutcome, CoreError>;
}

/// Spawns the configured local CLI binary (e.g. a `claude` command),
/// writes the prompt to its stdin, and parses the final JSON object from
/// its stdout.
pub struct LocalSubprocessRunner {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl LocalSubprocessRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl AgentRunner for LocalSubprocessRunner {
    async fn run_prompt(&self, working_dir: &Path, prompt: &str) -> Result<AgentOutcome, CoreError> {
        if !working_dir.is_dir() {
            return Err(CoreError::AgentFailure(format!(
                "working_dir {} does not exist",
                working_dir.display()
            )));
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| CoreError::AgentFailure(format!("failed to spawn {}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| CoreError::AgentFailure(format!("failed to write prompt to stdin: {e}")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| CoreError::AgentFailure(format!("failed to close stdin: {e}")))?;
        }

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CoreError::Timeout(self.timeout))?
            .map_err(|e| CoreError::AgentFailure(format!("agent process wait failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(CoreError::AgentFailure(format!(
                "agent exited with {:?}: {stderr}",
                output.status.code()
            )));
        }

        let (tokens_used, cost_usd) = crate::util::extract_json_object(&stdout)
            .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
            .map(|parsed| {
                let tokens = parsed.get("tokens_used").and_then(|v| v.as_u64());
                let cost = parsed.get("cost_usd").and_then(|v| v.as_f64());
                (tokens, cost)
            })
            .unwrap_or((None, None));

        Ok(AgentOutcome {
            success: true,
            summary: stdout,
            tokens_used,
            cost_usd,
        })
    }
}

/// Calls a remote LLM HTTP endpoint directly instead of a local binary —
/// used when no local agent CLI is installed on the host running the
/// Coordinator.
pub struct RemoteLlmRunner {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl RemoteLlmRunner {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(1800))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AgentRunner for RemoteLlmRunner {
    async fn run_prompt(&self, working_dir: &Path, prompt: &str) -> Result<AgentOutcome, CoreError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "working_dir": working_dir.display().to_string(),
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::AgentFailure(format!("remote agent call failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(CoreError::AgentFailure(format!(
                "remote agent returned status {}",
                resp.status()
            )));
        }
        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::SchemaMismatch(format!("remote agent response not JSON: {e}")))?;
        Ok(AgentOutcome {
            success: parsed.get("success").and_then(|v| v.as_bool()).unwrap_or(true),
            summary: parsed
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            tokens_used: parsed.get("tokens_used").and_then(|v| v.as_u64()),
            cost_usd: parsed.get("cost_usd").and_then(|v| v.as_f64()),
        })
    }
}

/// Deterministic stub for tests: records every call and returns a
/// pre-configured outcome.
pub struct TestStubRunner {
    pub outcome: AgentOutcome,
    pub calls: std::sync::Mutex<Vec<(PathBuf, String)>>,
}

impl TestStubRunner {
    pub fn succeeding(summary: impl Into<String>) -> Self {
        Self {
            outcome: AgentOutcome {
                success: true,
                summary: summary.into(),
                tokens_used: Some(100),
                cost_usd: Some(0.05),
            },
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing(summary: impl Into<String>) -> Self {
        Self {
            outcome: AgentOutcome {
                success: false,
                summary: summary.into(),
                tokens_used: Some(50),
                cost_usd: Some(0.02),
            },
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AgentRunner for TestStubRunner {
    async fn run_prompt(&self, working_dir: &Path, prompt: &str) -> Result<AgentOutcome, CoreError> {
        self.calls
            .lock()
            .unwrap()
            .push((working_dir.to_path_buf(), prompt.to_string()));
        Ok(self.outcome.clone())
    }
}
