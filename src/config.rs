//! Layered configuration for the SDLC orchestration engine.
//!
//! Follows a layered user file → project file → env → CLI flags pattern,
//! collapsed to a single flat struct: one `SdlcConfig` with enumerated
//! options, no phase-override glob tables. Defaults, then an optional
//! user-level `sdlc/sdlc.toml` under the platform config directory, then
//! `.sdlc/sdlc.toml` in the project, then `SDLC_*` environment variables,
//! then CLI flags at the call site.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The single flat configuration struct for the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SdlcConfig {
    pub port_range_start: u16,
    pub port_range_size: u16,
    pub poll_interval_seconds: u64,
    pub phase_timeout_seconds_default: u64,
    pub webhook_dedup_window_seconds: u64,
    pub external_tool_enabled: bool,
    pub stop_on_lint_failure: bool,
    pub observability_endpoint: Option<String>,
    pub llm_quota_threshold: u64,
}

impl Default for SdlcConfig {
    fn default() -> Self {
        Self {
            port_range_start: 9100,
            port_range_size: 100,
            poll_interval_seconds: 2,
            phase_timeout_seconds_default: 600,
            webhook_dedup_window_seconds: 30,
            external_tool_enabled: true,
            stop_on_lint_failure: false,
            observability_endpoint: None,
            llm_quota_threshold: 100,
        }
    }
}

impl SdlcConfig {
    /// Load layered configuration: defaults, then a user-level
    /// `sdlc/sdlc.toml` under the platform config directory (shared
    /// across every project on the machine), then `<project_dir>/.sdlc/sdlc.toml`,
    /// then `SDLC_*` environment overrides. Parse errors in a present file
    /// are propagated at whichever layer they occur — a present-but-broken
    /// config file is not silently ignored.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let mut config = Self::default();
        if let Some(user_path) = user_config_path()
            && user_path.exists()
        {
            config.merge_from_file(&user_path)?;
        }
        let project_path = sdlc_dir(project_dir).join("sdlc.toml");
        if project_path.exists() {
            config.merge_from_file(&project_path)?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse `path` as a full `SdlcConfig`, replacing `self` with it.
    /// A field omitted from the file takes the struct default, not the
    /// previous layer's value — each present file is a complete
    /// configuration, not a sparse patch.
    fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let layer: Self = toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
        *self = layer;
        Ok(())
    }

    /// Overlay `SDLC_*` environment variables on top of file/defaults.
    /// This runs after file load and before any CLI-flag overrides the
    /// caller applies, matching the file → env → CLI layering order.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SDLC_PORT_RANGE_START")
            && let Ok(v) = v.parse()
        {
            self.port_range_start = v;
        }
        if let Ok(v) = std::env::var("SDLC_PORT_RANGE_SIZE")
            && let Ok(v) = v.parse()
        {
            self.port_range_size = v;
        }
        if let Ok(v) = std::env::var("SDLC_POLL_INTERVAL_SECONDS")
            && let Ok(v) = v.parse()
        {
            self.poll_interval_seconds = v;
        }
        if let Ok(v) = std::env::var("SDLC_PHASE_TIMEOUT_SECONDS_DEFAULT")
            && let Ok(v) = v.parse()
        {
            self.phase_timeout_seconds_default = v;
        }
        if let Ok(v) = std::env::var("SDLC_WEBHOOK_DEDUP_WINDOW_SECONDS")
            && let Ok(v) = v.parse()
        {
            self.webhook_dedup_window_seconds = v;
        }
        if let Ok(v) = std::env::var("SDLC_EXTERNAL_TOOL_ENABLED")
            && let Ok(v) = v.parse()
        {
            self.external_tool_enabled = v;
        }
        if let Ok(v) = std::env::var("SDLC_STOP_ON_LINT_FAILURE")
            && let Ok(v) = v.parse()
        {
            self.stop_on_lint_failure = v;
        }
        if let Ok(v) = std::env::var("OBSERVABILITY_SERVER_URL") {
            self.observability_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("SDLC_LLM_QUOTA_THRESHOLD")
            && let Ok(v) = v.parse()
        {
            self.llm_quota_threshold = v;
        }
    }

    /// Write an example `sdlc.toml` (the defaults, commented) for `config init`.
    pub fn write_default(project_dir: &Path) -> Result<PathBuf> {
        let dir = sdlc_dir(project_dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join("sdlc.toml");
        let body = toml::to_string_pretty(&Self::default()).context("failed to serialize default config")?;
        std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn port_range_end(&self) -> u16 {
        self.port_range_start + self.port_range_size
    }
}

/// `<project_dir>/.sdlc`, the directory holding the config file and the
/// on-disk state this binary owns.
pub fn sdlc_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(".sdlc")
}

/// The platform config directory's `sdlc/sdlc.toml`, shared across every
/// project on the machine — `None` on a platform with no defined config
/// directory, in which case only the project-level file and env
/// overrides apply.
fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sdlc").join("sdlc.toml"))
}

/// `<project_dir>/agents/<workflow_id>/` — per-workflow state root
/// (`agents/<workflow_id>/adw_state.json`,
/// `agents/<workflow_id>/completed_phases.json`).
pub fn agent_dir(project_dir: &Path, workflow_id: &str) -> PathBuf {
    project_dir.join("agents").join(workflow_id)
}

/// `<project_dir>/trees/<workflow_id>/` — the isolated working tree root.
pub fn trees_dir(project_dir: &Path, workflow_id: &str) -> PathBuf {
    project_dir.join("trees").join(workflow_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_matches_spec_constants() {
        let config = SdlcConfig::default();
        assert_eq!(config.port_range_start, 9100);
        assert_eq!(config.port_range_size, 100);
        assert_eq!(config.port_range_end(), 9200);
        assert_eq!(config.poll_interval_seconds, 2);
    }

    #[test]
    fn load_falls_back_to_defaults_when_absent() {
        let dir = tempdir().unwrap();
        let config = SdlcConfig::load(dir.path()).unwrap();
        assert_eq!(config, SdlcConfig::default());
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(sdlc_dir(dir.path())).unwrap();
        std::fs::write(
            sdlc_dir(dir.path()).join("sdlc.toml"),
            "poll_interval_seconds = 5\nstop_on_lint_failure = true\n",
        )
        .unwrap();
        let config = SdlcConfig::load(dir.path()).unwrap();
        assert_eq!(config.poll_interval_seconds, 5);
        assert!(config.stop_on_lint_failure);
        // unspecified fields keep their defaults
        assert_eq!(config.port_range_start, 9100);
    }

    #[test]
    fn write_default_round_trips() {
        let dir = tempdir().unwrap();
        let path = SdlcConfig::write_default(dir.path()).unwrap();
        assert!(path.exists());
        let loaded = SdlcConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, SdlcConfig::default());
    }
}
