//! Safety Gate.
//!
//! Invoked before any subprocess spawned on behalf of an agent. Two classes
//! of blocks: destructive filesystem ops, and secret-bearing `.env` file
//! access. A match is a return value (`SafetyVerdict::Blocked`), never a
//! panic or exception; the CLI boundary maps a block to exit code 2,
//! the same exit-code-as-decision convention command hooks use.

use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Allowed,
    Blocked { reason: String },
}

impl SafetyVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, SafetyVerdict::Blocked { .. })
    }
}

/// `tool_input` keys this gate inspects, independent of which field the
/// caller happened to name the argument — tools call it `file_path`,
/// `path`, or embed it in `command`.
#[derive(Debug, Clone, Default)]
pub struct ToolInput {
    pub command: Option<String>,
    pub file_path: Option<String>,
    pub path: Option<String>,
}

impl ToolInput {
    pub fn from_json(value: &serde_json::Value) -> Self {
        let get = |key: &str| value.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());
        Self {
            command: get("command"),
            file_path: get("file_path"),
            path: get("path"),
        }
    }

    fn all_strings(&self) -> Vec<&str> {
        [self.command.as_deref(), self.file_path.as_deref(), self.path.as_deref()]
            .into_iter()
            .flatten()
            .collect()
    }
}

static RM_RECURSIVE: LazyLock<Regex> = LazyLock::new(|| {
    // rm with a recursive+force flag combination, in either flag order,
    // combined (`-rf`/`-fr`/`-Rf`) or separated (`-r -f`) or long-form.
    Regex::new(r"(?i)\brm\b[^\n]*(-rf|-fr|-Rf|-r\s+-f|-f\s+-r|--recursive\s+--force|--force\s+--recursive|-rf\b)")
        .expect("valid regex")
});

const DANGEROUS_PATH_MARKERS: &[&str] = &["~", "$HOME", "..", "*"];

fn has_dangerous_path(text: &str) -> bool {
    // root as a standalone path component: " /" or start-of-string "/"
    // followed by non-alnum or end.
    if text.split_whitespace().any(|tok| tok == "/" || tok.starts_with("/*") || tok == "./*") {
        return true;
    }
    DANGEROUS_PATH_MARKERS.iter().any(|marker| text.contains(marker))
}

const ENV_TEMPLATE_SUFFIXES: &[&str] = &[".env.sample", ".env.example", ".env.template", ".env.defaults"];

fn is_env_access(candidate: &str) -> bool {
    let basename = candidate.rsplit(['/', '\\']).next().unwrap_or(candidate);
    let lower = basename.to_lowercase();
    if !lower.contains(".env") {
        return false;
    }
    !ENV_TEMPLATE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Evaluate `(tool_name, tool_input)` against the blocklist.
pub fn evaluate(tool_name: &str, input: &ToolInput) -> SafetyVerdict {
    if let Some(command) = &input.command
        && RM_RECURSIVE.is_match(command)
        && has_dangerous_path(command)
    {
        return SafetyVerdict::Blocked {
            reason: format!("{tool_name}: destructive recursive remove against a dangerous path: {command}"),
        };
    }

    for candidate in input.all_strings() {
        if is_env_access(candidate) {
            return SafetyVerdict::Blocked {
                reason: format!("{tool_name}: access to secret-bearing file {candidate}"),
            };
        }
    }

    SafetyVerdict::Allowed
}

/// CLI-facing helper: prints the reason to stderr and returns exit code 2
/// on a block, so the calling runtime can treat it as "blocked".
pub fn enforce(tool_name: &str, input: &ToolInput) -> Option<i32> {
    match evaluate(tool_name, input) {
        SafetyVerdict::Allowed => None,
        SafetyVerdict::Blocked { reason } => {
            eprintln!("safety gate blocked: {reason}");
            Some(2)
        }
    }
}
