//! Version Control Host client.
//!
//! The core speaks only four operations against the Version Control
//! Host's REST surface: create a pull request, post a comment, read
//! issue state, and read labels. Follows a plain REST client idiom
//! (bearer auth, `reqwest`, `anyhow::Context` for human-facing errors).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "sdlc-orchestrator";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueState {
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub labels: Vec<String>,
}

pub struct VcsClient {
    client: reqwest::Client,
    token: String,
    owner_repo: String,
}

impl VcsClient {
    pub fn new(token: impl Into<String>, owner_repo: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            owner_repo: owner_repo.into(),
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    /// Read an issue's current state and labels.
    pub async fn read_issue(&self, issue_number: i64) -> Result<IssueState> {
        #[derive(Deserialize)]
        struct RawIssue {
            number: i64,
            title: String,
            body: Option<String>,
            state: String,
            labels: Vec<RawLabel>,
        }
        #[derive(Deserialize)]
        struct RawLabel {
            name: String,
        }

        let url = format!("{API_BASE}/repos/{}/issues/{issue_number}", self.owner_repo);
        let raw: RawIssue = self
            .authed(self.client.get(&url))
            .send()
            .await
            .context("failed to send issue read request")?
            .error_for_status()
            .context("version control host returned an error status reading the issue")?
            .json()
            .await
            .context("failed to parse issue response")?;

        Ok(IssueState {
            number: raw.number,
            title: raw.title,
            body: raw.body,
            state: raw.state,
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
        })
    }

    /// Labels attached to an issue, as plain names.
    pub async fn read_labels(&self, issue_number: i64) -> Result<Vec<String>> {
        Ok(self.read_issue(issue_number).await?.labels)
    }

    /// Post a comment on an issue or pull request (GitHub treats both as
    /// "issues" for commenting purposes).
    pub async fn post_comment(&self, issue_number: i64, body: &str) -> Result<()> {
        let url = format!("{API_BASE}/repos/{}/issues/{issue_number}/comments", self.owner_repo);
        self.authed(self.client.post(&url))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .context("failed to send comment")?
            .error_for_status()
            .context("version control host returned an error status posting the comment")?;
        Ok(())
    }

    /// Create a pull request from `head` into `base`.
    pub async fn create_pull_request(&self, title: &str, head: &str, base: &str, body: &str) -> Result<i64> {
        #[derive(Deserialize)]
        struct CreatedPr {
            number: i64,
        }
        let url = format!("{API_BASE}/repos/{}/pulls", self.owner_repo);
        let created: CreatedPr = self
            .authed(self.client.post(&url))
            .json(&serde_json::json!({
                "title": title,
                "head": head,
                "base": base,
                "body": body,
            }))
            .send()
            .await
            .context("failed to send pull request creation")?
            .error_for_status()
            .context("version control host returned an error status creating the pull request")?
            .json()
            .await
            .context("failed to parse pull request creation response")?;
        Ok(created.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_state_round_trips() {
        let state = IssueState {
            number: 42,
            title: "Add a thing".to_string(),
            body: Some("details".to_string()),
            state: "open".to_string(),
            labels: vec!["bug".to_string()],
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: IssueState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.number, 42);
        assert_eq!(back.labels, vec!["bug".to_string()]);
    }
}
