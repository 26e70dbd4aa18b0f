//! Classifier & Cost Estimator.
//!
//! Pure-text heuristic over issue title + body + type label: no external
//! calls, deterministic, cached per issue id. Keyword families push a
//! running score up or down; the final bucket picks a complexity level, a
//! cost range, and a template name.

use sdlc_common::ComplexityLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostRange {
    pub min_usd: f64,
    pub max_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub level: ComplexityLevel,
    pub confidence: f64,
    pub cost_range: CostRange,
    pub template_name: String,
}

/// Determine the `{feature,bug,chore,patch}` category — a
/// different axis than `level`: this feeds `WorkflowState.classification`
/// and the `branch_name` prefix, while `level`/`template_name` pick the
/// phase list. Derived from the issue's type label when present, else from
/// title/body keywords.
pub fn category_for(
    title: &str,
    body: &str,
    type_label: Option<&str>,
) -> sdlc_common::Classification {
    use sdlc_common::Classification::*;
    if let Some(label) = type_label {
        let lower = label.to_lowercase();
        if lower.contains("bug") || lower.contains("fix") {
            return Bug;
        }
        if lower.contains("chore") || lower.contains("maintenance") {
            return Chore;
        }
        if lower.contains("patch") || lower.contains("hotfix") {
            return Patch;
        }
        if lower.contains("feature") || lower.contains("enhancement") {
            return Feature;
        }
    }
    let combined = format!("{title} {body}").to_lowercase();
    if combined.contains("fix") || combined.contains("bug") || combined.contains("broken") {
        Bug
    } else if combined.contains("hotfix") || combined.contains("patch") {
        Patch
    } else if combined.contains("chore")
        || combined.contains("cleanup")
        || combined.contains("typo")
        || combined.contains("readme")
    {
        Chore
    } else {
        Feature
    }
}

/// `(keyword, score delta)`. Families are grouped only for readability;
/// the algorithm just sums every match.
const DOWNWARD_KEYWORDS: &[(&str, i32)] = &[
    ("typo", -2),
    ("docs only", -2),
    ("documentation only", -2),
    ("readme", -1),
    ("ui only", -1),
    ("ui-only", -1),
    ("css", -1),
    ("style tweak", -1),
    ("single file", -1),
    ("single-file", -1),
    ("simple", -2),
    ("trivial", -2),
    ("minor", -1),
];

const UPWARD_KEYWORDS: &[(&str, i32)] = &[
    ("full stack", 2),
    ("full-stack", 2),
    ("database", 2),
    ("migration", 2),
    ("schema change", 2),
    ("security", 3),
    ("authentication", 2),
    ("authorization", 2),
    ("external integration", 2),
    ("third-party", 2),
    ("third party", 2),
    ("multi-component", 2),
    ("multiple services", 2),
    ("ci pipeline", 2),
    ("ci/cd", 2),
    ("refactor", 2),
    ("rewrite", 2),
    ("breaking change", 2),
    ("complex", 3),
    ("architecture", 2),
];

fn score_text(text: &str) -> i32 {
    let lower = text.to_lowercase();
    let mut score = 0;
    for (kw, delta) in DOWNWARD_KEYWORDS {
        if lower.contains(kw) {
            score += delta;
        }
    }
    for (kw, delta) in UPWARD_KEYWORDS {
        if lower.contains(kw) {
            score += delta;
        }
    }
    score
}

fn bucket(score: i32) -> (ComplexityLevel, CostRange, &'static str) {
    if score <= -2 {
        (
            ComplexityLevel::Lightweight,
            CostRange { min_usd: 0.20, max_usd: 0.50 },
            "lightweight",
        )
    } else if score <= 2 {
        (
            ComplexityLevel::Standard,
            CostRange { min_usd: 1.00, max_usd: 2.00 },
            "standard",
        )
    } else {
        (
            ComplexityLevel::Complex,
            CostRange { min_usd: 3.00, max_usd: 5.00 },
            "complete",
        )
    }
}

/// Confidence grows with the magnitude of the score, saturating at 1.0
/// once the signal is unambiguous (|score| >= 6).
fn confidence_for(score: i32) -> f64 {
    (score.unsigned_abs() as f64 / 6.0).min(1.0).max(0.3)
}

pub struct Classifier {
    cache: Mutex<HashMap<String, ClassifierOutput>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Classify `(title, body, type_label)` for `issue_id`, caching the
    /// result so repeat lookups for the same issue are free and, crucially,
    /// always identical — classification must be deterministic.
    pub fn classify(
        &self,
        issue_id: &str,
        title: &str,
        body: &str,
        type_label: Option<&str>,
    ) -> ClassifierOutput {
        if let Some(cached) = self.cache.lock().unwrap().get(issue_id) {
            return cached.clone();
        }
        let combined = format!("{title} {body} {}", type_label.unwrap_or(""));
        let score = score_text(&combined);
        let (level, cost_range, template_name) = bucket(score);
        let classification = ClassifierOutput {
            level,
            confidence: confidence_for(score),
            cost_range,
            template_name: template_name.to_string(),
        };
        self.cache
            .lock()
            .unwrap()
            .insert(issue_id.to_string(), classification.clone());
        classification
    }
}
