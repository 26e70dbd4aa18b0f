//! Observability event shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Phase,
    Workflow,
    #[serde(rename = "tool_call")]
    ToolCall,
}

/// Append-only observability record. `timestamp` must be monotonic per
/// `workflow_id` — enforced by the emitter, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub workflow_id: String,
    pub issue_id: String,
    #[serde(default)]
    pub phase_name: Option<String>,
    #[serde(default)]
    pub phase_number: Option<u32>,
    pub status: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl ObservabilityEvent {
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_serializes_to_the_wire_value_the_event_sink_expects() {
        assert_eq!(serde_json::to_string(&EventType::ToolCall).unwrap(), "\"tool_call\"");
        assert_eq!(serde_json::to_string(&EventType::Phase).unwrap(), "\"phase\"");
    }
}
