//! Flow definitions and the executions started from them.
//!
//! A flow is authored in the visual editor and stored as a JSON document
//! with a `nodes` array. The scheduler only needs to find the entry node;
//! everything else in the document is carried through untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Node `type` that marks where a flow starts.
pub const ENTRY_NODE_TYPE: &str = "start";

/// A flow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub name: String,
    pub flow_data: FlowData,
}

/// The editor document of a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowData {
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    /// Edges, viewport and anything else the editor saves.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Flow {
    /// The node a new execution starts at, if the flow has one.
    pub fn entry_node(&self) -> Option<&FlowNode> {
        self.flow_data
            .nodes
            .iter()
            .find(|node| node.kind == ENTRY_NODE_TYPE)
    }
}

/// Lifecycle of a flow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Active => "active",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled executions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ExecutionStatus::Active),
            "paused" => Ok(ExecutionStatus::Paused),
            "completed" => Ok(ExecutionStatus::Completed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// What caused a scheduled execution to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTrigger {
    /// The in-process timer fired.
    Timer,
    /// Found overdue while re-arming timers at startup.
    Recovery,
    /// Picked up by the periodic reconciliation sweep.
    Sweep,
}

impl std::fmt::Display for ExecutionTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionTrigger::Timer => write!(f, "timer"),
            ExecutionTrigger::Recovery => write!(f, "recovery"),
            ExecutionTrigger::Sweep => write!(f, "sweep"),
        }
    }
}

/// A running (or finished) instance of a flow for one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowExecution {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub patient_id: Uuid,
    pub current_node_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_data: Value,
}

/// Optional filters for listing executions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionFilter {
    pub patient_id: Option<Uuid>,
    pub flow_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow_from(doc: Value) -> Flow {
        Flow {
            id: Uuid::new_v4(),
            name: "Post-op follow-up".into(),
            flow_data: serde_json::from_value(doc).unwrap(),
        }
    }

    #[test]
    fn test_entry_node_found_by_type() {
        let flow = flow_from(json!({
            "nodes": [
                { "id": "msg-1", "type": "message", "data": { "text": "hi" } },
                { "id": "start-1", "type": "start", "position": { "x": 0, "y": 0 } }
            ],
            "edges": [{ "id": "e1", "source": "start-1", "target": "msg-1" }]
        }));

        assert_eq!(flow.entry_node().map(|n| n.id.as_str()), Some("start-1"));
    }

    #[test]
    fn test_no_entry_node() {
        let flow = flow_from(json!({ "nodes": [{ "id": "a", "type": "message" }] }));
        assert!(flow.entry_node().is_none());

        let empty = flow_from(json!({}));
        assert!(empty.entry_node().is_none());
    }

    #[test]
    fn test_editor_fields_are_preserved() {
        let doc = json!({
            "nodes": [{ "id": "start-1", "type": "start", "data": { "label": "Go" } }],
            "edges": [],
            "viewport": { "zoom": 1.5 }
        });
        let flow = flow_from(doc.clone());
        assert_eq!(serde_json::to_value(&flow.flow_data).unwrap(), doc);
    }

    #[test]
    fn test_execution_status_parse_and_terminal() {
        assert_eq!("paused".parse::<ExecutionStatus>(), Ok(ExecutionStatus::Paused));
        assert!("running".parse::<ExecutionStatus>().is_err());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(!ExecutionStatus::Active.is_terminal());
    }
}
