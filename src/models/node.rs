//! Node definitions of the static workflow graph.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::RobotError;

/// Closed enumeration of node step types.
///
/// Node types arrive from the store as strings; anything outside this set is
/// a configuration error, caught when the graph is validated, not at
/// dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Action,
    Wait,
    Trigger,
    Terminate,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Action => "action",
            NodeType::Wait => "wait",
            NodeType::Trigger => "trigger",
            NodeType::Terminate => "terminate",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = RobotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action" => Ok(NodeType::Action),
            "wait" => Ok(NodeType::Wait),
            "trigger" => Ok(NodeType::Trigger),
            "terminate" => Ok(NodeType::Terminate),
            other => Err(RobotError::Configuration(format!(
                "unknown node type: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for NodeType {
    type Error = RobotError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A step definition in the workflow graph.
///
/// `action` is the handler name for action nodes, `waiting_time` the delay
/// in seconds for wait nodes, `event_trigger` the event-type id a trigger
/// node watches for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Node {
    pub node_id: i64,
    pub name: String,
    #[sqlx(rename = "type", try_from = "String")]
    pub node_type: NodeType,
    pub action: Option<String>,
    pub waiting_time: i32,
    pub event_trigger: Option<i64>,
}
