//! Interactive requests awaiting a decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of decision the agent is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Tool use needs approval.
    Permission,
    /// The agent asked a question.
    Question,
    /// The agent proposed a plan and waits for go-ahead.
    PlanApproval,
}

/// The single outstanding request of a session, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveRequest {
    pub id: String,
    pub kind: RequestKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Raw tool input, passed through untouched.
    #[serde(default)]
    pub input: serde_json::Value,
    pub requested_at: DateTime<Utc>,
}
