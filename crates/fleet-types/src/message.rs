use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel `to_team` value meaning "deliver to every team but the sender".
pub const BROADCAST: &str = "broadcast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Discovery,
    Dependency,
    Warning,
    Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Info,
    Important,
    Urgent,
}

/// A message routed between teams through the `Router`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterTeamMessage {
    #[serde(default)]
    pub id: String,
    pub from_team: String,
    pub to_team: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl InterTeamMessage {
    pub fn new(
        from_team: impl Into<String>,
        to_team: impl Into<String>,
        message_type: MessageType,
        priority: MessagePriority,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            from_team: from_team.into(),
            to_team: to_team.into(),
            message_type,
            priority,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_team == BROADCAST
    }

    /// Assigns an ID and timestamp if either is missing. Called by the
    /// Router when a message enters its log.
    pub fn finalize(&mut self) {
        if self.id.trim().is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }
}
