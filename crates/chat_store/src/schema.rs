use serde::{Deserialize, Serialize};

use a2a_api::TaskState;

pub const UNTITLED_CONVERSATION: &str = "New Chat";

/// Message originator as rendered in a conversation. `Status` marks client-
/// minted notes (timeouts, cancellations) that never travelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Error,
}

/// Persisted content part. Only text parts are rendered today; the enum keeps
/// the persisted shape aligned with the wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum StoredPart {
    Text { text: String },
}

impl StoredPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<StoredPart>,
    /// RFC3339 timestamp. Unparseable values are tolerated during merge and
    /// keep their relative insertion order.
    pub ts: String,
    pub delivery: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub feedback_eligible: bool,
}

impl StoredMessage {
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .map(StoredPart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoredConversation {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    /// Denormalized; recomputed on every merge.
    pub message_count: usize,
    /// Set once the server acknowledges a Context for this conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// True for conversations created to mirror a server-side Context.
    #[serde(default)]
    pub mirrors_context: bool,
    /// Append-only; insertion order except where re-sorted during merge.
    pub messages: Vec<StoredMessage>,
}

/// Current-task bookkeeping for one conversation. Tasks are server-owned, so
/// this record is held in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task_id: String,
    pub context_id: String,
    pub state: TaskState,
    pub state_timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub agent_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default = "default_true")]
    pub auto_scroll: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            agent_url: String::new(),
            bearer_token: None,
            auto_scroll: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_conversation_id: Option<String>,
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            active_conversation_id: None,
            theme: default_theme(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_theme() -> String {
    "dark".to_owned()
}
