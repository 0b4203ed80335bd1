use uuid::Uuid;

use a2a_api::{Part, ProtocolMessage, Task, WireRole};
use chat_store::{now_rfc3339, DeliveryStatus, Role, StoredMessage, StoredPart, TaskRecord};

/// Task identity for one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBinding {
    pub task_id: String,
    pub reference_task_ids: Vec<String>,
    /// True when `task_id` was freshly minted rather than reused.
    pub minted: bool,
}

/// Decides which task identifier a send continues or creates.
///
/// A terminal task id must never travel as the `taskId` of a new send; it is
/// referenced instead. Re-entrant tasks keep their identifier so the next
/// user turn continues the same task.
pub fn next_task_binding(reply_to: Option<&str>, current: Option<&TaskRecord>) -> TaskBinding {
    if let Some(replied) = reply_to {
        return TaskBinding {
            task_id: mint_task_id(),
            reference_task_ids: vec![replied.to_owned()],
            minted: true,
        };
    }

    match current {
        Some(record) if record.state.is_reentrant() => TaskBinding {
            task_id: record.task_id.clone(),
            reference_task_ids: Vec::new(),
            minted: false,
        },
        Some(record) => TaskBinding {
            task_id: mint_task_id(),
            reference_task_ids: vec![record.task_id.clone()],
            minted: true,
        },
        None => TaskBinding {
            task_id: mint_task_id(),
            reference_task_ids: Vec::new(),
            minted: true,
        },
    }
}

pub fn mint_task_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builds the optimistic local record of a user message about to be sent.
pub fn new_user_message(text: &str, task_id: &str) -> Result<StoredMessage, chat_store::ChatStoreError> {
    Ok(StoredMessage {
        id: Uuid::new_v4().to_string(),
        role: Role::User,
        parts: vec![StoredPart::text(text)],
        ts: now_rfc3339()?,
        delivery: DeliveryStatus::Sending,
        task_id: Some(task_id.to_owned()),
        feedback_eligible: false,
    })
}

/// Client-minted status note (timeouts, cancellations) that never travelled
/// on the wire.
pub fn status_message(text: &str, task_id: Option<&str>) -> Result<StoredMessage, chat_store::ChatStoreError> {
    Ok(StoredMessage {
        id: Uuid::new_v4().to_string(),
        role: Role::Status,
        parts: vec![StoredPart::text(text)],
        ts: now_rfc3339()?,
        delivery: DeliveryStatus::Sent,
        task_id: task_id.map(str::to_owned),
        feedback_eligible: false,
    })
}

/// Converts a wire message into its stored form.
pub fn message_from_protocol(
    message: &ProtocolMessage,
    fallback_ts: &str,
) -> StoredMessage {
    let role = match message.role {
        WireRole::User => Role::User,
        WireRole::Agent => Role::Agent,
    };
    let parts = message
        .parts
        .iter()
        .filter_map(Part::as_text)
        .map(StoredPart::text)
        .collect();
    StoredMessage {
        id: message.message_id.clone(),
        role,
        parts,
        ts: message
            .timestamp
            .clone()
            .unwrap_or_else(|| fallback_ts.to_owned()),
        delivery: DeliveryStatus::Sent,
        task_id: message.task_id.clone(),
        feedback_eligible: false,
    }
}

/// Flattens a task's server history and artifacts into stored messages, in
/// that order.
///
/// Artifact message identifiers are derived from the task and artifact ids so
/// re-ingestion after a reload stays idempotent.
pub fn messages_from_task(task: &Task, fallback_ts: &str) -> Vec<StoredMessage> {
    let ts = task
        .status
        .timestamp
        .as_deref()
        .unwrap_or(fallback_ts);

    let mut messages: Vec<StoredMessage> = task
        .history
        .iter()
        .map(|message| message_from_protocol(message, ts))
        .collect();

    for artifact in &task.artifacts {
        let text = artifact
            .parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            continue;
        }
        messages.push(StoredMessage {
            id: format!("{}:{}", task.id, artifact.artifact_id),
            role: Role::Agent,
            parts: vec![StoredPart::text(text)],
            ts: ts.to_owned(),
            delivery: DeliveryStatus::Sent,
            task_id: Some(task.id.clone()),
            feedback_eligible: task.status.state.is_terminal(),
        });
    }

    messages
}
