use std::fmt;

use a2a_api::AgentApiError;
use chat_store::ChatStoreError;

/// Failure of one send attempt.
///
/// Variants that abandon the send carry the user's draft so the render layer
/// can restore the input field; typed content is never silently dropped.
#[derive(Debug)]
pub enum SendError {
    /// A send is already outstanding for this conversation.
    Busy,
    EmptyMessage,
    UnknownConversation(String),
    /// Credentials were (re)collected; the user must re-issue the send.
    AuthRequired { draft: String },
    /// The payment interrupt declined, timed out, or was cancelled.
    PaymentFailed { draft: String },
    /// The send itself failed at the transport.
    Transport {
        draft: String,
        source: AgentApiError,
    },
    /// The send was accepted but a later status query failed; the message was
    /// delivered, so no draft is restored.
    Poll(AgentApiError),
    Store(ChatStoreError),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "a send is already in progress for this conversation"),
            Self::EmptyMessage => write!(f, "cannot send an empty message"),
            Self::UnknownConversation(id) => write!(f, "unknown conversation '{id}'"),
            Self::AuthRequired { .. } => write!(f, "authentication required before resending"),
            Self::PaymentFailed { .. } => write!(f, "payment was not completed"),
            Self::Transport { source, .. } => write!(f, "send failed: {source}"),
            Self::Poll(source) => write!(f, "status polling failed: {source}"),
            Self::Store(source) => write!(f, "store error: {source}"),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport { source, .. } | Self::Poll(source) => Some(source),
            Self::Store(source) => Some(source),
            _ => None,
        }
    }
}

impl From<ChatStoreError> for SendError {
    fn from(source: ChatStoreError) -> Self {
        Self::Store(source)
    }
}

/// Failure of a non-send orchestrator operation.
#[derive(Debug)]
pub enum OrchestratorError {
    UnknownConversation(String),
    NotFeedbackEligible { message_id: String },
    Transport(AgentApiError),
    Store(ChatStoreError),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownConversation(id) => write!(f, "unknown conversation '{id}'"),
            Self::NotFeedbackEligible { message_id } => {
                write!(f, "message '{message_id}' does not accept feedback")
            }
            Self::Transport(source) => write!(f, "transport error: {source}"),
            Self::Store(source) => write!(f, "store error: {source}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(source) => Some(source),
            Self::Store(source) => Some(source),
            _ => None,
        }
    }
}

impl From<ChatStoreError> for OrchestratorError {
    fn from(source: ChatStoreError) -> Self {
        Self::Store(source)
    }
}

impl From<AgentApiError> for OrchestratorError {
    fn from(source: AgentApiError) -> Self {
        Self::Transport(source)
    }
}
