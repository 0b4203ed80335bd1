use async_trait::async_trait;
use serde_json::Value;

use a2a_api::{
    AgentApiError, AgentCard, HealthStatus, MessageSendParams, PaymentSessionStart, PaymentStatus,
    Task,
};

/// Transport seam used by the orchestrator and poller.
///
/// The production implementation adapts [`a2a_api::AgentClient`]; tests use a
/// scripted mock. A payment token passed to `send_message` authorizes exactly
/// that call.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Replaces the bearer credential attached to subsequent calls. Invoked
    /// after an auth interrupt stores (or clears) the credential so the
    /// re-issued send travels with the current one.
    fn set_bearer_token(&self, token: Option<String>);

    async fn send_message(
        &self,
        params: &MessageSendParams,
        payment_token: Option<&str>,
    ) -> Result<Task, AgentApiError>;

    async fn get_task(
        &self,
        task_id: &str,
        history_length: Option<u32>,
    ) -> Result<Task, AgentApiError>;

    async fn cancel_task(&self, task_id: &str) -> Result<Task, AgentApiError>;

    async fn list_tasks(&self, context_id: Option<&str>) -> Result<Vec<Task>, AgentApiError>;

    async fn list_contexts(&self) -> Result<Vec<String>, AgentApiError>;

    async fn clear_context(&self, context_id: &str) -> Result<(), AgentApiError>;

    async fn send_feedback(
        &self,
        task_id: &str,
        positive: bool,
        comment: Option<&str>,
    ) -> Result<(), AgentApiError>;

    async fn start_payment_session(
        &self,
        hint: Option<&Value>,
    ) -> Result<PaymentSessionStart, AgentApiError>;

    async fn payment_status(&self, session_id: &str) -> Result<PaymentStatus, AgentApiError>;

    async fn agent_card(&self) -> Result<AgentCard, AgentApiError>;

    async fn health(&self) -> Result<HealthStatus, AgentApiError>;
}
