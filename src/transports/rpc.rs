use async_trait::async_trait;
use serde_json::Value;

use a2a_api::{
    AgentApiError, AgentCard, AgentClient, HealthStatus, MessageSendParams, PaymentSessionStart,
    PaymentStatus, Task,
};

use crate::transport::AgentTransport;

/// Production transport: delegates to the JSON-RPC [`AgentClient`].
pub struct RpcTransport {
    client: AgentClient,
}

impl RpcTransport {
    pub fn new(client: AgentClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AgentClient {
        &self.client
    }
}

#[async_trait]
impl AgentTransport for RpcTransport {
    fn set_bearer_token(&self, token: Option<String>) {
        self.client.set_bearer_token(token);
    }

    async fn send_message(
        &self,
        params: &MessageSendParams,
        payment_token: Option<&str>,
    ) -> Result<Task, AgentApiError> {
        self.client.send_message(params, payment_token).await
    }

    async fn get_task(
        &self,
        task_id: &str,
        history_length: Option<u32>,
    ) -> Result<Task, AgentApiError> {
        self.client.get_task(task_id, history_length).await
    }

    async fn cancel_task(&self, task_id: &str) -> Result<Task, AgentApiError> {
        self.client.cancel_task(task_id).await
    }

    async fn list_tasks(&self, context_id: Option<&str>) -> Result<Vec<Task>, AgentApiError> {
        self.client.list_tasks(context_id).await
    }

    async fn list_contexts(&self) -> Result<Vec<String>, AgentApiError> {
        self.client.list_contexts().await
    }

    async fn clear_context(&self, context_id: &str) -> Result<(), AgentApiError> {
        self.client.clear_context(context_id).await
    }

    async fn send_feedback(
        &self,
        task_id: &str,
        positive: bool,
        comment: Option<&str>,
    ) -> Result<(), AgentApiError> {
        self.client.send_feedback(task_id, positive, comment).await
    }

    async fn start_payment_session(
        &self,
        hint: Option<&Value>,
    ) -> Result<PaymentSessionStart, AgentApiError> {
        self.client.start_payment_session(hint).await
    }

    async fn payment_status(&self, session_id: &str) -> Result<PaymentStatus, AgentApiError> {
        self.client.payment_status(session_id).await
    }

    async fn agent_card(&self) -> Result<AgentCard, AgentApiError> {
        self.client.agent_card().await
    }

    async fn health(&self) -> Result<HealthStatus, AgentApiError> {
        self.client.health().await
    }
}
