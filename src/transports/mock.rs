use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use a2a_api::{
    AgentApiError, AgentCard, HealthStatus, MessageSendParams, PaymentSessionStart, PaymentStatus,
    Task, TaskState, TaskStatus,
};

use crate::transport::AgentTransport;

/// One recorded `message/send` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SentCall {
    pub params: MessageSendParams,
    pub payment_token: Option<String>,
}

/// Deterministic scripted transport for tests.
///
/// Results are consumed in script order; task snapshot queues repeat their
/// final entry so a poll loop can keep observing a settled state.
#[derive(Default)]
pub struct MockTransport {
    send_results: Mutex<VecDeque<Result<Task, AgentApiError>>>,
    snapshots: Mutex<HashMap<String, VecDeque<Task>>>,
    context_tasks: Mutex<HashMap<String, Vec<Task>>>,
    contexts: Mutex<Vec<String>>,
    payment_sessions: Mutex<VecDeque<PaymentSessionStart>>,
    payment_statuses: Mutex<VecDeque<PaymentStatus>>,

    sent: Mutex<Vec<SentCall>>,
    credential_updates: Mutex<Vec<Option<String>>>,
    polled: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    cleared: Mutex<Vec<String>>,
    feedback: Mutex<Vec<(String, bool, Option<String>)>>,
    session_hints: Mutex<Vec<Option<Value>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // Scripting

    pub fn script_send_ok(&self, task: Task) {
        lock(&self.send_results).push_back(Ok(task));
    }

    pub fn script_send_err(&self, error: AgentApiError) {
        lock(&self.send_results).push_back(Err(error));
    }

    pub fn script_snapshot(&self, task: Task) {
        lock(&self.snapshots)
            .entry(task.id.clone())
            .or_default()
            .push_back(task);
    }

    pub fn script_contexts(&self, contexts: Vec<String>) {
        *lock(&self.contexts) = contexts;
    }

    pub fn script_context_tasks(&self, context_id: impl Into<String>, tasks: Vec<Task>) {
        lock(&self.context_tasks).insert(context_id.into(), tasks);
    }

    pub fn script_payment_session(&self, session: PaymentSessionStart) {
        lock(&self.payment_sessions).push_back(session);
    }

    pub fn script_payment_status(&self, status: PaymentStatus) {
        lock(&self.payment_statuses).push_back(status);
    }

    // Recorded calls

    pub fn sent_calls(&self) -> Vec<SentCall> {
        lock(&self.sent).clone()
    }

    pub fn credential_updates(&self) -> Vec<Option<String>> {
        lock(&self.credential_updates).clone()
    }

    pub fn polled_task_ids(&self) -> Vec<String> {
        lock(&self.polled).clone()
    }

    pub fn cancelled_task_ids(&self) -> Vec<String> {
        lock(&self.cancelled).clone()
    }

    pub fn cleared_context_ids(&self) -> Vec<String> {
        lock(&self.cleared).clone()
    }

    pub fn feedback_calls(&self) -> Vec<(String, bool, Option<String>)> {
        lock(&self.feedback).clone()
    }

    pub fn session_start_hints(&self) -> Vec<Option<Value>> {
        lock(&self.session_hints).clone()
    }
}

#[async_trait]
impl AgentTransport for MockTransport {
    fn set_bearer_token(&self, token: Option<String>) {
        lock(&self.credential_updates).push(token);
    }

    async fn send_message(
        &self,
        params: &MessageSendParams,
        payment_token: Option<&str>,
    ) -> Result<Task, AgentApiError> {
        lock(&self.sent).push(SentCall {
            params: params.clone(),
            payment_token: payment_token.map(str::to_owned),
        });
        lock(&self.send_results)
            .pop_front()
            .unwrap_or_else(|| Err(unscripted("message/send")))
    }

    async fn get_task(
        &self,
        task_id: &str,
        _history_length: Option<u32>,
    ) -> Result<Task, AgentApiError> {
        lock(&self.polled).push(task_id.to_owned());
        let mut snapshots = lock(&self.snapshots);
        let queue = snapshots
            .get_mut(task_id)
            .ok_or_else(|| unscripted("tasks/get"))?;
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap_or_else(|| unreachable_task()))
        } else {
            queue.front().cloned().ok_or_else(|| unscripted("tasks/get"))
        }
    }

    async fn cancel_task(&self, task_id: &str) -> Result<Task, AgentApiError> {
        lock(&self.cancelled).push(task_id.to_owned());
        let snapshots = lock(&self.snapshots);
        let latest = snapshots
            .get(task_id)
            .and_then(|queue| queue.back().cloned());
        let mut task = latest.ok_or_else(|| unscripted("tasks/cancel"))?;
        task.status = TaskStatus {
            state: TaskState::Canceled,
            timestamp: task.status.timestamp.clone(),
            message: None,
        };
        Ok(task)
    }

    async fn list_tasks(&self, context_id: Option<&str>) -> Result<Vec<Task>, AgentApiError> {
        let context_tasks = lock(&self.context_tasks);
        match context_id {
            Some(context_id) => Ok(context_tasks.get(context_id).cloned().unwrap_or_default()),
            None => Ok(context_tasks.values().flatten().cloned().collect()),
        }
    }

    async fn list_contexts(&self) -> Result<Vec<String>, AgentApiError> {
        Ok(lock(&self.contexts).clone())
    }

    async fn clear_context(&self, context_id: &str) -> Result<(), AgentApiError> {
        lock(&self.cleared).push(context_id.to_owned());
        Ok(())
    }

    async fn send_feedback(
        &self,
        task_id: &str,
        positive: bool,
        comment: Option<&str>,
    ) -> Result<(), AgentApiError> {
        lock(&self.feedback).push((task_id.to_owned(), positive, comment.map(str::to_owned)));
        Ok(())
    }

    async fn start_payment_session(
        &self,
        hint: Option<&Value>,
    ) -> Result<PaymentSessionStart, AgentApiError> {
        lock(&self.session_hints).push(hint.cloned());
        lock(&self.payment_sessions)
            .pop_front()
            .ok_or_else(|| unscripted("start-payment-session"))
    }

    async fn payment_status(&self, _session_id: &str) -> Result<PaymentStatus, AgentApiError> {
        let mut statuses = lock(&self.payment_statuses);
        if statuses.len() > 1 {
            statuses
                .pop_front()
                .ok_or_else(|| unscripted("payment-status"))
        } else {
            statuses
                .front()
                .cloned()
                .ok_or_else(|| unscripted("payment-status"))
        }
    }

    async fn agent_card(&self) -> Result<AgentCard, AgentApiError> {
        Ok(AgentCard {
            name: "mock-agent".to_owned(),
            description: Some("scripted transport".to_owned()),
            version: Some("0.0.0".to_owned()),
            extra: Value::Null,
        })
    }

    async fn health(&self) -> Result<HealthStatus, AgentApiError> {
        Ok(HealthStatus {
            status: "ok".to_owned(),
        })
    }
}

fn unscripted(endpoint: &str) -> AgentApiError {
    AgentApiError::MalformedResponse(format!("mock transport: no scripted result for {endpoint}"))
}

fn unreachable_task() -> Task {
    Task {
        id: String::new(),
        context_id: String::new(),
        status: TaskStatus {
            state: TaskState::Failed,
            timestamp: None,
            message: None,
        },
        artifacts: Vec::new(),
        history: Vec::new(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
