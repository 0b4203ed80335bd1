use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::AgentApiConfig;
use crate::error::AgentApiError;
use crate::headers::build_headers;
use crate::jsonrpc::{RpcRequest, RpcResponse};
use crate::types::{
    AgentCard, HealthStatus, MessageSendParams, PaymentSessionStart, PaymentStatus, SkillSummary,
    Task,
};
use crate::url::{
    agent_card_url, did_resolve_url, health_url, payment_session_url, payment_status_url,
    rpc_endpoint, skill_docs_url, skill_url, skills_url,
};

/// Transport client for one agent deployment.
///
/// This layer issues single requests and maps faults to typed errors. It
/// performs no retries; retry policy belongs to the poller.
///
/// The bearer credential lives behind a lock so an auth interrupt can swap
/// it while the client is shared; every call reads the current value.
#[derive(Debug)]
pub struct AgentClient {
    http: Client,
    config: AgentApiConfig,
    bearer_token: RwLock<Option<String>>,
    next_rpc_id: AtomicU64,
}

impl AgentClient {
    pub fn new(config: AgentApiConfig) -> Result<Self, AgentApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(AgentApiError::from)?;
        let bearer_token = RwLock::new(config.bearer_token.clone());
        Ok(Self {
            http,
            config,
            bearer_token,
            next_rpc_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &AgentApiConfig {
        &self.config
    }

    /// Replaces the bearer credential attached to subsequent calls.
    pub fn set_bearer_token(&self, token: Option<String>) {
        *read_write_unpoisoned(&self.bearer_token) = token;
    }

    #[must_use]
    pub fn bearer_token(&self) -> Option<String> {
        match self.bearer_token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn header_map(&self, payment_token: Option<&str>) -> Result<HeaderMap, AgentApiError> {
        let mut config = self.config.clone();
        config.bearer_token = self.bearer_token();
        let headers = build_headers(&config, payment_token)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    AgentApiError::InvalidBaseUrl(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    AgentApiError::InvalidBaseUrl(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    /// Issues one JSON-RPC call and returns the raw `result` value.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        payment_token: Option<&str>,
    ) -> Result<Value, AgentApiError> {
        let request = RpcRequest::new(
            self.next_rpc_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        );
        debug!(method, id = request.id, "issuing rpc call");

        let response = self
            .http
            .post(rpc_endpoint(&self.config.base_url))
            .headers(self.header_map(payment_token)?)
            .json(&request)
            .send()
            .await?;
        let body = read_success_body(response).await?;

        let envelope: RpcResponse = serde_json::from_str(&body)
            .map_err(|error| AgentApiError::MalformedResponse(error.to_string()))?;
        if let Some(fault) = envelope.error {
            if fault.is_payment_required() {
                return Err(AgentApiError::PaymentRequired { data: fault.data });
            }
            if fault.code == 401 {
                return Err(AgentApiError::AuthRequired);
            }
            return Err(AgentApiError::Rpc {
                code: fault.code,
                message: fault.message,
                data: fault.data,
            });
        }

        envelope
            .result
            .ok_or_else(|| AgentApiError::MalformedResponse("missing result".to_owned()))
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        payment_token: Option<&str>,
    ) -> Result<T, AgentApiError> {
        let result = self.call(method, params, payment_token).await?;
        serde_json::from_value(result)
            .map_err(|error| AgentApiError::MalformedResponse(error.to_string()))
    }

    /// Submits a user message bound to a task/context identifier. The payment
    /// token, when present, authorizes exactly this call.
    pub async fn send_message(
        &self,
        params: &MessageSendParams,
        payment_token: Option<&str>,
    ) -> Result<Task, AgentApiError> {
        let params = serde_json::to_value(params)?;
        self.call_typed("message/send", params, payment_token).await
    }

    pub async fn get_task(
        &self,
        task_id: &str,
        history_length: Option<u32>,
    ) -> Result<Task, AgentApiError> {
        let mut params = json!({ "id": task_id });
        if let Some(length) = history_length {
            params["historyLength"] = json!(length);
        }
        self.call_typed("tasks/get", params, None).await
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<Task, AgentApiError> {
        self.call_typed("tasks/cancel", json!({ "id": task_id }), None)
            .await
    }

    pub async fn list_tasks(&self, context_id: Option<&str>) -> Result<Vec<Task>, AgentApiError> {
        let params = match context_id {
            Some(context_id) => json!({ "contextId": context_id }),
            None => json!({}),
        };
        self.call_typed("tasks/list", params, None).await
    }

    pub async fn list_contexts(&self) -> Result<Vec<String>, AgentApiError> {
        self.call_typed("contexts/list", json!({}), None).await
    }

    pub async fn clear_context(&self, context_id: &str) -> Result<(), AgentApiError> {
        self.call("contexts/clear", json!({ "contextId": context_id }), None)
            .await?;
        Ok(())
    }

    pub async fn send_feedback(
        &self,
        task_id: &str,
        positive: bool,
        comment: Option<&str>,
    ) -> Result<(), AgentApiError> {
        let mut params = json!({ "taskId": task_id, "positive": positive });
        if let Some(comment) = comment {
            params["comment"] = json!(comment);
        }
        self.call("tasks/feedback", params, None).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, AgentApiError> {
        let response = self
            .http
            .get(&url)
            .headers(self.header_map(None)?)
            .send()
            .await?;
        let body = read_success_body(response).await?;
        serde_json::from_str(&body)
            .map_err(|error| AgentApiError::MalformedResponse(error.to_string()))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: String,
        body: &Value,
    ) -> Result<T, AgentApiError> {
        let response = self
            .http
            .post(&url)
            .headers(self.header_map(None)?)
            .json(body)
            .send()
            .await?;
        let body = read_success_body(response).await?;
        serde_json::from_str(&body)
            .map_err(|error| AgentApiError::MalformedResponse(error.to_string()))
    }

    /// Fetches the agent metadata document.
    pub async fn agent_card(&self) -> Result<AgentCard, AgentApiError> {
        self.get_json(agent_card_url(&self.config.base_url)).await
    }

    pub async fn skills(&self) -> Result<Vec<SkillSummary>, AgentApiError> {
        // Some deployments wrap the listing in a `skills` field.
        let value: Value = self.get_json(skills_url(&self.config.base_url)).await?;
        let listing = match value {
            Value::Array(_) => value,
            Value::Object(ref map) if map.contains_key("skills") => map["skills"].clone(),
            other => {
                return Err(AgentApiError::MalformedResponse(format!(
                    "unexpected skills listing shape: {other}"
                )))
            }
        };
        serde_json::from_value(listing)
            .map_err(|error| AgentApiError::MalformedResponse(error.to_string()))
    }

    pub async fn skill(&self, skill_id: &str) -> Result<Value, AgentApiError> {
        self.get_json(skill_url(&self.config.base_url, skill_id))
            .await
    }

    pub async fn skill_docs(&self, skill_id: &str) -> Result<String, AgentApiError> {
        let response = self
            .http
            .get(skill_docs_url(&self.config.base_url, skill_id))
            .headers(self.header_map(None)?)
            .send()
            .await?;
        read_success_body(response).await
    }

    pub async fn resolve_did(&self, did: &str) -> Result<Value, AgentApiError> {
        self.post_json(did_resolve_url(&self.config.base_url), &json!({ "did": did }))
            .await
    }

    pub async fn health(&self) -> Result<HealthStatus, AgentApiError> {
        self.get_json(health_url(&self.config.base_url)).await
    }

    /// Starts a payment session, forwarding the server's session-start hint
    /// from the originating 402 fault when one was attached.
    pub async fn start_payment_session(
        &self,
        hint: Option<&Value>,
    ) -> Result<PaymentSessionStart, AgentApiError> {
        let body = hint.cloned().unwrap_or_else(|| json!({}));
        self.post_json(payment_session_url(&self.config.base_url), &body)
            .await
    }

    pub async fn payment_status(&self, session_id: &str) -> Result<PaymentStatus, AgentApiError> {
        self.get_json(payment_status_url(&self.config.base_url, session_id))
            .await
    }
}

fn read_write_unpoisoned<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn read_success_body(response: Response) -> Result<String, AgentApiError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(AgentApiError::from_http_status(status, &body))
    }
}
