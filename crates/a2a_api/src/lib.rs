//! Transport-only client primitives for the agent's JSON-RPC task protocol.
//!
//! This crate owns request building, fault mapping, and the typed wire
//! records for tasks, messages, and payment sessions. It intentionally
//! contains no orchestration or storage: a send is one request, faults come
//! back as typed errors, and retry/poll policy lives with the caller.

pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod jsonrpc;
pub mod types;
pub mod url;

pub use client::AgentClient;
pub use config::AgentApiConfig;
pub use error::AgentApiError;
pub use jsonrpc::{RpcFault, RpcRequest, RpcResponse, ERROR_CODE_PAYMENT_REQUIRED};
pub use types::{
    AgentCard, Artifact, HealthStatus, MessageSendParams, Part, PaymentSessionStart, PaymentState,
    PaymentStatus, ProtocolMessage, SkillSummary, Task, TaskState, TaskStatus, WireRole,
};
pub use url::normalize_agent_url;
