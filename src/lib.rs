//! Client-side orchestration for a remote conversational agent speaking a
//! JSON-RPC task protocol.
//!
//! The crate is layered:
//! - [`a2a_api`] (re-exported) is the transport: request/response types and a
//!   thin HTTP client with no retry or interrupt logic.
//! - [`chat_store`] (re-exported) persists conversations, settings, and task
//!   bookkeeping, and notifies subscribers of every mutation.
//! - This crate's [`ChatOrchestrator`] sits on top and drives a user turn end
//!   to end: optimistic append, task identity, send, payment and auth
//!   interrupts, bounded status polling, and idempotent history merge.
//!
//! The transport is abstracted behind [`AgentTransport`] so tests script a
//! [`MockTransport`] instead of a live server.

pub mod auth;
pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod payment;
pub mod poller;
pub mod transport;
pub mod transports;

pub use auth::{handle_auth_fault, CredentialOutcome, InterruptUi};
pub use conversation::{next_task_binding, TaskBinding};
pub use error::{OrchestratorError, SendError};
pub use orchestrator::{ChatOrchestrator, HistoryLoaded, SendReport, TaskResolution};
pub use payment::{PaymentFlow, PaymentOutcome, PAYMENT_POLL_ATTEMPTS, PAYMENT_POLL_INTERVAL};
pub use poller::{CancelSignal, PollOutcome, TaskPoller, MAX_POLL_ATTEMPTS, POLL_INTERVAL};
pub use transport::AgentTransport;
pub use transports::{MockTransport, RpcTransport};

pub use a2a_api;
pub use chat_store;
