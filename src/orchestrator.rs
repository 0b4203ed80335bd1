use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use a2a_api::{
    AgentApiError, AgentCard, HealthStatus, MessageSendParams, Part, ProtocolMessage, Task,
    TaskState, WireRole,
};
use chat_store::{ChatStore, DeliveryStatus, StoredConversation, TaskRecord};

use crate::auth::{handle_auth_fault, CredentialOutcome, InterruptUi};
use crate::conversation::{
    messages_from_task, new_user_message, next_task_binding, status_message,
};
use crate::error::{OrchestratorError, SendError};
use crate::payment::{PaymentFlow, PaymentOutcome};
use crate::poller::{CancelSignal, PollOutcome, TaskPoller};
use crate::transport::AgentTransport;

/// How a send ultimately settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResolution {
    Completed,
    Failed,
    Canceled,
    /// The agent paused for another user turn in the same task.
    InputRequired,
    /// The agent paused for credentials within the task.
    AuthRequired,
    /// The poll budget elapsed without a settled state.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub task_id: String,
    pub resolution: TaskResolution,
}

/// Where a history load was served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryLoaded {
    Remote { task_count: usize },
    /// The server was unreachable or returned an error; the local cache
    /// stands as-is.
    Local,
}

/// Drives the full lifecycle of a conversation turn: optimistic local write,
/// wire send, interrupt handling, bounded polling, and history merge.
pub struct ChatOrchestrator {
    transport: Arc<dyn AgentTransport>,
    store: Arc<ChatStore>,
    ui: Arc<dyn InterruptUi>,
    poller: TaskPoller,
    payment: PaymentFlow,
    /// Single-use payment tokens held for the retry of one specific task.
    payment_tokens: Mutex<HashMap<String, String>>,
    /// Live cancellation signals, one per conversation with an active send.
    cancels: Mutex<HashMap<String, CancelSignal>>,
}

impl ChatOrchestrator {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        store: Arc<ChatStore>,
        ui: Arc<dyn InterruptUi>,
    ) -> Self {
        let poller = TaskPoller::new(Arc::clone(&transport));
        let payment = PaymentFlow::new(Arc::clone(&transport));
        Self::with_components(transport, store, ui, poller, payment)
    }

    /// Assembles an orchestrator around pre-built poll and payment loops,
    /// letting callers shrink the wait budgets.
    pub fn with_components(
        transport: Arc<dyn AgentTransport>,
        store: Arc<ChatStore>,
        ui: Arc<dyn InterruptUi>,
        poller: TaskPoller,
        payment: PaymentFlow,
    ) -> Self {
        Self {
            transport,
            store,
            ui,
            poller,
            payment,
            payment_tokens: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    // Sending

    /// Sends one user turn and drives it to a resolution.
    ///
    /// The message is recorded locally before any network traffic so the
    /// user's text survives every failure mode. At most one send runs per
    /// conversation; a second call while one is outstanding returns `Busy`
    /// without touching the store.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<SendReport, SendError> {
        let draft = text.trim().to_owned();
        if draft.is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let conversation = self
            .store
            .conversation(conversation_id)
            .ok_or_else(|| SendError::UnknownConversation(conversation_id.to_owned()))?;

        let Some(_permit) = SendPermit::acquire(self.store.as_ref(), conversation_id) else {
            return Err(SendError::Busy);
        };
        let cancel = self.register_cancel(conversation_id);
        let result = self
            .send_inner(&conversation, &draft, reply_to, &cancel)
            .await;
        self.release_cancel(conversation_id);
        result
    }

    async fn send_inner(
        &self,
        conversation: &StoredConversation,
        draft: &str,
        reply_to: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<SendReport, SendError> {
        let conversation_id = conversation.id.as_str();
        let current = self.store.current_task(conversation_id);
        let binding = next_task_binding(reply_to, current.as_ref());
        debug!(
            conversation_id,
            task_id = %binding.task_id,
            minted = binding.minted,
            "task binding decided"
        );

        let local = new_user_message(draft, &binding.task_id)?;
        self.store.append_message(conversation_id, local.clone())?;

        let params = MessageSendParams {
            message: ProtocolMessage {
                role: WireRole::User,
                parts: vec![Part::text(draft)],
                message_id: local.id.clone(),
                context_id: conversation.context_id.clone(),
                task_id: Some(binding.task_id.clone()),
                reference_task_ids: binding.reference_task_ids.clone(),
                timestamp: Some(local.ts.clone()),
                metadata: None,
            },
        };

        let held = self.held_token(&binding.task_id);
        let task = match self.transport.send_message(&params, held.as_deref()).await {
            Ok(task) => task,
            Err(AgentApiError::AuthRequired) => {
                self.store
                    .set_delivery(conversation_id, &local.id, DeliveryStatus::Error)?;
                let outcome = handle_auth_fault(self.store.as_ref(), self.ui.as_ref()).await?;
                // The transport reads its credential per call, so push the
                // store's new value to it before the user re-issues the send.
                match outcome {
                    CredentialOutcome::Updated => self
                        .transport
                        .set_bearer_token(self.store.settings().bearer_token),
                    CredentialOutcome::Rejected => self.transport.set_bearer_token(None),
                    CredentialOutcome::Dismissed => {}
                }
                info!(conversation_id, ?outcome, "auth interrupt finished");
                return Err(SendError::AuthRequired {
                    draft: draft.to_owned(),
                });
            }
            Err(AgentApiError::PaymentRequired { data }) => {
                if held.is_some() {
                    // The retry itself was refused; the token is spent.
                    self.discard_token(&binding.task_id);
                }
                match self.payment.run(data.as_ref(), self.ui.as_ref(), cancel).await {
                    Ok(PaymentOutcome::Authorized { token }) => {
                        // One token covers this task until it settles; it is
                        // attached to exactly one retry here and to re-entrant
                        // turns of the same task, then discarded at terminal.
                        self.hold_token(&binding.task_id, token.clone());
                        match self.transport.send_message(&params, Some(&token)).await {
                            Ok(task) => task,
                            Err(source) => {
                                self.discard_token(&binding.task_id);
                                self.store.set_delivery(
                                    conversation_id,
                                    &local.id,
                                    DeliveryStatus::Error,
                                )?;
                                return Err(SendError::Transport {
                                    draft: draft.to_owned(),
                                    source,
                                });
                            }
                        }
                    }
                    Ok(outcome) => {
                        info!(conversation_id, ?outcome, "payment interrupt abandoned");
                        self.store
                            .set_delivery(conversation_id, &local.id, DeliveryStatus::Error)?;
                        return Err(SendError::PaymentFailed {
                            draft: draft.to_owned(),
                        });
                    }
                    Err(source) => {
                        self.store
                            .set_delivery(conversation_id, &local.id, DeliveryStatus::Error)?;
                        return Err(SendError::Transport {
                            draft: draft.to_owned(),
                            source,
                        });
                    }
                }
            }
            Err(source) => {
                self.store
                    .set_delivery(conversation_id, &local.id, DeliveryStatus::Error)?;
                return Err(SendError::Transport {
                    draft: draft.to_owned(),
                    source,
                });
            }
        };

        // Acknowledged. From here on the message is delivered, so failures
        // no longer restore the draft.
        if task.id != binding.task_id {
            // The server answered under its own task id; a held token
            // follows the task it authorizes.
            self.rekey_token(&binding.task_id, &task.id);
        }
        self.store.set_context_id(conversation_id, &task.context_id)?;
        self.store
            .set_current_task(conversation_id, record_from(&task))?;
        self.store
            .set_delivery(conversation_id, &local.id, DeliveryStatus::Sent)?;

        let fallback_ts = local.ts.clone();
        self.store
            .merge_history(conversation_id, messages_from_task(&task, &fallback_ts))?;

        let task_id = task.id.clone();
        if task.status.state.is_terminal() || task.status.state.is_reentrant() {
            // The send response already settled; no polling needed.
            return self.resolve(conversation_id, &task_id, &fallback_ts, settled_outcome(task));
        }

        let store = Arc::clone(&self.store);
        let snapshot_conversation = conversation_id.to_owned();
        let mut on_update = move |snapshot: &Task| {
            if let Err(error) = store.set_current_task(&snapshot_conversation, record_from(snapshot))
            {
                debug!(%error, "stale task snapshot ignored");
            }
        };
        let outcome = match self.poller.poll(&task_id, cancel, &mut on_update).await {
            Ok(outcome) => outcome,
            Err(source) => {
                // Same recovery as a timeout: the task's fate is unknown, so
                // drop the association rather than let the next send
                // reference a possibly-live task.
                self.store.clear_current_task(conversation_id);
                return Err(SendError::Poll(source));
            }
        };
        self.resolve(conversation_id, &task_id, &fallback_ts, outcome)
    }

    fn resolve(
        &self,
        conversation_id: &str,
        task_id: &str,
        fallback_ts: &str,
        outcome: PollOutcome,
    ) -> Result<SendReport, SendError> {
        match outcome {
            PollOutcome::Terminal(task) => {
                self.store
                    .merge_history(conversation_id, messages_from_task(&task, fallback_ts))?;
                self.discard_token(task_id);
                let resolution = match task.status.state {
                    TaskState::Failed => {
                        let diagnostic = task
                            .status
                            .message
                            .as_ref()
                            .map(ProtocolMessage::joined_text)
                            .filter(|text| !text.is_empty())
                            .unwrap_or_else(|| "the agent reported a failure".to_owned());
                        self.store.append_message(
                            conversation_id,
                            status_message(&format!("Task failed: {diagnostic}"), Some(task_id))?,
                        )?;
                        TaskResolution::Failed
                    }
                    TaskState::Canceled => {
                        self.store.append_message(
                            conversation_id,
                            status_message("Task canceled.", Some(task_id))?,
                        )?;
                        TaskResolution::Canceled
                    }
                    _ => TaskResolution::Completed,
                };
                Ok(SendReport {
                    task_id: task_id.to_owned(),
                    resolution,
                })
            }
            PollOutcome::InputPending(task) => {
                self.store
                    .merge_history(conversation_id, messages_from_task(&task, fallback_ts))?;
                let resolution = if task.status.state == TaskState::AuthRequired {
                    TaskResolution::AuthRequired
                } else {
                    TaskResolution::InputRequired
                };
                Ok(SendReport {
                    task_id: task_id.to_owned(),
                    resolution,
                })
            }
            PollOutcome::TimedOut { task_id } => {
                self.store.clear_current_task(conversation_id);
                // The task association is gone, so a held token could never
                // be presented again; drop it with the association.
                self.discard_token(&task_id);
                self.store.append_message(
                    conversation_id,
                    status_message(
                        "No response from the agent in time; the conversation is open for new messages.",
                        Some(&task_id),
                    )?,
                )?;
                Ok(SendReport {
                    task_id,
                    resolution: TaskResolution::TimedOut,
                })
            }
            PollOutcome::Cancelled => {
                self.store.append_message(
                    conversation_id,
                    status_message("Canceled.", Some(task_id))?,
                )?;
                Ok(SendReport {
                    task_id: task_id.to_owned(),
                    resolution: TaskResolution::Canceled,
                })
            }
            PollOutcome::AlreadyPolling => Err(SendError::Busy),
        }
    }

    // History and context sync

    /// Pulls the remote task list for the conversation's context and merges
    /// it into local history. A transport failure degrades to the local cache
    /// instead of erroring; history reads must not take the UI down.
    pub async fn load_history(
        &self,
        conversation_id: &str,
    ) -> Result<HistoryLoaded, OrchestratorError> {
        let conversation = self
            .store
            .conversation(conversation_id)
            .ok_or_else(|| OrchestratorError::UnknownConversation(conversation_id.to_owned()))?;
        let Some(context_id) = conversation.context_id.as_deref() else {
            return Ok(HistoryLoaded::Local);
        };

        match self.transport.list_tasks(Some(context_id)).await {
            Ok(tasks) => {
                let fallback_ts = conversation.updated_at.clone();
                for task in &tasks {
                    self.store
                        .merge_history(conversation_id, messages_from_task(task, &fallback_ts))?;
                }
                Ok(HistoryLoaded::Remote {
                    task_count: tasks.len(),
                })
            }
            Err(error) => {
                warn!(conversation_id, %error, "history load failed, serving local cache");
                Ok(HistoryLoaded::Local)
            }
        }
    }

    /// Mirrors server-side contexts that have no local conversation yet.
    /// Returns the ids of conversations created by this pass.
    pub async fn sync_contexts(&self) -> Result<Vec<String>, OrchestratorError> {
        let contexts = self.transport.list_contexts().await?;
        let mut created = Vec::new();
        for context_id in &contexts {
            if self.store.conversation_for_context(context_id).is_some() {
                continue;
            }
            let conversation = self.store.create_mirror_conversation(context_id)?;
            self.load_history(&conversation.id).await?;
            created.push(conversation.id);
        }
        Ok(created)
    }

    // Cancellation and teardown

    /// Cancels the conversation's in-flight work: fires the local cancel
    /// signal and, when a live task exists, asks the server to cancel it.
    pub async fn cancel_current_task(
        &self,
        conversation_id: &str,
    ) -> Result<(), OrchestratorError> {
        if let Some(signal) = self.cancel_signal(conversation_id) {
            signal.store(true, Ordering::Release);
        }

        let Some(record) = self.store.current_task(conversation_id) else {
            return Ok(());
        };
        if record.state.is_terminal() {
            return Ok(());
        }

        let task = self.transport.cancel_task(&record.task_id).await?;
        if let Err(error) = self.store.set_current_task(conversation_id, record_from(&task)) {
            debug!(%error, "cancel confirmation raced a settled snapshot");
        }
        self.discard_token(&record.task_id);
        self.store.end_processing(conversation_id);
        Ok(())
    }

    /// Clears a conversation on both sides. The server-side context clear is
    /// best effort; local deletion proceeds regardless so the user is never
    /// stuck with an undeletable conversation.
    pub async fn clear_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<(), OrchestratorError> {
        if let Some(signal) = self.cancel_signal(conversation_id) {
            signal.store(true, Ordering::Release);
        }
        let conversation = self
            .store
            .conversation(conversation_id)
            .ok_or_else(|| OrchestratorError::UnknownConversation(conversation_id.to_owned()))?;

        if let Some(record) = self.store.current_task(conversation_id) {
            self.discard_token(&record.task_id);
        }
        if let Some(context_id) = conversation.context_id.as_deref() {
            if let Err(error) = self.transport.clear_context(context_id).await {
                warn!(context_id, %error, "server-side context clear failed");
            }
        }
        self.store.delete_conversation(conversation_id)?;
        Ok(())
    }

    // Feedback

    /// Submits thumbs up/down for a message. Only messages the store marked
    /// feedback-eligible qualify; eligibility is consumed on success.
    pub async fn send_feedback(
        &self,
        conversation_id: &str,
        message_id: &str,
        positive: bool,
        comment: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let conversation = self
            .store
            .conversation(conversation_id)
            .ok_or_else(|| OrchestratorError::UnknownConversation(conversation_id.to_owned()))?;
        let message = conversation
            .messages
            .iter()
            .find(|message| message.id == message_id)
            .ok_or_else(|| {
                OrchestratorError::Store(chat_store::ChatStoreError::UnknownMessage {
                    conversation_id: conversation_id.to_owned(),
                    message_id: message_id.to_owned(),
                })
            })?;
        if !message.feedback_eligible {
            return Err(OrchestratorError::NotFeedbackEligible {
                message_id: message_id.to_owned(),
            });
        }
        let Some(task_id) = message.task_id.as_deref() else {
            return Err(OrchestratorError::NotFeedbackEligible {
                message_id: message_id.to_owned(),
            });
        };

        self.transport
            .send_feedback(task_id, positive, comment)
            .await?;
        self.store
            .set_feedback_eligible(conversation_id, message_id, false)?;
        Ok(())
    }

    // Plain HTTP passthrough

    pub async fn agent_card(&self) -> Result<AgentCard, OrchestratorError> {
        Ok(self.transport.agent_card().await?)
    }

    pub async fn health(&self) -> Result<HealthStatus, OrchestratorError> {
        Ok(self.transport.health().await?)
    }

    // Internals

    fn held_token(&self, task_id: &str) -> Option<String> {
        lock_unpoisoned(&self.payment_tokens).get(task_id).cloned()
    }

    fn hold_token(&self, task_id: &str, token: String) {
        lock_unpoisoned(&self.payment_tokens).insert(task_id.to_owned(), token);
    }

    fn rekey_token(&self, from: &str, to: &str) {
        let mut tokens = lock_unpoisoned(&self.payment_tokens);
        if let Some(token) = tokens.remove(from) {
            tokens.insert(to.to_owned(), token);
        }
    }

    fn discard_token(&self, task_id: &str) {
        if lock_unpoisoned(&self.payment_tokens).remove(task_id).is_some() {
            debug!(task_id, "payment token discarded");
        }
    }

    fn register_cancel(&self, conversation_id: &str) -> CancelSignal {
        let signal: CancelSignal = Arc::new(AtomicBool::new(false));
        lock_unpoisoned(&self.cancels).insert(conversation_id.to_owned(), Arc::clone(&signal));
        signal
    }

    fn release_cancel(&self, conversation_id: &str) {
        lock_unpoisoned(&self.cancels).remove(conversation_id);
    }

    fn cancel_signal(&self, conversation_id: &str) -> Option<CancelSignal> {
        lock_unpoisoned(&self.cancels).get(conversation_id).cloned()
    }
}

/// Exclusive per-conversation send slot, released on drop so every exit path
/// of a send leaves the conversation sendable again.
struct SendPermit<'a> {
    store: &'a ChatStore,
    conversation_id: String,
}

impl<'a> SendPermit<'a> {
    fn acquire(store: &'a ChatStore, conversation_id: &str) -> Option<Self> {
        store.try_begin_processing(conversation_id).then(|| Self {
            store,
            conversation_id: conversation_id.to_owned(),
        })
    }
}

impl Drop for SendPermit<'_> {
    fn drop(&mut self) {
        self.store.end_processing(&self.conversation_id);
    }
}

fn record_from(task: &Task) -> TaskRecord {
    TaskRecord {
        task_id: task.id.clone(),
        context_id: task.context_id.clone(),
        state: task.status.state,
        state_timestamp: task.status.timestamp.clone(),
    }
}

fn settled_outcome(task: Task) -> PollOutcome {
    if task.status.state.is_terminal() {
        PollOutcome::Terminal(task)
    } else {
        PollOutcome::InputPending(task)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use a2a_api::{
        AgentApiError, PaymentSessionStart, PaymentState, PaymentStatus, Task, TaskState,
        TaskStatus,
    };
    use chat_store::ChatStore;

    use crate::auth::InterruptUi;
    use crate::payment::PaymentFlow;
    use crate::poller::TaskPoller;
    use crate::transport::AgentTransport;
    use crate::transports::MockTransport;

    use super::{lock_unpoisoned, ChatOrchestrator, TaskResolution};

    struct SilentUi;

    #[async_trait]
    impl InterruptUi for SilentUi {
        async fn request_credential(&self) -> Option<String> {
            None
        }

        async fn open_payment_url(&self, _url: &str) {}
    }

    fn working_task(id: &str) -> Task {
        Task {
            id: id.to_owned(),
            context_id: "c-1".to_owned(),
            status: TaskStatus {
                state: TaskState::Working,
                timestamp: Some("2024-05-01T10:00:00Z".to_owned()),
                message: None,
            },
            artifacts: Vec::new(),
            history: Vec::new(),
        }
    }

    fn orchestrator(
        transport: &Arc<MockTransport>,
        store: &Arc<ChatStore>,
    ) -> ChatOrchestrator {
        let poller = TaskPoller::with_budget(
            Arc::clone(transport) as Arc<dyn AgentTransport>,
            Duration::from_millis(1),
            3,
        );
        let payment = PaymentFlow::with_budget(
            Arc::clone(transport) as Arc<dyn AgentTransport>,
            Duration::from_millis(1),
            3,
        );
        ChatOrchestrator::with_components(
            Arc::clone(transport) as Arc<dyn AgentTransport>,
            Arc::clone(store),
            Arc::new(SilentUi),
            poller,
            payment,
        )
    }

    #[tokio::test]
    async fn timed_out_task_discards_its_held_payment_token() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(ChatStore::open(dir.path()).expect("store opens"));
        let transport = Arc::new(MockTransport::new());
        let orchestrator = orchestrator(&transport, &store);
        let conversation = store.create_conversation().expect("conversation");

        transport.script_send_err(AgentApiError::PaymentRequired { data: None });
        transport.script_send_ok(working_task("t-1"));
        transport.script_payment_session(PaymentSessionStart {
            session_id: "s-1".to_owned(),
            payment_url: "https://pay.example/s-1".to_owned(),
        });
        transport.script_payment_status(PaymentStatus {
            status: PaymentState::Completed,
            payment_token: Some("tok-1".to_owned()),
        });
        // A single working snapshot repeats until the attempt ceiling.
        transport.script_snapshot(working_task("t-1"));

        let report = orchestrator
            .send_message(&conversation.id, "Premium question", None)
            .await
            .expect("send resolves");
        assert_eq!(report.resolution, TaskResolution::TimedOut);

        // The association is gone, so the token must not linger either.
        assert!(lock_unpoisoned(&orchestrator.payment_tokens).is_empty());
    }
}
