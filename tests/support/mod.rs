//! Shared fixtures: scripted interrupt UI, orchestrator assembly with tight
//! wait budgets, and wire-shape builders.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use agent_chat::a2a_api::{
    Part, PaymentSessionStart, PaymentState, PaymentStatus, ProtocolMessage, Task, TaskState,
    TaskStatus, WireRole,
};
use agent_chat::chat_store::ChatStore;
use agent_chat::{
    ChatOrchestrator, InterruptUi, MockTransport, PaymentFlow, TaskPoller,
};

/// Interrupt surface that answers from a script and records what it was
/// asked to show.
#[derive(Default)]
pub struct ScriptedUi {
    credential: Mutex<Option<String>>,
    pub opened_urls: Mutex<Vec<String>>,
}

impl ScriptedUi {
    pub fn with_credential(credential: &str) -> Self {
        Self {
            credential: Mutex::new(Some(credential.to_owned())),
            opened_urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl InterruptUi for ScriptedUi {
    async fn request_credential(&self) -> Option<String> {
        self.credential.lock().ok()?.clone()
    }

    async fn open_payment_url(&self, url: &str) {
        if let Ok(mut opened) = self.opened_urls.lock() {
            opened.push(url.to_owned());
        }
    }
}

pub struct Harness {
    pub orchestrator: ChatOrchestrator,
    pub transport: Arc<MockTransport>,
    pub store: Arc<ChatStore>,
    pub ui: Arc<ScriptedUi>,
    _dir: TempDir,
}

/// Builds an orchestrator over a scripted transport with millisecond wait
/// budgets so bounded loops finish fast.
pub fn harness_with_ui(ui: ScriptedUi) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(ChatStore::open(dir.path()).expect("open store"));
    let transport = Arc::new(MockTransport::new());
    let ui = Arc::new(ui);

    let poller = TaskPoller::with_budget(
        Arc::clone(&transport) as Arc<dyn agent_chat::AgentTransport>,
        Duration::from_millis(1),
        10,
    );
    let payment = PaymentFlow::with_budget(
        Arc::clone(&transport) as Arc<dyn agent_chat::AgentTransport>,
        Duration::from_millis(1),
        10,
    );
    let orchestrator = ChatOrchestrator::with_components(
        Arc::clone(&transport) as Arc<dyn agent_chat::AgentTransport>,
        Arc::clone(&store),
        Arc::clone(&ui) as Arc<dyn InterruptUi>,
        poller,
        payment,
    );

    Harness {
        orchestrator,
        transport,
        store,
        ui,
        _dir: dir,
    }
}

pub fn harness() -> Harness {
    harness_with_ui(ScriptedUi::default())
}

pub fn task(id: &str, context_id: &str, state: TaskState) -> Task {
    Task {
        id: id.to_owned(),
        context_id: context_id.to_owned(),
        status: TaskStatus {
            state,
            timestamp: Some("2024-05-01T10:00:00Z".to_owned()),
            message: None,
        },
        artifacts: Vec::new(),
        history: Vec::new(),
    }
}

pub fn agent_reply(task: &mut Task, message_id: &str, text: &str, ts: &str) {
    task.history.push(ProtocolMessage {
        role: WireRole::Agent,
        parts: vec![Part::text(text)],
        message_id: message_id.to_owned(),
        context_id: Some(task.context_id.clone()),
        task_id: Some(task.id.clone()),
        reference_task_ids: Vec::new(),
        timestamp: Some(ts.to_owned()),
        metadata: None,
    });
}

pub fn payment_session(session_id: &str) -> PaymentSessionStart {
    PaymentSessionStart {
        session_id: session_id.to_owned(),
        payment_url: format!("https://pay.example/{session_id}"),
    }
}

pub fn payment_completed(token: &str) -> PaymentStatus {
    PaymentStatus {
        status: PaymentState::Completed,
        payment_token: Some(token.to_owned()),
    }
}
