use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use a2a_api::TaskState;

use crate::error::ChatStoreError;
use crate::paths::{conversation_path, conversations_dir, settings_path, state_path};
use crate::schema::{
    ClientState, DeliveryStatus, Role, Settings, StoredConversation, StoredMessage, TaskRecord,
    UNTITLED_CONVERSATION,
};

const TITLE_MAX_CHARS: usize = 48;

pub type SubscriberId = u64;

type Subscriber = Box<dyn Fn(&StoreEvent) + Send + Sync>;

/// Change notification emitted synchronously after each mutation.
///
/// Subscribers run outside the data lock and must not mutate the store from
/// within their callback; the render layer reads back through the getters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConversationUpserted { conversation_id: String },
    ConversationDeleted { conversation_id: String },
    MessagesChanged { conversation_id: String },
    TaskChanged { conversation_id: String },
    ProcessingChanged {
        conversation_id: String,
        processing: bool,
    },
    SettingsChanged,
    ActiveConversationChanged {
        conversation_id: Option<String>,
    },
}

#[derive(Default)]
struct StoreInner {
    conversations: HashMap<String, StoredConversation>,
    current_tasks: HashMap<String, TaskRecord>,
    terminal_task_ids: HashSet<String>,
    processing: HashSet<String>,
    settings: Settings,
    state: ClientState,
}

/// Single mutable source of truth for conversations, messages, task
/// bookkeeping, and settings. All mutation goes through explicit setters that
/// persist the affected file and then notify subscribers.
pub struct ChatStore {
    root: PathBuf,
    inner: Mutex<StoreInner>,
    subscribers: Mutex<Vec<(SubscriberId, Subscriber)>>,
    next_subscriber_id: AtomicU64,
}

impl ChatStore {
    /// Opens a store rooted at `root`, loading whatever persisted state is
    /// present. Unreadable conversation files are skipped, not fatal: a
    /// damaged cache must never block conversation use.
    pub fn open(root: &Path) -> Result<Self, ChatStoreError> {
        fs::create_dir_all(conversations_dir(root))
            .map_err(|source| ChatStoreError::io("creating store root", root, source))?;

        let mut inner = StoreInner {
            settings: load_json_or_default(&settings_path(root)),
            state: load_json_or_default(&state_path(root)),
            ..StoreInner::default()
        };

        let dir = conversations_dir(root);
        let entries = fs::read_dir(&dir)
            .map_err(|source| ChatStoreError::io("reading conversations dir", &dir, source))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|error| error.to_string())
                .and_then(|raw| {
                    serde_json::from_str::<StoredConversation>(&raw).map_err(|error| error.to_string())
                }) {
                Ok(conversation) => {
                    inner.conversations.insert(conversation.id.clone(), conversation);
                }
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable conversation file");
                }
            }
        }
        debug!(conversations = inner.conversations.len(), "store opened");

        Ok(Self {
            root: root.to_path_buf(),
            inner: Mutex::new(inner),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subscribe(&self, callback: impl Fn(&StoreEvent) + Send + Sync + 'static) -> SubscriberId {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        lock_unpoisoned(&self.subscribers).push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        lock_unpoisoned(&self.subscribers).retain(|(existing, _)| *existing != id);
    }

    fn notify(&self, event: StoreEvent) {
        let subscribers = lock_unpoisoned(&self.subscribers);
        for (_, callback) in subscribers.iter() {
            callback(&event);
        }
    }

    // Conversations

    pub fn create_conversation(&self) -> Result<StoredConversation, ChatStoreError> {
        let now = now_rfc3339()?;
        let conversation = StoredConversation {
            id: Uuid::new_v4().to_string(),
            title: UNTITLED_CONVERSATION.to_owned(),
            created_at: now.clone(),
            updated_at: now,
            message_count: 0,
            context_id: None,
            mirrors_context: false,
            messages: Vec::new(),
        };

        {
            let mut inner = lock_unpoisoned(&self.inner);
            inner
                .conversations
                .insert(conversation.id.clone(), conversation.clone());
        }
        self.persist_conversation(&conversation)?;
        self.notify(StoreEvent::ConversationUpserted {
            conversation_id: conversation.id.clone(),
        });
        Ok(conversation)
    }

    /// Creates (or returns) the local conversation mirroring a server-side
    /// Context.
    pub fn create_mirror_conversation(
        &self,
        context_id: &str,
    ) -> Result<StoredConversation, ChatStoreError> {
        if let Some(existing) = self.conversation_for_context(context_id) {
            return Ok(existing);
        }

        let now = now_rfc3339()?;
        let conversation = StoredConversation {
            id: Uuid::new_v4().to_string(),
            title: UNTITLED_CONVERSATION.to_owned(),
            created_at: now.clone(),
            updated_at: now,
            message_count: 0,
            context_id: Some(context_id.to_owned()),
            mirrors_context: true,
            messages: Vec::new(),
        };

        {
            let mut inner = lock_unpoisoned(&self.inner);
            inner
                .conversations
                .insert(conversation.id.clone(), conversation.clone());
        }
        self.persist_conversation(&conversation)?;
        self.notify(StoreEvent::ConversationUpserted {
            conversation_id: conversation.id.clone(),
        });
        Ok(conversation)
    }

    #[must_use]
    pub fn conversation(&self, conversation_id: &str) -> Option<StoredConversation> {
        lock_unpoisoned(&self.inner)
            .conversations
            .get(conversation_id)
            .cloned()
    }

    #[must_use]
    pub fn conversation_for_context(&self, context_id: &str) -> Option<StoredConversation> {
        lock_unpoisoned(&self.inner)
            .conversations
            .values()
            .find(|conversation| conversation.context_id.as_deref() == Some(context_id))
            .cloned()
    }

    /// All conversations, most recently updated first.
    #[must_use]
    pub fn conversations(&self) -> Vec<StoredConversation> {
        let mut all: Vec<StoredConversation> = lock_unpoisoned(&self.inner)
            .conversations
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|conversation| Reverse(conversation.updated_at.clone()));
        all
    }

    pub fn delete_conversation(&self, conversation_id: &str) -> Result<(), ChatStoreError> {
        let removed = {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.current_tasks.remove(conversation_id);
            inner.processing.remove(conversation_id);
            if inner.state.active_conversation_id.as_deref() == Some(conversation_id) {
                inner.state.active_conversation_id = None;
            }
            inner.conversations.remove(conversation_id)
        };
        if removed.is_none() {
            return Err(ChatStoreError::UnknownConversation {
                id: conversation_id.to_owned(),
            });
        }

        let path = conversation_path(&self.root, conversation_id);
        if path.exists() {
            fs::remove_file(&path)
                .map_err(|source| ChatStoreError::io("deleting conversation file", &path, source))?;
        }
        self.persist_state()?;
        self.notify(StoreEvent::ConversationDeleted {
            conversation_id: conversation_id.to_owned(),
        });
        Ok(())
    }

    pub fn set_context_id(
        &self,
        conversation_id: &str,
        context_id: &str,
    ) -> Result<(), ChatStoreError> {
        let conversation = {
            let mut inner = lock_unpoisoned(&self.inner);
            let conversation = inner.conversations.get_mut(conversation_id).ok_or_else(|| {
                ChatStoreError::UnknownConversation {
                    id: conversation_id.to_owned(),
                }
            })?;
            if conversation.context_id.as_deref() == Some(context_id) {
                return Ok(());
            }
            conversation.context_id = Some(context_id.to_owned());
            conversation.clone()
        };
        self.persist_conversation(&conversation)?;
        self.notify(StoreEvent::ConversationUpserted {
            conversation_id: conversation_id.to_owned(),
        });
        Ok(())
    }

    // Messages

    /// Appends a message. Re-ingesting a known message id is a no-op; the
    /// return value reports whether anything was inserted.
    pub fn append_message(
        &self,
        conversation_id: &str,
        message: StoredMessage,
    ) -> Result<bool, ChatStoreError> {
        let now = now_rfc3339()?;
        let conversation = {
            let mut inner = lock_unpoisoned(&self.inner);
            let conversation = inner.conversations.get_mut(conversation_id).ok_or_else(|| {
                ChatStoreError::UnknownConversation {
                    id: conversation_id.to_owned(),
                }
            })?;
            if conversation
                .messages
                .iter()
                .any(|existing| existing.id == message.id)
            {
                return Ok(false);
            }
            conversation.messages.push(message);
            conversation.message_count = conversation.messages.len();
            conversation.updated_at = now;
            conversation.clone()
        };
        self.persist_conversation(&conversation)?;
        self.notify(StoreEvent::MessagesChanged {
            conversation_id: conversation_id.to_owned(),
        });
        Ok(true)
    }

    /// Updates a message's delivery status.
    ///
    /// The conversation title is computed exactly once: when a user message
    /// transitions to `sent` while the conversation is still untitled.
    pub fn set_delivery(
        &self,
        conversation_id: &str,
        message_id: &str,
        delivery: DeliveryStatus,
    ) -> Result<(), ChatStoreError> {
        let conversation = {
            let mut inner = lock_unpoisoned(&self.inner);
            let conversation = inner.conversations.get_mut(conversation_id).ok_or_else(|| {
                ChatStoreError::UnknownConversation {
                    id: conversation_id.to_owned(),
                }
            })?;
            let message = conversation
                .messages
                .iter_mut()
                .find(|message| message.id == message_id)
                .ok_or_else(|| ChatStoreError::UnknownMessage {
                    conversation_id: conversation_id.to_owned(),
                    message_id: message_id.to_owned(),
                })?;
            let became_sent =
                message.delivery != DeliveryStatus::Sent && delivery == DeliveryStatus::Sent;
            message.delivery = delivery;
            let is_user = message.role == Role::User;
            let text = message.joined_text();

            if became_sent && is_user && conversation.title == UNTITLED_CONVERSATION {
                conversation.title = derive_title(&text);
            }
            conversation.clone()
        };
        self.persist_conversation(&conversation)?;
        self.notify(StoreEvent::MessagesChanged {
            conversation_id: conversation_id.to_owned(),
        });
        Ok(())
    }

    pub fn set_feedback_eligible(
        &self,
        conversation_id: &str,
        message_id: &str,
        eligible: bool,
    ) -> Result<(), ChatStoreError> {
        let conversation = {
            let mut inner = lock_unpoisoned(&self.inner);
            let conversation = inner.conversations.get_mut(conversation_id).ok_or_else(|| {
                ChatStoreError::UnknownConversation {
                    id: conversation_id.to_owned(),
                }
            })?;
            let message = conversation
                .messages
                .iter_mut()
                .find(|message| message.id == message_id)
                .ok_or_else(|| ChatStoreError::UnknownMessage {
                    conversation_id: conversation_id.to_owned(),
                    message_id: message_id.to_owned(),
                })?;
            message.feedback_eligible = eligible;
            conversation.clone()
        };
        self.persist_conversation(&conversation)?;
        self.notify(StoreEvent::MessagesChanged {
            conversation_id: conversation_id.to_owned(),
        });
        Ok(())
    }

    /// Merges server-reported history into a conversation without assuming
    /// the server is newer or more complete than local optimistic state.
    ///
    /// Messages with known ids are skipped; the merged set is then stable-
    /// sorted by timestamp. Unparseable timestamps inherit the position of
    /// the nearest preceding parseable message, so their relative insertion
    /// order is preserved rather than throwing.
    pub fn merge_history(
        &self,
        conversation_id: &str,
        incoming: Vec<StoredMessage>,
    ) -> Result<usize, ChatStoreError> {
        let now = now_rfc3339()?;
        let (conversation, inserted) = {
            let mut inner = lock_unpoisoned(&self.inner);
            let conversation = inner.conversations.get_mut(conversation_id).ok_or_else(|| {
                ChatStoreError::UnknownConversation {
                    id: conversation_id.to_owned(),
                }
            })?;

            let known: HashSet<String> = conversation
                .messages
                .iter()
                .map(|message| message.id.clone())
                .collect();
            let mut inserted = 0usize;
            for message in incoming {
                if known.contains(&message.id) {
                    continue;
                }
                conversation.messages.push(message);
                inserted += 1;
            }

            sort_by_timestamp(&mut conversation.messages);
            conversation.message_count = conversation.messages.len();
            if inserted > 0 {
                conversation.updated_at = now;
            }
            (conversation.clone(), inserted)
        };

        if inserted > 0 {
            self.persist_conversation(&conversation)?;
            self.notify(StoreEvent::MessagesChanged {
                conversation_id: conversation_id.to_owned(),
            });
        }
        Ok(inserted)
    }

    // Task bookkeeping

    /// Records the current task of a conversation. A task id already observed
    /// in a terminal state is read-only and must not be re-recorded.
    pub fn set_current_task(
        &self,
        conversation_id: &str,
        record: TaskRecord,
    ) -> Result<(), ChatStoreError> {
        {
            let mut inner = lock_unpoisoned(&self.inner);
            if inner.terminal_task_ids.contains(&record.task_id) {
                return Err(ChatStoreError::TerminalTaskOverwrite {
                    task_id: record.task_id,
                });
            }
            if record.state.is_terminal() {
                inner.terminal_task_ids.insert(record.task_id.clone());
            }
            inner
                .current_tasks
                .insert(conversation_id.to_owned(), record);
        }
        self.notify(StoreEvent::TaskChanged {
            conversation_id: conversation_id.to_owned(),
        });
        Ok(())
    }

    #[must_use]
    pub fn current_task(&self, conversation_id: &str) -> Option<TaskRecord> {
        lock_unpoisoned(&self.inner)
            .current_tasks
            .get(conversation_id)
            .cloned()
    }

    pub fn clear_current_task(&self, conversation_id: &str) {
        let removed = lock_unpoisoned(&self.inner)
            .current_tasks
            .remove(conversation_id)
            .is_some();
        if removed {
            self.notify(StoreEvent::TaskChanged {
                conversation_id: conversation_id.to_owned(),
            });
        }
    }

    #[must_use]
    pub fn is_terminal_task(&self, task_id: &str) -> bool {
        lock_unpoisoned(&self.inner)
            .terminal_task_ids
            .contains(task_id)
    }

    // Processing flag

    /// Claims the per-conversation processing marker. Returns false when a
    /// send is already outstanding for this conversation.
    pub fn try_begin_processing(&self, conversation_id: &str) -> bool {
        let claimed = lock_unpoisoned(&self.inner)
            .processing
            .insert(conversation_id.to_owned());
        if claimed {
            self.notify(StoreEvent::ProcessingChanged {
                conversation_id: conversation_id.to_owned(),
                processing: true,
            });
        }
        claimed
    }

    pub fn end_processing(&self, conversation_id: &str) {
        let released = lock_unpoisoned(&self.inner)
            .processing
            .remove(conversation_id);
        if released {
            self.notify(StoreEvent::ProcessingChanged {
                conversation_id: conversation_id.to_owned(),
                processing: false,
            });
        }
    }

    #[must_use]
    pub fn is_processing(&self, conversation_id: &str) -> bool {
        lock_unpoisoned(&self.inner)
            .processing
            .contains(conversation_id)
    }

    // Settings and client state

    #[must_use]
    pub fn settings(&self) -> Settings {
        lock_unpoisoned(&self.inner).settings.clone()
    }

    pub fn set_settings(&self, settings: Settings) -> Result<(), ChatStoreError> {
        {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.settings = settings;
        }
        self.persist_settings()?;
        self.notify(StoreEvent::SettingsChanged);
        Ok(())
    }

    pub fn set_bearer_token(&self, token: Option<String>) -> Result<(), ChatStoreError> {
        {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.settings.bearer_token = token;
        }
        self.persist_settings()?;
        self.notify(StoreEvent::SettingsChanged);
        Ok(())
    }

    #[must_use]
    pub fn active_conversation(&self) -> Option<String> {
        lock_unpoisoned(&self.inner)
            .state
            .active_conversation_id
            .clone()
    }

    pub fn set_active_conversation(
        &self,
        conversation_id: Option<String>,
    ) -> Result<(), ChatStoreError> {
        {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.state.active_conversation_id = conversation_id.clone();
        }
        self.persist_state()?;
        self.notify(StoreEvent::ActiveConversationChanged { conversation_id });
        Ok(())
    }

    #[must_use]
    pub fn theme(&self) -> String {
        lock_unpoisoned(&self.inner).state.theme.clone()
    }

    pub fn set_theme(&self, theme: impl Into<String>) -> Result<(), ChatStoreError> {
        {
            let mut inner = lock_unpoisoned(&self.inner);
            inner.state.theme = theme.into();
        }
        self.persist_state()?;
        self.notify(StoreEvent::SettingsChanged);
        Ok(())
    }

    // Persistence

    fn persist_conversation(&self, conversation: &StoredConversation) -> Result<(), ChatStoreError> {
        let path = conversation_path(&self.root, &conversation.id);
        write_json(&path, conversation)
    }

    fn persist_settings(&self) -> Result<(), ChatStoreError> {
        let settings = lock_unpoisoned(&self.inner).settings.clone();
        write_json(&settings_path(&self.root), &settings)
    }

    fn persist_state(&self) -> Result<(), ChatStoreError> {
        let state = lock_unpoisoned(&self.inner).state.clone();
        write_json(&state_path(&self.root), &state)
    }
}

/// Current UTC time as an RFC3339 string.
pub fn now_rfc3339() -> Result<String, ChatStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(ChatStoreError::ClockFormat)
}

/// Derives a conversation title from its first sent user message.
#[must_use]
pub fn derive_title(text: &str) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.is_empty() {
        return UNTITLED_CONVERSATION.to_owned();
    }
    if flattened.chars().count() <= TITLE_MAX_CHARS {
        return flattened;
    }
    let truncated: String = flattened.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}…", truncated.trim_end())
}

fn parse_ts(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

fn sort_by_timestamp(messages: &mut [StoredMessage]) {
    // Decorate with a carry-forward timestamp so unparseable entries anchor
    // to the nearest preceding parseable message, then stable-sort. This
    // keeps the comparator total while preserving insertion order for ties.
    let mut effective = Vec::with_capacity(messages.len());
    let mut last = OffsetDateTime::UNIX_EPOCH;
    for message in messages.iter() {
        if let Some(parsed) = parse_ts(&message.ts) {
            last = parsed;
        }
        effective.push(last);
    }

    let mut order: Vec<usize> = (0..messages.len()).collect();
    order.sort_by_key(|&index| effective[index]);

    let mut reordered: Vec<Option<StoredMessage>> =
        messages.iter().cloned().map(Some).collect();
    for (slot, &index) in order.iter().enumerate() {
        if let Some(message) = reordered[index].take() {
            messages[slot] = message;
        }
    }
}

fn load_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(error) => {
                warn!(path = %path.display(), %error, "unreadable store file, using defaults");
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ChatStoreError> {
    let raw = serde_json::to_string_pretty(value)
        .map_err(|source| ChatStoreError::json_serialize(path, source))?;
    fs::write(path, raw).map_err(|source| ChatStoreError::io("writing store file", path, source))
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::{derive_title, sort_by_timestamp};
    use crate::schema::{DeliveryStatus, Role, StoredMessage, StoredPart, UNTITLED_CONVERSATION};

    fn message(id: &str, ts: &str) -> StoredMessage {
        StoredMessage {
            id: id.to_owned(),
            role: Role::Agent,
            parts: vec![StoredPart::text(id)],
            ts: ts.to_owned(),
            delivery: DeliveryStatus::Sent,
            task_id: None,
            feedback_eligible: false,
        }
    }

    #[test]
    fn derive_title_truncates_and_flattens_whitespace() {
        assert_eq!(derive_title("  hello\n  world  "), "hello world");
        assert_eq!(derive_title(""), UNTITLED_CONVERSATION);

        let long = "x".repeat(100);
        let title = derive_title(&long);
        assert!(title.chars().count() <= 49);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn sort_orders_by_timestamp_with_stable_ties() {
        let mut messages = vec![
            message("b", "2024-05-01T10:00:02Z"),
            message("a", "2024-05-01T10:00:01Z"),
            message("a2", "2024-05-01T10:00:01Z"),
        ];
        sort_by_timestamp(&mut messages);
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "a2", "b"]);
    }

    #[test]
    fn unparseable_timestamps_keep_relative_insertion_order() {
        let mut messages = vec![
            message("first", "2024-05-01T10:00:01Z"),
            message("odd-1", "not-a-timestamp"),
            message("odd-2", ""),
            message("last", "2024-05-01T10:00:05Z"),
        ];
        sort_by_timestamp(&mut messages);
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["first", "odd-1", "odd-2", "last"]);
    }
}
