mod error;
mod paths;
mod schema;
mod store;

pub use error::ChatStoreError;
pub use paths::{conversation_path, conversations_dir, settings_path, state_path};
pub use schema::{
    ClientState, DeliveryStatus, Role, Settings, StoredConversation, StoredMessage, StoredPart,
    TaskRecord, UNTITLED_CONVERSATION,
};
pub use store::{derive_title, now_rfc3339, ChatStore, StoreEvent, SubscriberId};
