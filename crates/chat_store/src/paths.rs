use std::path::{Path, PathBuf};

pub const CONVERSATIONS_DIR: &str = "conversations";
pub const SETTINGS_FILE: &str = "settings.json";
pub const STATE_FILE: &str = "state.json";

#[must_use]
pub fn settings_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_FILE)
}

#[must_use]
pub fn state_path(root: &Path) -> PathBuf {
    root.join(STATE_FILE)
}

#[must_use]
pub fn conversations_dir(root: &Path) -> PathBuf {
    root.join(CONVERSATIONS_DIR)
}

#[must_use]
pub fn sanitize_id_for_filename(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' | '.' => '-',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn conversation_path(root: &Path, conversation_id: &str) -> PathBuf {
    conversations_dir(root).join(format!("{}.json", sanitize_id_for_filename(conversation_id)))
}
