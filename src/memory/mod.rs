use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::llm::provider::AssistantMessage;

const LEGACY_SESSION_ID: &str = "kerala_farmer_assistant_v1";

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Key of one conversation's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSessionId;

impl Display for InvalidSessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "session id must not be empty")
    }
}

impl Error for InvalidSessionId {}

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidSessionId> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(InvalidSessionId);
        }
        Ok(Self(id))
    }

    /// `<millis>-<pid>-<counter>`, all lowercase hex.
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_millis());
        let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{millis:x}-{:x}-{counter:x}", std::process::id()))
    }

    /// The single shared id older deployments used for every user.
    pub fn legacy() -> Self {
        Self(LEGACY_SESSION_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// In-process conversation histories, one append-only log per session.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    sessions: Arc<Mutex<HashMap<SessionId, Vec<AssistantMessage>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, id: &SessionId) -> Vec<AssistantMessage> {
        self.lock().get(id).cloned().unwrap_or_default()
    }

    pub fn append(&self, id: &SessionId, messages: impl IntoIterator<Item = AssistantMessage>) {
        self.lock().entry(id.clone()).or_default().extend(messages);
    }

    pub fn reset(&self, id: &SessionId) {
        self.lock().remove(id);
    }

    pub fn message_count(&self, id: &SessionId) -> usize {
        self.lock().get(id).map_or(0, Vec::len)
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids = self.lock().keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    // A panic while holding the lock leaves whole messages behind, so the map stays usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Vec<AssistantMessage>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
