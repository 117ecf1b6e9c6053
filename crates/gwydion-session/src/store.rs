//! The message-store contract and the in-memory reference store.
//!
//! The orchestrator persists a snapshot of the full message list after each
//! history append and each finish. Stores are pluggable; a lost save call
//! must never disturb the session loop, so implementations log and absorb
//! their own transient failures where they can.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use gwydion_llm::{Message, Usage};

use crate::error::Result;

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot & Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// A point-in-time projection of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session id.
    pub id: String,
    /// Agent type the session runs as.
    pub agent_type: String,
    /// Optional human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Full message history.
    pub messages: Vec<Message>,
    /// Accumulated token usage.
    pub usage: Usage,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the snapshot was taken.
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// Create a snapshot stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        agent_type: impl Into<String>,
        messages: Vec<Message>,
        usage: Usage,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            title: None,
            messages,
            usage,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Derive the listing metadata for this snapshot.
    pub fn meta(&self) -> SessionMeta {
        SessionMeta {
            id: self.id.clone(),
            title: self.title.clone(),
            agent_type: self.agent_type.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            total_usage: self.usage,
        }
    }
}

/// Listing metadata for a stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Session id.
    pub id: String,
    /// Optional human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Agent type the session ran as.
    pub agent_type: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last updated.
    pub updated_at: DateTime<Utc>,
    /// Accumulated token usage.
    pub total_usage: Usage,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Pluggable persistence for session snapshots.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a snapshot, replacing any prior one for the same id.
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Load the snapshot for a session, if one exists.
    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>>;

    /// List metadata for every stored session.
    async fn list(&self) -> Result<Vec<SessionMeta>>;

    /// Delete a stored session. Deleting a missing session is not an error.
    async fn delete(&self, session_id: &str) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// An in-memory store for tests and embedding without persistence.
///
/// The first save for a given id fixes `created_at`; later saves only move
/// `updated_at` forward.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, SessionSnapshot>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let mut stored = snapshot.clone();
        if let Some(existing) = sessions.get(&snapshot.id) {
            stored.created_at = existing.created_at;
        }
        stored.updated_at = Utc::now();
        sessions.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionMeta>> {
        let mut metas: Vec<SessionMeta> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .map(SessionSnapshot::meta)
            .collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gwydion_llm::ContentBlock;

    fn snapshot(id: &str) -> SessionSnapshot {
        SessionSnapshot::new(
            id,
            "general",
            vec![
                Message::user("hi"),
                Message::assistant("hello"),
            ],
            Usage::new(10, 5),
        )
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let store = MemoryStore::new();
        store.save(&snapshot("s1")).await.unwrap();

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "s1");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.usage.total(), 15);

        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_preserves_created_at() {
        let store = MemoryStore::new();
        store.save(&snapshot("s1")).await.unwrap();
        let first = store.load("s1").await.unwrap().unwrap();

        let mut updated = snapshot("s1");
        updated
            .messages
            .push(Message::tool_results(vec![ContentBlock::tool_result(
                "c1", "read", "data",
            )]));
        store.save(&updated).await.unwrap();

        let second = store.load("s1").await.unwrap().unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.messages.len(), 3);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn test_list_returns_meta_newest_first() {
        let store = MemoryStore::new();
        store.save(&snapshot("older")).await.unwrap();
        store
            .save(&snapshot("newer").with_title("the newer one"))
            .await
            .unwrap();

        let metas = store.list().await.unwrap();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].id, "newer");
        assert_eq!(metas[0].title.as_deref(), Some("the newer one"));
        assert_eq!(metas[0].total_usage.total(), 15);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.save(&snapshot("s1")).await.unwrap();

        store.delete("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
        store.delete("s1").await.unwrap();
    }
}
