//! JSON-on-disk message store: one `<session-id>.json` per session.
//!
//! The reference persistence format is a direct JSON projection of the
//! canonical message model.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::store::{MessageStore, SessionMeta, SessionSnapshot};

/// File-backed store writing one pretty-printed JSON file per session.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `dir`. The directory is created on first
    /// save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory sessions are stored in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        // Session ids are UUIDs; sanitize anyway so a hostile id cannot
        // escape the store directory.
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl MessageStore for JsonFileStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut stored = snapshot.clone();
        stored.updated_at = chrono::Utc::now();

        // Keep the original creation time across saves.
        if let Ok(Some(existing)) = self.load(&snapshot.id).await {
            stored.created_at = existing.created_at;
        }

        let path = self.path_for(&stored.id);
        let body = serde_json::to_vec_pretty(&stored)?;

        // Write-then-rename so a crash mid-write never leaves a torn file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(session = %stored.id, path = %path.display(), "session saved");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        let path = self.path_for(session_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<SessionMeta>> {
        let mut metas = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(metas),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<SessionSnapshot>(&bytes) {
                    Ok(snapshot) => metas.push(snapshot.meta()),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable session file");
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable session file");
                }
            }
        }

        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gwydion_llm::{ContentBlock, Message, Usage};

    fn snapshot(id: &str) -> SessionSnapshot {
        let mut assistant = Message::assistant("let me read that");
        assistant.push_tool_use("c1", "read", serde_json::json!({"path": "/x"}));

        SessionSnapshot::new(
            id,
            "build",
            vec![
                Message::user("read /x"),
                assistant,
                Message::tool_results(vec![ContentBlock::tool_result("c1", "read", "data")]),
            ],
            Usage::new(100, 40),
        )
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        store.save(&snapshot("abc-123")).await.unwrap();
        let loaded = store.load("abc-123").await.unwrap().unwrap();

        assert_eq!(loaded.agent_type, "build");
        assert_eq!(loaded.messages.len(), 3);
        assert!(loaded.messages[1].has_tool_use());
        assert_eq!(loaded.usage.input_tokens, 100);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        store.save(&snapshot("one")).await.unwrap();
        store.save(&snapshot("two")).await.unwrap();

        let metas = store.list().await.unwrap();
        assert_eq!(metas.len(), 2);

        store.delete("one").await.unwrap();
        let metas = store.list().await.unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].id, "two");

        // Deleting a missing session is fine.
        store.delete("one").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_with_no_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("never-created"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hostile_id_stays_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        store.save(&snapshot("../escape")).await.unwrap();
        let loaded = store.load("../escape").await.unwrap().unwrap();
        assert_eq!(loaded.id, "../escape");

        // The file itself lives inside the store directory.
        let metas = store.list().await.unwrap();
        assert_eq!(metas.len(), 1);
    }
}
