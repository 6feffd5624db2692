//! Durable mapping store: one JSON document holding conversation mappings,
//! recent WhatsApp conversations, and contact overrides.
//!
//! Every operation re-reads the document from disk before acting; mutations
//! rewrite the whole document and only then replace the in-memory copy, so a
//! failed write never leaves a partial mapping behind. An exclusive lock file
//! keeps a second bridge process off the same document.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Most-recent conversations kept in the document; older entries are evicted.
const MAX_RECENT_CONVERSATIONS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing document exists but cannot be read or parsed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Another process holds the document lock.
    #[error("store document locked: {0}")]
    Locked(String),
    #[error("writing store document: {0}")]
    Io(#[from] std::io::Error),
}

/// Denormalized destination side of a mapping, keyed by the source
/// conversation id in [`BridgeDocument::mappings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRecord {
    pub slack_channel_id: String,
    pub slack_channel_name: String,
    pub whatsapp_chat_name: String,
}

/// A source-side conversation seen on the inbound stream but possibly not
/// mapped yet. Only used to let the operator pick one by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentConversation {
    pub id: String,
    pub display_name: String,
    /// RFC 3339 UTC timestamp; entries sort newest-first on this field.
    pub last_seen_at: String,
}

/// The whole persisted document. Absence of the file is not an error; an
/// empty default is synthesized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeDocument {
    #[serde(default)]
    pub mappings: BTreeMap<String, MappingRecord>,
    #[serde(default)]
    pub recent_conversations: Vec<RecentConversation>,
    #[serde(default)]
    pub contact_overrides: BTreeMap<String, String>,
}

/// Durable store over the bridge document. Mutations are serialized behind a
/// single lock, so two concurrent writers in this process cannot lose each
/// other's update.
pub struct MappingStore {
    path: PathBuf,
    /// Held for the lifetime of the store; releases the fs2 lock on drop.
    _lock_file: std::fs::File,
    /// Last-good copy, served for reads when a mid-run reload fails.
    doc: Mutex<BridgeDocument>,
}

impl MappingStore {
    /// Open the document at `path`, creating an empty default when the file
    /// does not exist. An unreadable or corrupt document fails fast.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let lock_path = path.with_extension("lock");
        let lock_file = std::fs::File::create(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|e| StoreError::Locked(format!("{}: {}", lock_path.display(), e)))?;

        let doc = load_document(&path).await?;
        Ok(Self {
            path,
            _lock_file: lock_file,
            doc: Mutex::new(doc),
        })
    }

    /// Resolve a mapping by either side of the pair: the source conversation
    /// id, or (reverse scan) the destination channel id. Returns the source
    /// id together with the record.
    pub async fn get(&self, id: &str) -> Option<(String, MappingRecord)> {
        let doc = self.fresh_read().await;
        if let Some(record) = doc.mappings.get(id) {
            return Some((id.to_string(), record.clone()));
        }
        doc.mappings
            .iter()
            .find(|(_, r)| r.slack_channel_id == id)
            .map(|(source, r)| (source.clone(), r.clone()))
    }

    /// Resolve the source conversation bound to a destination channel.
    pub async fn source_for_channel(&self, channel_id: &str) -> Option<String> {
        let doc = self.fresh_read().await;
        doc.mappings
            .iter()
            .find(|(_, r)| r.slack_channel_id == channel_id)
            .map(|(source, _)| source.clone())
    }

    /// Bind `source_id` to `record`, replacing any previous mapping for that
    /// source. The document on disk is re-read immediately before the write.
    pub async fn put(&self, source_id: &str, record: MappingRecord) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.mappings.insert(source_id.to_string(), record);
        })
        .await
    }

    /// Remove the mapping for `source_id` (no-op when absent).
    pub async fn remove(&self, source_id: &str) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.mappings.remove(source_id);
        })
        .await
    }

    pub async fn list_all(&self) -> Vec<(String, MappingRecord)> {
        let doc = self.fresh_read().await;
        doc.mappings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn mapping_count(&self) -> usize {
        self.fresh_read().await.mappings.len()
    }

    /// Record that a conversation was just seen. Updates the display name
    /// when a hint is supplied, keeps the stored name otherwise, and evicts
    /// the oldest entries past the cap regardless of mapping state.
    pub async fn touch_recent(
        &self,
        id: &str,
        display_name: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.mutate(|doc| {
            if let Some(entry) = doc.recent_conversations.iter_mut().find(|c| c.id == id) {
                if let Some(name) = display_name {
                    entry.display_name = name.to_string();
                }
                entry.last_seen_at = now.clone();
            } else {
                let fallback = format!("Chat {}", id.split('@').next().unwrap_or(id));
                doc.recent_conversations.push(RecentConversation {
                    id: id.to_string(),
                    display_name: display_name.map(str::to_string).unwrap_or(fallback),
                    last_seen_at: now.clone(),
                });
            }
            doc.recent_conversations
                .sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
            doc.recent_conversations.truncate(MAX_RECENT_CONVERSATIONS);
        })
        .await
    }

    /// Recent conversations without a mapping, newest first.
    pub async fn recent_unmapped(&self) -> Vec<RecentConversation> {
        let doc = self.fresh_read().await;
        doc.recent_conversations
            .iter()
            .filter(|c| !doc.mappings.contains_key(&c.id))
            .cloned()
            .collect()
    }

    /// Human-friendly label overriding the platform-supplied sender name.
    pub async fn contact_override(&self, id: &str) -> Option<String> {
        self.fresh_read().await.contact_overrides.get(id).cloned()
    }

    pub async fn put_contact(&self, id: &str, label: &str) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.contact_overrides
                .insert(id.to_string(), label.to_string());
        })
        .await
    }

    /// Update an existing override. Returns false (and writes nothing) when
    /// no override exists for `id`.
    pub async fn edit_contact(&self, id: &str, label: &str) -> Result<bool, StoreError> {
        let mut found = false;
        self.mutate(|doc| {
            if let Some(entry) = doc.contact_overrides.get_mut(id) {
                *entry = label.to_string();
                found = true;
            }
        })
        .await?;
        Ok(found)
    }

    pub async fn contacts(&self) -> BTreeMap<String, String> {
        self.fresh_read().await.contact_overrides.clone()
    }

    /// Re-read the document, falling back to the last-good in-memory copy
    /// when the disk has gone away mid-run.
    async fn fresh_read(&self) -> BridgeDocument {
        let mut guard = self.doc.lock().await;
        match load_document(&self.path).await {
            Ok(doc) => {
                *guard = doc;
            }
            Err(e) => {
                log::warn!("store: reload failed, serving last-good copy: {}", e);
            }
        }
        guard.clone()
    }

    /// Read-modify-write of the whole document. The in-memory copy is only
    /// replaced after the disk write succeeds.
    async fn mutate(
        &self,
        apply: impl FnOnce(&mut BridgeDocument),
    ) -> Result<(), StoreError> {
        let mut guard = self.doc.lock().await;
        let mut doc = load_document(&self.path).await?;
        apply(&mut doc);
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(&self.path, json).await?;
        *guard = doc;
        Ok(())
    }
}

async fn load_document(path: &Path) -> Result<BridgeDocument, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => serde_json::from_str(&s)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BridgeDocument::default()),
        Err(e) => Err(StoreError::Unavailable(format!(
            "{}: {}",
            path.display(),
            e
        ))),
    }
}
