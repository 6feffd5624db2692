//! Channel provisioning: create a Slack channel for a recently seen WhatsApp
//! conversation and bind the pair.
//!
//! The selection cursor is process-scoped state set by `/view`; it stays
//! valid until provisioning succeeds or the next listing replaces it. The
//! mapping is persisted before any best-effort follow-up (self-join, reviewer
//! invites), so a crash after creation cannot lose the binding.

use crate::channels::slack::{CreatedChannel, SlackApi};
use crate::store::{MappingRecord, MappingStore, RecentConversation, StoreError};
use tokio::sync::Mutex;

/// Slack channel name limit.
pub const MAX_CHANNEL_NAME_LEN: usize = 21;

/// Creation attempts before giving up on name collisions.
pub const MAX_CREATE_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("index {index} is out of range; run /view again (list has {len} entries)")]
    InvalidIndex { index: usize, len: usize },
    /// Non-collision creation failure, surfaced verbatim.
    #[error("channel creation failed: {0}")]
    CreateFailed(String),
    #[error("no free channel name after {0} attempts")]
    NamesExhausted(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created {
        channel_id: String,
        channel_name: String,
        source_id: String,
        source_name: String,
    },
    /// The selected conversation already has a mapping; nothing was created.
    AlreadyMapped {
        channel_id: String,
        source_id: String,
    },
}

/// The last `/view` listing, selectable by zero-based index.
#[derive(Default)]
pub struct ProvisionCursor {
    entries: Mutex<Vec<RecentConversation>>,
}

impl ProvisionCursor {
    pub async fn set(&self, entries: Vec<RecentConversation>) {
        *self.entries.lock().await = entries;
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn get(&self, index: usize) -> Option<RecentConversation> {
        self.entries.lock().await.get(index).cloned()
    }
}

/// Derive a candidate channel name: lowercase, whitespace runs become one
/// dash, anything outside `[a-z0-9-]` is stripped, and the result is
/// truncated to leave room for a collision suffix. An empty result gets a
/// time-derived name.
pub fn sanitize_channel_name(name: &str) -> String {
    let mut sanitized: String = name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    if sanitized.len() > MAX_CHANNEL_NAME_LEN - 2 {
        sanitized.truncate(MAX_CHANNEL_NAME_LEN - 2);
    }
    if sanitized.is_empty() {
        sanitized = format!("chat-{:05}", chrono::Utc::now().timestamp() % 100_000);
    }
    sanitized
}

/// Provision a channel for the cursor entry at `index` and persist the
/// mapping. Idempotent against re-invocation for an already-mapped
/// conversation.
pub async fn provision_channel(
    store: &MappingStore,
    slack: &dyn SlackApi,
    cursor: &ProvisionCursor,
    reviewer_group_id: Option<&str>,
    index: usize,
) -> Result<ProvisionOutcome, ProvisionError> {
    let Some(selected) = cursor.get(index).await else {
        return Err(ProvisionError::InvalidIndex {
            index,
            len: cursor.len().await,
        });
    };

    if let Some((source_id, existing)) = store.get(&selected.id).await {
        return Ok(ProvisionOutcome::AlreadyMapped {
            channel_id: existing.slack_channel_id,
            source_id,
        });
    }

    let base = sanitize_channel_name(&selected.display_name);
    let channel = create_with_collision_retry(slack, &base).await?;

    // Persist the binding before any further side effect.
    store
        .put(
            &selected.id,
            MappingRecord {
                slack_channel_id: channel.id.clone(),
                slack_channel_name: channel.name.clone(),
                whatsapp_chat_name: selected.display_name.clone(),
            },
        )
        .await?;

    if let Err(e) = slack.join_channel(&channel.id).await {
        log::warn!("provision: could not join {}: {}", channel.name, e);
    }

    if let Some(group_id) = reviewer_group_id {
        invite_reviewer_group(slack, group_id, &channel).await;
    } else {
        log::info!("provision: no reviewer group configured, skipping invites");
    }

    cursor.clear().await;
    Ok(ProvisionOutcome::Created {
        channel_id: channel.id,
        channel_name: channel.name,
        source_id: selected.id,
        source_name: selected.display_name,
    })
}

async fn create_with_collision_retry(
    slack: &dyn SlackApi,
    base: &str,
) -> Result<CreatedChannel, ProvisionError> {
    let mut candidate = base.to_string();
    let mut attempt = 0;
    loop {
        match slack.create_channel(&candidate).await {
            Ok(channel) => return Ok(channel),
            Err(e) if e.is_name_taken() => {
                attempt += 1;
                if attempt >= MAX_CREATE_ATTEMPTS {
                    return Err(ProvisionError::NamesExhausted(MAX_CREATE_ATTEMPTS));
                }
                let suffix = format!("-{}", attempt);
                let mut trimmed = base.to_string();
                if trimmed.len() > MAX_CHANNEL_NAME_LEN - suffix.len() {
                    trimmed.truncate(MAX_CHANNEL_NAME_LEN - suffix.len());
                }
                candidate = format!("{}{}", trimmed, suffix);
                log::info!("provision: name taken, retrying as {}", candidate);
            }
            Err(e) => return Err(ProvisionError::CreateFailed(e.to_string())),
        }
    }
}

/// Resolve the reviewer group's membership and invite each member.
/// Best-effort: the mapping is already durable, so failures only log.
async fn invite_reviewer_group(slack: &dyn SlackApi, group_id: &str, channel: &CreatedChannel) {
    match slack.usergroup_members(group_id).await {
        Ok(members) if members.is_empty() => {
            log::warn!("provision: reviewer group {} has no members", group_id);
        }
        Ok(members) => {
            if let Err(e) = slack.invite_users(&channel.id, &members).await {
                log::warn!(
                    "provision: inviting reviewer group to {} failed: {}",
                    channel.name,
                    e
                );
            }
        }
        Err(e) => {
            log::warn!(
                "provision: could not list reviewer group {}: {}",
                group_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::slack::SlackError;
    use crate::testing::RecordingSlack;

    async fn temp_store() -> MappingStore {
        let path = std::env::temp_dir()
            .join(format!("wsbridge-provision-test-{}", uuid::Uuid::new_v4()))
            .join("bridge.json");
        MappingStore::open(path).await.expect("open store")
    }

    fn entry(id: &str, name: &str) -> RecentConversation {
        RecentConversation {
            id: id.to_string(),
            display_name: name.to_string(),
            last_seen_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn sanitize_lowercases_and_collapses_whitespace() {
        assert_eq!(sanitize_channel_name("Team X"), "team-x");
        assert_eq!(sanitize_channel_name("  Big   Project  "), "big-project");
        // Stripped characters can leave doubled separators behind.
        assert_eq!(sanitize_channel_name("Café & Friends!"), "caf--friends");
    }

    #[test]
    fn sanitize_truncates_leaving_suffix_room() {
        let name = sanitize_channel_name("a very long group name indeed");
        assert_eq!(name.len(), MAX_CHANNEL_NAME_LEN - 2);
    }

    #[test]
    fn sanitize_synthesizes_name_when_empty() {
        let name = sanitize_channel_name("@@@");
        assert!(name.starts_with("chat-"));
        assert!(name.len() <= MAX_CHANNEL_NAME_LEN);
    }

    #[tokio::test]
    async fn invalid_index_has_no_side_effect() {
        let store = temp_store().await;
        let slack = RecordingSlack::default();
        let cursor = ProvisionCursor::default();
        cursor.set(vec![entry("G2@x", "Team X")]).await;
        let err = provision_channel(&store, &slack, &cursor, None, 3)
            .await
            .expect_err("out of range");
        assert!(matches!(err, ProvisionError::InvalidIndex { index: 3, len: 1 }));
        assert!(slack.create_attempts.lock().unwrap().is_empty());
        assert_eq!(cursor.len().await, 1, "cursor stays valid");
    }

    #[tokio::test]
    async fn provisions_channel_and_persists_mapping_before_clearing_cursor() {
        let store = temp_store().await;
        let slack = RecordingSlack::default();
        let cursor = ProvisionCursor::default();
        cursor.set(vec![entry("G2@x", "Team X")]).await;

        let outcome = provision_channel(&store, &slack, &cursor, None, 0)
            .await
            .expect("provision");
        match outcome {
            ProvisionOutcome::Created {
                channel_name,
                source_id,
                ..
            } => {
                assert_eq!(channel_name, "team-x");
                assert_eq!(source_id, "G2@x");
            }
            other => panic!("expected Created, got {:?}", other),
        }
        let (_, mapping) = store.get("G2@x").await.expect("mapping persisted");
        assert_eq!(mapping.slack_channel_name, "team-x");
        assert_eq!(mapping.whatsapp_chat_name, "Team X");
        assert_eq!(cursor.len().await, 0, "cursor cleared");
        assert_eq!(slack.joins.lock().unwrap().len(), 1, "self-join attempted");
    }

    #[tokio::test]
    async fn already_mapped_conversation_is_idempotent() {
        let store = temp_store().await;
        store
            .put(
                "G2@x",
                MappingRecord {
                    slack_channel_id: "C1".to_string(),
                    slack_channel_name: "team-x".to_string(),
                    whatsapp_chat_name: "Team X".to_string(),
                },
            )
            .await
            .expect("put");
        let slack = RecordingSlack::default();
        let cursor = ProvisionCursor::default();
        cursor.set(vec![entry("G2@x", "Team X")]).await;

        let outcome = provision_channel(&store, &slack, &cursor, None, 0)
            .await
            .expect("provision");
        assert_eq!(
            outcome,
            ProvisionOutcome::AlreadyMapped {
                channel_id: "C1".to_string(),
                source_id: "G2@x".to_string(),
            }
        );
        assert!(slack.create_attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn name_collision_retries_with_suffix_under_length_limit() {
        let store = temp_store().await;
        let slack = RecordingSlack::default();
        slack.script_create(vec![
            Err(SlackError::Api("name_taken".to_string())),
            Err(SlackError::Api("name_taken".to_string())),
        ]);
        let cursor = ProvisionCursor::default();
        cursor
            .set(vec![entry("G2@x", "a very long group name indeed")])
            .await;

        provision_channel(&store, &slack, &cursor, None, 0)
            .await
            .expect("provision");
        let attempts = slack.create_attempts.lock().unwrap();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0], "a-very-long-group-n");
        assert_eq!(attempts[1], "a-very-long-group-n-1");
        assert_eq!(attempts[2], "a-very-long-group-n-2");
        assert!(attempts.iter().all(|n| n.len() <= MAX_CHANNEL_NAME_LEN));
    }

    #[tokio::test]
    async fn collision_retries_are_bounded() {
        let store = temp_store().await;
        let slack = RecordingSlack::default();
        slack.script_create(
            (0..MAX_CREATE_ATTEMPTS)
                .map(|_| Err(SlackError::Api("name_taken".to_string())))
                .collect(),
        );
        let cursor = ProvisionCursor::default();
        cursor.set(vec![entry("G2@x", "Team X")]).await;

        let err = provision_channel(&store, &slack, &cursor, None, 0)
            .await
            .expect_err("exhausted");
        assert!(matches!(err, ProvisionError::NamesExhausted(_)));
        assert_eq!(
            slack.create_attempts.lock().unwrap().len(),
            MAX_CREATE_ATTEMPTS
        );
        assert!(store.get("G2@x").await.is_none(), "no mapping persisted");
    }

    #[tokio::test]
    async fn non_collision_failure_aborts_without_retry() {
        let store = temp_store().await;
        let slack = RecordingSlack::default();
        slack.script_create(vec![Err(SlackError::Api("restricted_action".to_string()))]);
        let cursor = ProvisionCursor::default();
        cursor.set(vec![entry("G2@x", "Team X")]).await;

        let err = provision_channel(&store, &slack, &cursor, None, 0)
            .await
            .expect_err("create failed");
        match err {
            ProvisionError::CreateFailed(msg) => assert!(msg.contains("restricted_action")),
            other => panic!("expected CreateFailed, got {:?}", other),
        }
        assert_eq!(slack.create_attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reviewer_invites_are_best_effort() {
        let store = temp_store().await;
        let slack = RecordingSlack::default();
        *slack.group_members.lock().unwrap() = vec!["U1".to_string(), "U2".to_string()];
        slack
            .fail_invites
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let cursor = ProvisionCursor::default();
        cursor.set(vec![entry("G2@x", "Team X")]).await;

        let outcome = provision_channel(&store, &slack, &cursor, Some("S-admins"), 0)
            .await
            .expect("provision succeeds despite invite failure");
        assert!(matches!(outcome, ProvisionOutcome::Created { .. }));
        assert!(store.get("G2@x").await.is_some(), "mapping survives");
    }

    #[tokio::test]
    async fn reviewer_members_are_invited() {
        let store = temp_store().await;
        let slack = RecordingSlack::default();
        *slack.group_members.lock().unwrap() = vec!["U1".to_string(), "U2".to_string()];
        let cursor = ProvisionCursor::default();
        cursor.set(vec![entry("G2@x", "Team X")]).await;

        provision_channel(&store, &slack, &cursor, Some("S-admins"), 0)
            .await
            .expect("provision");
        let invites = slack.invites.lock().unwrap();
        assert_eq!(invites.len(), 1);
        assert_eq!(invites[0].1, vec!["U1".to_string(), "U2".to_string()]);
    }
}
