//! Bridge wiring: builds the shared state, spawns one worker per platform
//! stream, and hands the event senders to the embedding transports.

use crate::channels::slack::{SlackApi, SlackEvent};
use crate::channels::whatsapp::{ChatEvent, WhatsAppTransport};
use crate::commands::CommandContext;
use crate::config::Config;
use crate::dedup::DedupGuard;
use crate::media;
use crate::provision::ProvisionCursor;
use crate::relay::{self, RelayContext};
use crate::store::MappingStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const EVENT_QUEUE_DEPTH: usize = 64;
const SPOOL_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Senders for the two inbound streams. The transports push events here; each
/// stream is consumed strictly in delivery order.
pub struct BridgeHandles {
    pub whatsapp_events: mpsc::Sender<ChatEvent>,
    pub slack_events: mpsc::Sender<SlackEvent>,
}

/// Start the bridge engine: two relay workers plus the periodic spool sweep.
/// The workers stop when their senders are dropped.
pub fn start(
    config: &Config,
    store: Arc<MappingStore>,
    slack: Arc<dyn SlackApi>,
    whatsapp: Arc<dyn WhatsAppTransport>,
) -> (BridgeHandles, Vec<JoinHandle<()>>) {
    let dedup = Arc::new(DedupGuard::default());
    let cursor = Arc::new(ProvisionCursor::default());
    let spool_dir = media::default_spool_dir();

    let relay_ctx = Arc::new(RelayContext {
        store: store.clone(),
        slack: slack.clone(),
        whatsapp: whatsapp.clone(),
        dedup,
        own_bot_id: config.slack.bot_id.clone(),
        spool_dir: spool_dir.clone(),
    });
    let command_ctx = Arc::new(CommandContext {
        store,
        slack,
        whatsapp,
        cursor,
        reviewer_group_id: crate::config::resolve_reviewer_group_id(config),
    });

    let (whatsapp_tx, whatsapp_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let (slack_tx, slack_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(relay::run_whatsapp_worker(
        relay_ctx.clone(),
        whatsapp_rx,
    )));
    tasks.push(tokio::spawn(relay::run_slack_worker(
        relay_ctx,
        command_ctx,
        slack_rx,
    )));
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SPOOL_SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            media::sweep_stale_spool(&spool_dir, SPOOL_SWEEP_INTERVAL).await;
        }
    }));

    (
        BridgeHandles {
            whatsapp_events: whatsapp_tx,
            slack_events: slack_tx,
        },
        tasks,
    )
}

/// Post a WhatsApp connection-status change to the configured main channel.
/// Best-effort; without a main channel this is a no-op.
pub async fn notify_connection_change(
    slack: &dyn SlackApi,
    main_channel: Option<&str>,
    connected: bool,
) {
    let Some(channel) = main_channel else { return };
    let message = if connected {
        "🟢 WhatsApp connection established."
    } else {
        "🔴 WhatsApp connection is down. Messages will relay again once it reconnects."
    };
    if let Err(e) = slack.post_message(channel, message).await {
        log::warn!("bridge: status notification to {} failed: {}", channel, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::slack::{SlackCommandEvent, SlackMessageEvent};
    use crate::store::MappingRecord;
    use crate::testing::{RecordingSlack, RecordingWhatsApp};
    use tokio::sync::oneshot;

    async fn temp_store() -> Arc<MappingStore> {
        let path = std::env::temp_dir()
            .join(format!("wsbridge-bridge-test-{}", uuid::Uuid::new_v4()))
            .join("bridge.json");
        Arc::new(MappingStore::open(path).await.expect("open store"))
    }

    #[tokio::test]
    async fn events_flow_through_the_workers_in_order() {
        let store = temp_store().await;
        store
            .put(
                "G1@g.us",
                MappingRecord {
                    slack_channel_id: "C1".to_string(),
                    slack_channel_name: "team-x".to_string(),
                    whatsapp_chat_name: "Team X".to_string(),
                },
            )
            .await
            .expect("put");
        let slack = Arc::new(RecordingSlack::default());
        let whatsapp = Arc::new(RecordingWhatsApp::default());
        let (handles, tasks) = start(
            &Config::default(),
            store,
            slack.clone(),
            whatsapp.clone(),
        );

        for i in 0..3 {
            handles
                .whatsapp_events
                .send(ChatEvent {
                    event_id: format!("e{}", i),
                    conversation_id: "G1@g.us".to_string(),
                    sender_display_name: Some("Ana".to_string()),
                    conversation_display_name: None,
                    is_group: true,
                    body: crate::channels::whatsapp::ChatEventBody::Text(format!("msg {}", i)),
                })
                .await
                .expect("send");
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        handles
            .slack_events
            .send(SlackEvent::Command(SlackCommandEvent {
                trigger_id: "t1".to_string(),
                command: "/status".to_string(),
                text: String::new(),
                reply: reply_tx,
            }))
            .await
            .expect("send command");

        let response = reply_rx.await.expect("command response");
        assert!(response.contains("*Bridge status*"));

        drop(handles);
        // Workers drain their queues before stopping on channel close.
        for task in tasks.into_iter().take(2) {
            task.await.expect("worker");
        }
        let posts = slack.posts.lock().unwrap();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].1, "*[Ana]*: msg 0");
        assert_eq!(posts[2].1, "*[Ana]*: msg 2");
    }

    #[tokio::test]
    async fn duplicate_command_trigger_is_ignored() {
        let store = temp_store().await;
        let slack = Arc::new(RecordingSlack::default());
        let whatsapp = Arc::new(RecordingWhatsApp::default());
        let (handles, _tasks) = start(&Config::default(), store, slack, whatsapp);

        let (first_tx, first_rx) = oneshot::channel();
        handles
            .slack_events
            .send(SlackEvent::Command(SlackCommandEvent {
                trigger_id: "t1".to_string(),
                command: "/status".to_string(),
                text: String::new(),
                reply: first_tx,
            }))
            .await
            .expect("send");
        assert!(first_rx.await.is_ok());

        let (dup_tx, dup_rx) = oneshot::channel();
        handles
            .slack_events
            .send(SlackEvent::Command(SlackCommandEvent {
                trigger_id: "t1".to_string(),
                command: "/status".to_string(),
                text: String::new(),
                reply: dup_tx,
            }))
            .await
            .expect("send dup");
        // The duplicate's responder is dropped without an answer.
        assert!(dup_rx.await.is_err());
    }

    #[tokio::test]
    async fn connection_change_posts_to_main_channel_only_when_configured() {
        let slack = RecordingSlack::default();
        notify_connection_change(&slack, None, true).await;
        assert_eq!(slack.post_count(), 0);
        notify_connection_change(&slack, Some("C-main"), false).await;
        let posts = slack.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "C-main");
        assert!(posts[0].1.starts_with("🔴"));
    }

    #[tokio::test]
    async fn dropped_message_event_does_not_stop_the_worker() {
        let store = temp_store().await;
        let slack = Arc::new(RecordingSlack::default());
        let whatsapp = Arc::new(RecordingWhatsApp::default());
        let (handles, tasks) = start(&Config::default(), store, slack.clone(), whatsapp);

        // Unbound channel: dropped silently, worker keeps consuming.
        handles
            .slack_events
            .send(SlackEvent::Message(SlackMessageEvent {
                event_id: "1.0".to_string(),
                channel_id: "C-unbound".to_string(),
                user_id: "U1".to_string(),
                text: Some("hi".to_string()),
                files: Vec::new(),
                retry_count: None,
                bot_id: None,
            }))
            .await
            .expect("send");

        let (reply_tx, reply_rx) = oneshot::channel();
        handles
            .slack_events
            .send(SlackEvent::Command(SlackCommandEvent {
                trigger_id: "t2".to_string(),
                command: "/listmaps".to_string(),
                text: String::new(),
                reply: reply_tx,
            }))
            .await
            .expect("send command");
        assert!(reply_rx.await.is_ok());

        drop(handles);
        for task in tasks.into_iter().take(2) {
            task.await.expect("worker");
        }
    }
}
