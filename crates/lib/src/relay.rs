//! Relay pipeline: forwards inbound events between WhatsApp and Slack.
//!
//! Two directions, one worker task per stream. Each stream is processed in
//! delivery order; failures are caught and logged so the event sources never
//! see an error that would trigger their own retry machinery. Duplicate
//! deliveries are suppressed by the shared dedup guard.

use crate::channels::slack::{SlackApi, SlackEvent, SlackFile, SlackMessageEvent};
use crate::channels::whatsapp::{
    self, ChatEvent, ChatEventBody, OutboundChatMessage, WhatsAppTransport,
};
use crate::commands::{self, CommandContext};
use crate::dedup::DedupGuard;
use crate::media::{self, MediaKind, SpooledFile};
use crate::store::MappingStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Files at or above this size are always forwarded as generic documents.
pub const DOCUMENT_SIZE_THRESHOLD: usize = 10 * 1024 * 1024;

/// Appended to the text fallback when an attachment could not be relayed.
const DEGRADED_MARKER: &str = "_[failed to process an attachment]_";

/// Shared state for both relay directions.
pub struct RelayContext {
    pub store: Arc<MappingStore>,
    pub slack: Arc<dyn SlackApi>,
    pub whatsapp: Arc<dyn WhatsAppTransport>,
    pub dedup: Arc<DedupGuard>,
    /// Own Slack bot id, for echo suppression.
    pub own_bot_id: Option<String>,
    pub spool_dir: PathBuf,
}

/// Prefix for messages relayed toward Slack.
pub fn sender_prefix(label: &str, is_group: bool) -> String {
    if is_group {
        format!("*[{}]*:", label)
    } else {
        format!("*[WhatsApp]* _{}_:", label)
    }
}

/// Prefix for messages relayed toward WhatsApp; the sender's text follows on
/// the next line.
pub fn slack_sender_prefix(label: &str) -> String {
    format!("*[{}]*:", label)
}

fn compose_comment(prefix: &str, body: &str) -> String {
    if body.is_empty() {
        prefix.to_string()
    } else {
        format!("{} {}", prefix, body)
    }
}

/// Consume the WhatsApp event stream until the sender side closes.
pub async fn run_whatsapp_worker(ctx: Arc<RelayContext>, mut events: mpsc::Receiver<ChatEvent>) {
    log::info!("relay: whatsapp worker started");
    while let Some(event) = events.recv().await {
        handle_chat_event(&ctx, event).await;
    }
    log::info!("relay: whatsapp event stream closed, worker stopping");
}

/// Consume the Slack event stream (messages and slash commands) until the
/// sender side closes.
pub async fn run_slack_worker(
    ctx: Arc<RelayContext>,
    command_ctx: Arc<CommandContext>,
    mut events: mpsc::Receiver<SlackEvent>,
) {
    log::info!("relay: slack worker started");
    while let Some(event) = events.recv().await {
        match event {
            SlackEvent::Message(message) => handle_slack_message(&ctx, message).await,
            SlackEvent::Command(command) => {
                if !ctx.dedup.first_seen(&command.trigger_id).await {
                    log::info!(
                        "relay: command with trigger {} already processed, ignoring",
                        command.trigger_id
                    );
                    continue;
                }
                let response =
                    commands::handle_command(&command_ctx, &command.command, &command.text).await;
                if command.reply.send(response).is_err() {
                    log::warn!("relay: command responder for {} went away", command.command);
                }
            }
        }
    }
    log::info!("relay: slack event stream closed, worker stopping");
}

/// WhatsApp → Slack. Unmapped conversations are logged and dropped; media
/// failures degrade to a text-only delivery.
pub async fn handle_chat_event(ctx: &RelayContext, event: ChatEvent) {
    if !ctx.dedup.first_seen(&event.event_id).await {
        log::debug!("relay: duplicate chat event {}, ignoring", event.event_id);
        return;
    }

    if let ChatEventBody::Media(envelope) = &event.body {
        // Album containers carry no media themselves; the wrapped items each
        // arrive later as their own event.
        if envelope.album && envelope.kind().is_none() {
            log::debug!("relay: album container {} ignored", event.event_id);
            return;
        }
    }

    let label = sender_label(ctx, &event).await;
    let name_hint = conversation_name_hint(&event, &label);
    if let Err(e) = ctx
        .store
        .touch_recent(&event.conversation_id, name_hint.as_deref())
        .await
    {
        log::warn!(
            "relay: failed to record recent conversation {}: {}",
            event.conversation_id,
            e
        );
    }

    let Some((_, mapping)) = ctx.store.get(&event.conversation_id).await else {
        log::info!(
            "relay: message from '{}' ({}) has no mapped channel; use /map or /createchannel",
            name_hint.as_deref().unwrap_or(&label),
            event.conversation_id
        );
        return;
    };

    let prefix = sender_prefix(&label, event.is_group);
    match &event.body {
        ChatEventBody::Text(text) => {
            if text.trim().is_empty() {
                return;
            }
            let message = compose_comment(&prefix, text);
            if let Err(e) = ctx
                .slack
                .post_message(&mapping.slack_channel_id, &message)
                .await
            {
                log::error!(
                    "relay: text delivery to {} failed, dropping event {}: {}",
                    mapping.slack_channel_id,
                    event.event_id,
                    e
                );
            }
        }
        ChatEventBody::Media(envelope) => {
            let comment = compose_comment(&prefix, &envelope.caption().unwrap_or_default());
            let transport = ctx.whatsapp.clone();
            let download_event = event.clone();
            let classified = media::classify(envelope, move || async move {
                transport.download_media(&download_event).await
            })
            .await;
            match classified {
                Ok(Some(media)) => {
                    if let Err(e) = ctx
                        .slack
                        .upload_file(
                            &mapping.slack_channel_id,
                            &media.file_name,
                            media.buffer,
                            &comment,
                        )
                        .await
                    {
                        log::warn!(
                            "relay: upload to {} failed, degrading to text: {}",
                            mapping.slack_channel_id,
                            e
                        );
                        deliver_degraded(ctx, &mapping.slack_channel_id, &event.event_id, &comment)
                            .await;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!(
                        "relay: media download for {} failed, degrading to text: {}",
                        event.event_id,
                        e
                    );
                    deliver_degraded(ctx, &mapping.slack_channel_id, &event.event_id, &comment)
                        .await;
                }
            }
        }
    }
}

async fn deliver_degraded(ctx: &RelayContext, channel_id: &str, event_id: &str, comment: &str) {
    let fallback = format!("{}\n\n{}", comment, DEGRADED_MARKER);
    if let Err(e) = ctx.slack.post_message(channel_id, &fallback).await {
        log::error!(
            "relay: degraded delivery to {} also failed, dropping event {}: {}",
            channel_id,
            event_id,
            e
        );
    }
}

/// Slack → WhatsApp. Unbound channels are dropped silently; every attachment
/// is downloaded and dispatched per kind.
pub async fn handle_slack_message(ctx: &RelayContext, event: SlackMessageEvent) {
    if !ctx.dedup.first_seen(&event.event_id).await {
        log::debug!("relay: duplicate slack event {}, ignoring", event.event_id);
        return;
    }
    if let Some(retry) = event.retry_count.filter(|r| *r > 0) {
        log::info!(
            "relay: retried slack delivery (attempt {}) for {}",
            retry,
            event.event_id
        );
    }
    if ctx.own_bot_id.is_some() && event.bot_id == ctx.own_bot_id {
        log::debug!("relay: own bot echo {} ignored", event.event_id);
        return;
    }

    let Some(conversation_id) = ctx.store.source_for_channel(&event.channel_id).await else {
        log::debug!("relay: channel {} not bound, dropping", event.channel_id);
        return;
    };

    let text = event.text.clone().unwrap_or_default();
    let has_text = !text.trim().is_empty();
    if !has_text && event.files.is_empty() {
        return;
    }

    let label = match ctx.slack.user_display_name(&event.user_id).await {
        Ok(name) => name,
        Err(e) => {
            log::warn!("relay: could not resolve user {}: {}", event.user_id, e);
            event.user_id.clone()
        }
    };
    let prefix = slack_sender_prefix(&label);

    // Every attachment is downloaded before dispatch.
    let mut attachments = Vec::new();
    for file in &event.files {
        match ctx.slack.download_file(&file.url).await {
            Ok(bytes) => attachments.push((file, bytes)),
            Err(e) => log::error!("relay: downloading '{}' failed: {}", file.name, e),
        }
    }

    if attachments.is_empty() {
        if has_text {
            let out = OutboundChatMessage::Text {
                text: format!("{}\n{}", prefix, text),
            };
            if let Err(e) = ctx.whatsapp.send(&conversation_id, out).await {
                log::error!(
                    "relay: text delivery to {} failed, dropping event {}: {}",
                    conversation_id,
                    event.event_id,
                    e
                );
            }
        }
        return;
    }

    for (index, (file, bytes)) in attachments.into_iter().enumerate() {
        if let Err(e) = dispatch_slack_file(
            ctx,
            &conversation_id,
            &prefix,
            &label,
            &text,
            has_text,
            index,
            file,
            bytes,
        )
        .await
        {
            log::error!(
                "relay: failed to forward '{}' to {}: {}",
                file.name,
                conversation_id,
                e
            );
        }
    }
}

/// Spool and dispatch one downloaded attachment. The spool file is released
/// when this function returns, whatever the dispatch outcome.
async fn dispatch_slack_file(
    ctx: &RelayContext,
    conversation_id: &str,
    prefix: &str,
    label: &str,
    text: &str,
    has_text: bool,
    index: usize,
    file: &SlackFile,
    bytes: Vec<u8>,
) -> Result<(), String> {
    let mut kind = media::kind_for_file(&file.name, &file.mime_type);
    if bytes.len() >= DOCUMENT_SIZE_THRESHOLD {
        kind = MediaKind::Document;
    }

    let extension = Path::new(&file.name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let spool = SpooledFile::write(&ctx.spool_dir, &bytes, &extension)
        .await
        .map_err(|e| format!("spool: {}", e))?;
    let payload = spool
        .read()
        .await
        .map_err(|e| format!("spool read: {}", e))?;

    // The operator's text rides only on the first attachment; the rest get a
    // generated caption so the text is not repeated per file.
    let first_with_text = index == 0 && has_text;
    let generated_caption = format!("{} sent a {}: {}", label, kind.friendly_name(), file.name);

    match kind {
        MediaKind::Audio => {
            // Audio attachments cannot carry a caption on the chat platform.
            if first_with_text {
                ctx.whatsapp
                    .send(
                        conversation_id,
                        OutboundChatMessage::Text {
                            text: format!("{}\n{}", prefix, text),
                        },
                    )
                    .await?;
            } else if !has_text {
                ctx.whatsapp
                    .send(
                        conversation_id,
                        OutboundChatMessage::Text {
                            text: generated_caption.clone(),
                        },
                    )
                    .await?;
            }
            ctx.whatsapp
                .send(
                    conversation_id,
                    OutboundChatMessage::Media {
                        kind,
                        bytes: payload,
                        mime_type: file.mime_type.clone(),
                        file_name: Some(file.name.clone()),
                        caption: None,
                    },
                )
                .await
        }
        _ => {
            let caption = if first_with_text {
                format!("{}\n{}", prefix, text)
            } else {
                generated_caption
            };
            ctx.whatsapp
                .send(
                    conversation_id,
                    OutboundChatMessage::Media {
                        kind,
                        bytes: payload,
                        mime_type: file.mime_type.clone(),
                        file_name: Some(file.name.clone()),
                        caption: Some(caption),
                    },
                )
                .await
        }
    }
}

async fn sender_label(ctx: &RelayContext, event: &ChatEvent) -> String {
    if let Some(label) = ctx.store.contact_override(&event.conversation_id).await {
        return label;
    }
    event
        .sender_display_name
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| whatsapp::short_id(&event.conversation_id).to_string())
}

/// Display name under which the conversation is recorded as recently seen.
/// Group names only refresh when the transport resolved a subject.
fn conversation_name_hint(event: &ChatEvent, label: &str) -> Option<String> {
    event.conversation_display_name.clone().or_else(|| {
        if event.is_group {
            None
        } else {
            Some(label.to_string())
        }
    })
}
