//! Operator slash commands: status, explicit mapping, listings, channel
//! provisioning, and contact overrides.
//!
//! Every command produces a textual response, success or failure; errors are
//! folded into the reply rather than propagated.

use crate::channels::slack::SlackApi;
use crate::channels::whatsapp::{self, WhatsAppTransport};
use crate::provision::{self, ProvisionCursor, ProvisionOutcome};
use crate::store::{MappingRecord, MappingStore};
use std::sync::Arc;

/// How many unmapped conversations `/view` lists.
const VIEW_LIMIT: usize = 5;

/// Everything the command surface needs, shared with the slack worker.
pub struct CommandContext {
    pub store: Arc<MappingStore>,
    pub slack: Arc<dyn SlackApi>,
    pub whatsapp: Arc<dyn WhatsAppTransport>,
    pub cursor: Arc<ProvisionCursor>,
    pub reviewer_group_id: Option<String>,
}

/// Dispatch a slash command. Always returns a response for the operator.
pub async fn handle_command(ctx: &CommandContext, command: &str, text: &str) -> String {
    log::info!("commands: {} {}", command, text);
    match command {
        "/status" => status(ctx).await,
        "/map" => map(ctx, text).await,
        "/unmap" => unmap(ctx, text).await,
        "/listmaps" => listmaps(ctx).await,
        "/view" => view(ctx).await,
        "/createchannel" => createchannel(ctx, text).await,
        "/contacts" => contacts(ctx, text).await,
        other => format!("Command \"{}\" not recognized.", other),
    }
}

async fn status(ctx: &CommandContext) -> String {
    let connection = if ctx.whatsapp.is_connected() {
        "🟢 Connected"
    } else {
        "🔴 Disconnected"
    };
    let active = ctx.store.mapping_count().await;
    format!(
        "*Bridge status*:\n- *WhatsApp connection*: {}\n- *Active mappings*: {}",
        connection, active
    )
}

/// Accepts a raw channel id or a `<#C123|name>` reference; returns
/// `(channel_id, channel_name)`.
fn parse_channel_ref(raw: &str) -> (String, Option<String>) {
    let Some(inner) = raw.strip_prefix("<#").and_then(|s| s.strip_suffix('>')) else {
        return (raw.to_string(), None);
    };
    match inner.split_once('|') {
        Some((id, name)) if !name.is_empty() => (id.to_string(), Some(name.to_string())),
        _ => (inner.to_string(), None),
    }
}

async fn map(ctx: &CommandContext, text: &str) -> String {
    let mut args = text.split_whitespace();
    let (Some(source_id), Some(channel_raw)) = (args.next(), args.next()) else {
        return "Usage: `/map <whatsapp-id> <#channel>`\nExample: `/map 12345@g.us #general`"
            .to_string();
    };
    let (channel_id, channel_name) = parse_channel_ref(channel_raw);
    let record = MappingRecord {
        slack_channel_id: channel_id.clone(),
        slack_channel_name: channel_name.unwrap_or_else(|| channel_id.clone()),
        whatsapp_chat_name: whatsapp::short_id(source_id).to_string(),
    };
    match ctx.store.put(source_id, record).await {
        Ok(()) => format!(
            "✅ Mapping added: WhatsApp chat `{}` now relays to <#{}>.",
            source_id, channel_id
        ),
        Err(e) => format!("❌ Could not save the mapping: {}", e),
    }
}

async fn unmap(ctx: &CommandContext, text: &str) -> String {
    let Some(source_id) = text.split_whitespace().next() else {
        return "Usage: `/unmap <whatsapp-id>`".to_string();
    };
    match ctx.store.remove(source_id).await {
        Ok(()) => format!("🗑️ Mapping for `{}` removed.", source_id),
        Err(e) => format!("❌ Could not remove the mapping: {}", e),
    }
}

async fn listmaps(ctx: &CommandContext) -> String {
    let mappings = ctx.store.list_all().await;
    if mappings.is_empty() {
        return "No mappings configured. Use `/map` to add one.".to_string();
    }
    let mut response = String::from("*Active mappings:*\n");
    for (source_id, record) in mappings {
        response.push_str(&format!(
            "- *WA:* `{}` -> *Slack:* <#{}>\n",
            source_id, record.slack_channel_id
        ));
    }
    response
}

async fn view(ctx: &CommandContext) -> String {
    let unmapped = ctx.store.recent_unmapped().await;
    if unmapped.is_empty() {
        ctx.cursor.clear().await;
        return "No unmapped recent WhatsApp chats.".to_string();
    }
    let listed: Vec<_> = unmapped.into_iter().take(VIEW_LIMIT).collect();
    let mut response = String::from("Recent unmapped WhatsApp chats (newest first):\n");
    for (index, chat) in listed.iter().enumerate() {
        response.push_str(&format!(
            "{}. {} (ID: {}, seen: {})\n",
            index,
            chat.display_name,
            whatsapp::short_id(&chat.id),
            chat.last_seen_at
        ));
    }
    response.push_str("\nTo create and bind a channel, use `/createchannel <index>` (e.g. `/createchannel 0`).");
    ctx.cursor.set(listed).await;
    response
}

async fn createchannel(ctx: &CommandContext, text: &str) -> String {
    let Ok(index) = text.trim().parse::<usize>() else {
        return "Usage: `/createchannel <index>` with an index from the last `/view` listing."
            .to_string();
    };
    let outcome = provision::provision_channel(
        &ctx.store,
        ctx.slack.as_ref(),
        &ctx.cursor,
        ctx.reviewer_group_id.as_deref(),
        index,
    )
    .await;
    match outcome {
        Ok(ProvisionOutcome::Created {
            channel_id,
            source_id,
            source_name,
            ..
        }) => format!(
            "Channel <#{}> created and bound to the WhatsApp chat \"{}\" (ID: {}).",
            channel_id,
            source_name,
            whatsapp::short_id(&source_id)
        ),
        Ok(ProvisionOutcome::AlreadyMapped {
            channel_id,
            source_id,
        }) => format!(
            "The WhatsApp chat (ID: {}) is already mapped to <#{}>.",
            whatsapp::short_id(&source_id),
            channel_id
        ),
        Err(e) => format!("❌ {}", e),
    }
}

async fn contacts(ctx: &CommandContext, text: &str) -> String {
    let mut args = text.split_whitespace();
    match args.next().map(str::to_lowercase).as_deref() {
        Some("new") => contacts_upsert(ctx, text, false).await,
        Some("edit") => contacts_upsert(ctx, text, true).await,
        Some("view") => {
            let contacts = ctx.store.contacts().await;
            if contacts.is_empty() {
                return "No contacts saved. Use `/contacts new` to add one.".to_string();
            }
            let mut response = String::from("*Saved contacts:*\n");
            for (address, label) in contacts {
                response.push_str(&format!("- *{}*: {}\n", address, label));
            }
            response
        }
        _ => "Unknown `/contacts` subcommand. Use `new`, `view` or `edit`.\n\
              Examples:\n`/contacts new 573001234567 Juan Perez - Client`\n\
              `/contacts view`\n`/contacts edit 573001234567 Juan Perez - VIP`"
            .to_string(),
    }
}

/// `/contacts new|edit <phone> <full name> - <role>`. The phone must be
/// numeric-only; name and role are split on the last ` - `.
async fn contacts_upsert(ctx: &CommandContext, text: &str, edit: bool) -> String {
    let usage = if edit {
        "Usage: `/contacts edit <phone> <full name> - <role>`\nExample: `/contacts edit 573001234567 Juan Perez - VIP`"
    } else {
        "Usage: `/contacts new <phone> <full name> - <role>`\nExample: `/contacts new 573001234567 Juan Perez - Client`"
    };
    let mut args = text.split_whitespace();
    let _sub = args.next();
    let Some(phone) = args.next() else {
        return usage.to_string();
    };
    let rest = args.collect::<Vec<_>>().join(" ");
    let Some((name, role)) = rest.split_once(" - ") else {
        return usage.to_string();
    };
    let (name, role) = (name.trim(), role.trim());
    if name.is_empty() || role.is_empty() {
        return usage.to_string();
    }
    if phone.is_empty() || !phone.chars().all(|c| c.is_ascii_digit()) {
        return "Error: the phone number must contain digits only.".to_string();
    }

    let address = whatsapp::user_address(phone);
    let label = format!("{} - {}", name, role);
    if edit {
        match ctx.store.edit_contact(&address, &label).await {
            Ok(true) => format!("✅ Contact updated: {} ({}) for {}.", name, role, address),
            Ok(false) => format!("⚠️ No contact found for {} to edit.", address),
            Err(e) => format!("❌ Could not update the contact: {}", e),
        }
    } else {
        match ctx.store.put_contact(&address, &label).await {
            Ok(()) => format!("✅ Contact added: {} ({}) with number {}.", name, role, address),
            Err(e) => format!("❌ Could not save the contact: {}", e),
        }
    }
}
