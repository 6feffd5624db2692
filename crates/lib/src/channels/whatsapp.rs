//! WhatsApp side of the bridge: inbound event shapes and the transport seam.
//!
//! The actual protocol client (session crypto, QR pairing, reconnects) lives
//! outside this crate; the engine only sees the `WhatsAppTransport` trait.

use crate::media::{MediaEnvelope, MediaKind};
use async_trait::async_trait;

/// Address suffix for individual WhatsApp users; `/contacts` keys overrides
/// by this form.
pub const USER_ADDRESS_SUFFIX: &str = "@s.whatsapp.net";

/// Build the user address for a bare phone number.
pub fn user_address(phone: &str) -> String {
    format!("{}{}", phone, USER_ADDRESS_SUFFIX)
}

/// Part of a conversation id before the `@` domain, for display.
pub fn short_id(id: &str) -> &str {
    id.split('@').next().unwrap_or(id)
}

/// One inbound WhatsApp message, already decrypted and unwrapped by the
/// transport.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    /// Platform message id; dedup key under at-least-once delivery.
    pub event_id: String,
    pub conversation_id: String,
    pub sender_display_name: Option<String>,
    /// Group subject when the transport could resolve it; refreshes the
    /// stored recent-conversation name.
    pub conversation_display_name: Option<String>,
    pub is_group: bool,
    pub body: ChatEventBody,
}

#[derive(Debug, Clone)]
pub enum ChatEventBody {
    Text(String),
    Media(MediaEnvelope),
}

/// Outbound message toward WhatsApp.
#[derive(Debug, Clone)]
pub enum OutboundChatMessage {
    Text {
        text: String,
    },
    Media {
        kind: MediaKind,
        bytes: Vec<u8>,
        mime_type: String,
        file_name: Option<String>,
        caption: Option<String>,
    },
}

/// Seam to the external WhatsApp client library. Default sends refuse, the
/// way an unregistered channel refuses in the registry.
#[async_trait]
pub trait WhatsAppTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn send(
        &self,
        _conversation_id: &str,
        _message: OutboundChatMessage,
    ) -> Result<(), String> {
        Err("whatsapp transport not attached".to_string())
    }

    /// Fetch the raw bytes of the media carried by `event`.
    async fn download_media(&self, _event: &ChatEvent) -> Result<Vec<u8>, String> {
        Err("whatsapp transport not attached".to_string())
    }
}

/// Null transport used when no WhatsApp client is wired in (ops tooling,
/// `wsbridge run` without an embedding deployment). Reports disconnected and
/// refuses sends.
pub struct DetachedTransport;

#[async_trait]
impl WhatsAppTransport for DetachedTransport {
    fn is_connected(&self) -> bool {
        false
    }
}
