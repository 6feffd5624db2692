//! Platform channels: the WhatsApp transport seam and the Slack Web API
//! client. Inbound events from both sides are delivered to the relay workers
//! through ordered queues.

pub mod slack;
pub mod whatsapp;

pub use slack::{
    CreatedChannel, SlackApi, SlackClient, SlackCommandEvent, SlackError, SlackEvent, SlackFile,
    SlackMessageEvent,
};
pub use whatsapp::{
    ChatEvent, ChatEventBody, DetachedTransport, OutboundChatMessage, WhatsAppTransport,
};
