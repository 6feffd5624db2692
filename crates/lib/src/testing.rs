//! Recording doubles for the platform seams, shared by the relay,
//! provisioning, and command tests.

use crate::channels::slack::{CreatedChannel, SlackApi, SlackError};
use crate::channels::whatsapp::{ChatEvent, OutboundChatMessage, WhatsAppTransport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Slack double that records every call and can be scripted to fail.
#[derive(Default)]
pub struct RecordingSlack {
    /// (channel, text) of chat.postMessage calls.
    pub posts: Mutex<Vec<(String, String)>>,
    /// (channel, filename, initial_comment) of uploads.
    pub uploads: Mutex<Vec<(String, String, String)>>,
    /// Channel names attempted via create_channel, in order.
    pub create_attempts: Mutex<Vec<String>>,
    /// Scripted create results, popped per attempt; empty deque = succeed
    /// with an id derived from the name.
    pub create_script: Mutex<VecDeque<Result<CreatedChannel, SlackError>>>,
    pub joins: Mutex<Vec<String>>,
    pub invites: Mutex<Vec<(String, Vec<String>)>>,
    pub group_members: Mutex<Vec<String>>,
    pub display_names: Mutex<HashMap<String, String>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_posts: AtomicBool,
    pub fail_uploads: AtomicBool,
    pub fail_invites: AtomicBool,
}

impl RecordingSlack {
    pub fn with_display_name(self, user_id: &str, name: &str) -> Self {
        self.display_names
            .lock()
            .unwrap()
            .insert(user_id.to_string(), name.to_string());
        self
    }

    pub fn with_file(self, url: &str, bytes: Vec<u8>) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes);
        self
    }

    pub fn script_create(&self, results: Vec<Result<CreatedChannel, SlackError>>) {
        *self.create_script.lock().unwrap() = results.into();
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl SlackApi for RecordingSlack {
    async fn post_message(&self, channel_id: &str, text: &str) -> Result<(), SlackError> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(SlackError::Api("fatal_error".to_string()));
        }
        self.posts
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn upload_file(
        &self,
        channel_id: &str,
        file_name: &str,
        _bytes: Vec<u8>,
        initial_comment: &str,
    ) -> Result<(), SlackError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(SlackError::Api("upload_error".to_string()));
        }
        self.uploads.lock().unwrap().push((
            channel_id.to_string(),
            file_name.to_string(),
            initial_comment.to_string(),
        ));
        Ok(())
    }

    async fn create_channel(&self, name: &str) -> Result<CreatedChannel, SlackError> {
        self.create_attempts.lock().unwrap().push(name.to_string());
        match self.create_script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(CreatedChannel {
                id: format!("C-{}", name),
                name: name.to_string(),
            }),
        }
    }

    async fn join_channel(&self, channel_id: &str) -> Result<(), SlackError> {
        self.joins.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }

    async fn invite_users(&self, channel_id: &str, user_ids: &[String]) -> Result<(), SlackError> {
        if self.fail_invites.load(Ordering::SeqCst) {
            return Err(SlackError::Api("cant_invite".to_string()));
        }
        self.invites
            .lock()
            .unwrap()
            .push((channel_id.to_string(), user_ids.to_vec()));
        Ok(())
    }

    async fn usergroup_members(&self, _usergroup_id: &str) -> Result<Vec<String>, SlackError> {
        Ok(self.group_members.lock().unwrap().clone())
    }

    async fn user_display_name(&self, user_id: &str) -> Result<String, SlackError> {
        self.display_names
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| SlackError::Api("user_not_found".to_string()))
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>, SlackError> {
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| SlackError::Api("file_not_found".to_string()))
    }
}

/// WhatsApp double recording outbound sends and serving canned media bytes.
pub struct RecordingWhatsApp {
    pub connected: bool,
    pub sent: Mutex<Vec<(String, OutboundChatMessage)>>,
    pub media_bytes: Vec<u8>,
    pub fail_download: bool,
}

impl Default for RecordingWhatsApp {
    fn default() -> Self {
        Self {
            connected: true,
            sent: Mutex::new(Vec::new()),
            media_bytes: vec![0xCA, 0xFE],
            fail_download: false,
        }
    }
}

impl RecordingWhatsApp {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl WhatsAppTransport for RecordingWhatsApp {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(
        &self,
        conversation_id: &str,
        message: OutboundChatMessage,
    ) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), message));
        Ok(())
    }

    async fn download_media(&self, _event: &ChatEvent) -> Result<Vec<u8>, String> {
        if self.fail_download {
            return Err("media no longer available".to_string());
        }
        Ok(self.media_bytes.clone())
    }
}
