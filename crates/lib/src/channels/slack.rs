//! Slack Web API client and the workspace-side event shapes.
//!
//! One method per endpoint against https://slack.com/api; the engine consumes
//! the client through the `SlackApi` trait so relay and provisioning tests
//! can substitute a recording double.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::oneshot;

const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("slack request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Platform error code from the `{ok: false, error}` envelope
    /// (e.g. `name_taken`, `restricted_action`).
    #[error("slack api error: {0}")]
    Api(String),
}

impl SlackError {
    /// True when channel creation failed because the name is already taken.
    pub fn is_name_taken(&self) -> bool {
        matches!(self, SlackError::Api(code) if code == "name_taken")
    }
}

/// A file attached to an inbound workspace message.
#[derive(Debug, Clone)]
pub struct SlackFile {
    pub url: String,
    pub name: String,
    pub mime_type: String,
}

/// One inbound workspace message as delivered by the event transport.
#[derive(Debug, Clone)]
pub struct SlackMessageEvent {
    /// Message timestamp; unique per channel and used as the dedup key.
    pub event_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub text: Option<String>,
    pub files: Vec<SlackFile>,
    /// Set by the platform on re-delivery of an unacknowledged event.
    pub retry_count: Option<u32>,
    /// Authoring bot id when the message came from an app, for echo
    /// suppression.
    pub bot_id: Option<String>,
}

/// One slash-command invocation. The transport acks immediately; the textual
/// response goes back through `reply`.
#[derive(Debug)]
pub struct SlackCommandEvent {
    pub trigger_id: String,
    pub command: String,
    pub text: String,
    pub reply: oneshot::Sender<String>,
}

/// Events consumed by the workspace-side worker, in delivery order.
#[derive(Debug)]
pub enum SlackEvent {
    Message(SlackMessageEvent),
    Command(SlackCommandEvent),
}

#[derive(Debug, Clone)]
pub struct CreatedChannel {
    pub id: String,
    pub name: String,
}

/// The subset of the Slack Web API the bridge engine calls.
#[async_trait]
pub trait SlackApi: Send + Sync {
    async fn post_message(&self, channel_id: &str, text: &str) -> Result<(), SlackError>;
    async fn upload_file(
        &self,
        channel_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        initial_comment: &str,
    ) -> Result<(), SlackError>;
    async fn create_channel(&self, name: &str) -> Result<CreatedChannel, SlackError>;
    async fn join_channel(&self, channel_id: &str) -> Result<(), SlackError>;
    async fn invite_users(&self, channel_id: &str, user_ids: &[String]) -> Result<(), SlackError>;
    async fn usergroup_members(&self, usergroup_id: &str) -> Result<Vec<String>, SlackError>;
    async fn user_display_name(&self, user_id: &str) -> Result<String, SlackError>;
    async fn download_file(&self, url: &str) -> Result<Vec<u8>, SlackError>;
}

/// Web API client holding the bot token.
pub struct SlackClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ApiAck {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelObject {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreateChannelResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<ChannelObject>,
}

#[derive(Debug, Deserialize)]
struct UsergroupUsersResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserObject {
    #[serde(default)]
    profile: Option<UserProfile>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<UserObject>,
}

#[derive(Debug, Deserialize)]
struct UploadUrlResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    upload_url: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    team: Option<String>,
}

impl SlackClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(SLACK_API_BASE.to_string(), token)
    }

    /// Custom API base, for tests or proxies.
    pub fn with_base_url(base_url: String, token: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    async fn call(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, SlackError> {
        let url = format!("{}/{}", self.base_url, method);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SlackError::Api(format!("{} {}", status, body)));
        }
        Ok(res)
    }

    /// auth.test — verify the token and report the bot identity.
    pub async fn auth_test(&self) -> Result<String, SlackError> {
        let res = self.call("auth.test", serde_json::json!({})).await?;
        let data: AuthTestResponse = res.json().await?;
        if !data.ok {
            return Err(SlackError::Api(data.error.unwrap_or_default()));
        }
        Ok(format!(
            "{} @ {}",
            data.user.unwrap_or_default(),
            data.team.unwrap_or_default()
        ))
    }
}

#[async_trait]
impl SlackApi for SlackClient {
    /// chat.postMessage — text post to a channel.
    async fn post_message(&self, channel_id: &str, text: &str) -> Result<(), SlackError> {
        let res = self
            .call(
                "chat.postMessage",
                serde_json::json!({ "channel": channel_id, "text": text, "parse": "mrkdwn" }),
            )
            .await?;
        let data: ApiAck = res.json().await?;
        if !data.ok {
            return Err(SlackError::Api(data.error.unwrap_or_default()));
        }
        Ok(())
    }

    /// Three-step external upload: files.getUploadURLExternal, raw POST of
    /// the bytes, files.completeUploadExternal with the initial comment.
    async fn upload_file(
        &self,
        channel_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
        initial_comment: &str,
    ) -> Result<(), SlackError> {
        let url = format!("{}/files.getUploadURLExternal", self.base_url);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .form(&[
                ("filename", file_name.to_string()),
                ("length", bytes.len().to_string()),
            ])
            .send()
            .await?;
        let data: UploadUrlResponse = res.json().await?;
        let (upload_url, file_id) = match (data.ok, data.upload_url, data.file_id) {
            (true, Some(url), Some(id)) => (url, id),
            _ => return Err(SlackError::Api(data.error.unwrap_or_default())),
        };

        let res = self.client.post(&upload_url).body(bytes).send().await?;
        if !res.status().is_success() {
            return Err(SlackError::Api(format!("upload target: {}", res.status())));
        }

        let res = self
            .call(
                "files.completeUploadExternal",
                serde_json::json!({
                    "files": [{ "id": file_id, "title": file_name }],
                    "channel_id": channel_id,
                    "initial_comment": initial_comment,
                }),
            )
            .await?;
        let data: ApiAck = res.json().await?;
        if !data.ok {
            return Err(SlackError::Api(data.error.unwrap_or_default()));
        }
        Ok(())
    }

    /// conversations.create — public channel.
    async fn create_channel(&self, name: &str) -> Result<CreatedChannel, SlackError> {
        let res = self
            .call(
                "conversations.create",
                serde_json::json!({ "name": name, "is_private": false }),
            )
            .await?;
        let data: CreateChannelResponse = res.json().await?;
        match (data.ok, data.channel) {
            (true, Some(channel)) => Ok(CreatedChannel {
                id: channel.id,
                name: channel.name,
            }),
            _ => Err(SlackError::Api(data.error.unwrap_or_default())),
        }
    }

    /// conversations.join — add the bot itself to a channel.
    async fn join_channel(&self, channel_id: &str) -> Result<(), SlackError> {
        let res = self
            .call(
                "conversations.join",
                serde_json::json!({ "channel": channel_id }),
            )
            .await?;
        let data: ApiAck = res.json().await?;
        if !data.ok {
            return Err(SlackError::Api(data.error.unwrap_or_default()));
        }
        Ok(())
    }

    /// conversations.invite — comma-joined user ids.
    async fn invite_users(&self, channel_id: &str, user_ids: &[String]) -> Result<(), SlackError> {
        let res = self
            .call(
                "conversations.invite",
                serde_json::json!({ "channel": channel_id, "users": user_ids.join(",") }),
            )
            .await?;
        let data: ApiAck = res.json().await?;
        if !data.ok {
            return Err(SlackError::Api(data.error.unwrap_or_default()));
        }
        Ok(())
    }

    /// usergroups.users.list — members of a user group.
    async fn usergroup_members(&self, usergroup_id: &str) -> Result<Vec<String>, SlackError> {
        let res = self
            .call(
                "usergroups.users.list",
                serde_json::json!({ "usergroup": usergroup_id }),
            )
            .await?;
        let data: UsergroupUsersResponse = res.json().await?;
        if !data.ok {
            return Err(SlackError::Api(data.error.unwrap_or_default()));
        }
        Ok(data.users)
    }

    /// users.info — display name, falling back to real name, then handle.
    async fn user_display_name(&self, user_id: &str) -> Result<String, SlackError> {
        let res = self
            .call("users.info", serde_json::json!({ "user": user_id }))
            .await?;
        let data: UserInfoResponse = res.json().await?;
        let user = match (data.ok, data.user) {
            (true, Some(user)) => user,
            _ => return Err(SlackError::Api(data.error.unwrap_or_default())),
        };
        let name = user
            .profile
            .and_then(|p| p.display_name)
            .filter(|s| !s.is_empty())
            .or(user.real_name)
            .or(user.name)
            .unwrap_or_else(|| user_id.to_string());
        Ok(name)
    }

    /// Authenticated download of a file's private URL.
    async fn download_file(&self, url: &str) -> Result<Vec<u8>, SlackError> {
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(SlackError::Api(format!("download: {}", res.status())));
        }
        Ok(res.bytes().await?.to_vec())
    }
}
