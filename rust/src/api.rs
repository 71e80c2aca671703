//! REST collaborator boundary for the messaging core.
//!
//! Only the calls the realtime core consumes are modeled here; the rest of
//! the marketplace API (listings, profiles, reviews) lives outside this
//! crate. `ChatApi` is a trait so tests and previews can substitute a fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server returned status {0}")]
    Status(u16),
    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub conversation_id: String,
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub last_message: Option<MessageDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub reactions: Vec<ReactionDto>,
}

impl MessageDto {
    pub fn created_at_epoch(&self) -> i64 {
        epoch_seconds(&self.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionDto {
    pub user_id: String,
    pub emoji: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Parse the server's RFC3339 timestamps; some deployments send raw epoch
/// seconds instead, so fall back to an integer parse.
pub(crate) fn epoch_seconds(raw: &str) -> i64 {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return dt.timestamp();
    }
    raw.parse::<i64>().unwrap_or(0)
}

#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub text: Option<String>,
    pub image: Option<ImageAttachment>,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_conversations(&self, user_id: &str) -> Result<Vec<ConversationDto>, ApiError>;
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<MessageDto>, ApiError>;
    async fn send_message(&self, outgoing: OutgoingMessage) -> Result<MessageDto, ApiError>;
    async fn mark_read(&self, conversation_id: &str, user_id: &str) -> Result<(), ApiError>;
    async fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionDto>, ApiError>;
    async fn delete_message(&self, message_id: &str) -> Result<(), ApiError>;
}

pub struct HttpChatApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn expect_ok(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ApiError::Status(status.as_u16()))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_conversations(&self, user_id: &str) -> Result<Vec<ConversationDto>, ApiError> {
        let resp = self
            .http
            .get(self.url("/conversations"))
            .query(&[("userId", user_id)])
            .send()
            .await?;
        Ok(expect_ok(resp)?.json().await?)
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<MessageDto>, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/conversations/{conversation_id}/messages")))
            .send()
            .await?;
        Ok(expect_ok(resp)?.json().await?)
    }

    async fn send_message(&self, outgoing: OutgoingMessage) -> Result<MessageDto, ApiError> {
        let mut form = reqwest::multipart::Form::new()
            .text("conversationId", outgoing.conversation_id.clone());
        if let Some(text) = outgoing.text {
            form = form.text("text", text);
        }
        if let Some(reply_to) = outgoing.reply_to {
            form = form.text("replyTo", reply_to);
        }
        if let Some(image) = outgoing.image {
            let part = reqwest::multipart::Part::bytes(image.bytes)
                .file_name("image")
                .mime_str(&image.mime_type)?;
            form = form.part("image", part);
        }
        let resp = self
            .http
            .post(self.url("/messages"))
            .multipart(form)
            .send()
            .await?;
        Ok(expect_ok(resp)?.json().await?)
    }

    async fn mark_read(&self, conversation_id: &str, user_id: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/conversations/{conversation_id}/read")))
            .json(&serde_json::json!({ "userId": user_id }))
            .send()
            .await?;
        expect_ok(resp)?;
        Ok(())
    }

    async fn toggle_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Vec<ReactionDto>, ApiError> {
        let resp = self
            .http
            .post(self.url(&format!("/messages/{message_id}/reactions")))
            .json(&serde_json::json!({ "userId": user_id, "emoji": emoji }))
            .send()
            .await?;
        Ok(expect_ok(resp)?.json().await?)
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .delete(self.url(&format!("/messages/{message_id}")))
            .send()
            .await?;
        expect_ok(resp)?;
        Ok(())
    }
}
