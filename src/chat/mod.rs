use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::error::AppError;

const DISCORD_API: &str = "https://discord.com/api/v10";

/// Renders a date as a Discord timestamp tag so clients localize it.
pub fn format_timestamp(date: DateTime<Utc>) -> String {
    format!("<t:{}:f>", date.timestamp())
}

#[derive(Clone, Debug)]
pub struct DiscordConfig {
    pub bot_token: String,
}

impl DiscordConfig {
    pub fn new_from_env() -> Result<Self, AppError> {
        let bot_token = env::var("DISCORD_TOKEN")
            .map_err(|_| AppError::BadRequest("DISCORD_TOKEN is not set".to_string()))?;
        Ok(Self { bot_token })
    }
}

/// Send/delete/pin surface of the notification channels. Message rendering
/// and interactive components stay with the callers; this trait only moves
/// finished content.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Posts a message and returns its id.
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String, AppError>;

    /// Best-effort bulk delete. Returns the ids that were actually removed;
    /// missing or too-old messages are simply absent from the result.
    async fn delete_messages(
        &self,
        channel_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<String>, AppError>;

    async fn pin_message(&self, channel_id: &str, message_id: &str) -> Result<(), AppError>;
}

pub struct DiscordHttpClient {
    client: Client,
    config: DiscordConfig,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
}

impl DiscordHttpClient {
    pub fn new(config: DiscordConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .build()
            .map_err(|e| AppError::Gateway(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.config.bot_token)
    }
}

#[async_trait]
impl ChatGateway for DiscordHttpClient {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<String, AppError> {
        let url = format!("{}/channels/{}/messages", DISCORD_API, channel_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Discord send failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Discord API error {}: {}",
                status, body
            )));
        }

        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse Discord response: {}", e)))?;
        Ok(message.id)
    }

    async fn delete_messages(
        &self,
        channel_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<String>, AppError> {
        let mut deleted = Vec::new();

        if message_ids.len() >= 2 {
            // Bulk delete covers messages younger than two weeks; anything it
            // rejects falls through to the per-id path below.
            let url = format!("{}/channels/{}/messages/bulk-delete", DISCORD_API, channel_id);
            let response = self
                .client
                .post(&url)
                .header("Authorization", self.auth_header())
                .json(&serde_json::json!({ "messages": message_ids }))
                .send()
                .await
                .map_err(|e| AppError::Gateway(format!("Discord bulk delete failed: {}", e)))?;

            if response.status().is_success() {
                deleted.extend(message_ids.iter().cloned());
                return Ok(deleted);
            }
            tracing::warn!(
                "bulk delete rejected ({}), falling back to single deletes",
                response.status()
            );
        }

        for id in message_ids {
            let url = format!("{}/channels/{}/messages/{}", DISCORD_API, channel_id, id);
            let result = self
                .client
                .delete(&url)
                .header("Authorization", self.auth_header())
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => deleted.push(id.clone()),
                Ok(response) => {
                    tracing::warn!("failed to delete message {}: {}", id, response.status());
                }
                Err(e) => {
                    tracing::warn!("failed to delete message {}: {}", id, e);
                }
            }
        }

        Ok(deleted)
    }

    async fn pin_message(&self, channel_id: &str, message_id: &str) -> Result<(), AppError> {
        let url = format!("{}/channels/{}/pins/{}", DISCORD_API, channel_id, message_id);

        let response = self
            .client
            .put(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Discord pin failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Discord API error {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}

/// Stand-in used when no bot token is configured. Everything succeeds
/// without talking to anyone, so the rest of the system stays exercisable.
pub struct NoopChatGateway;

#[async_trait]
impl ChatGateway for NoopChatGateway {
    async fn send_message(&self, _channel_id: &str, _content: &str) -> Result<String, AppError> {
        Ok("0".to_string())
    }

    async fn delete_messages(
        &self,
        _channel_id: &str,
        message_ids: &[String],
    ) -> Result<Vec<String>, AppError> {
        Ok(message_ids.to_vec())
    }

    async fn pin_message(&self, _channel_id: &str, _message_id: &str) -> Result<(), AppError> {
        Ok(())
    }
}
