//! Telegram Bot API client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::types::Update;
use super::{ChatTransport, UpdateSource};
use crate::config::TelegramConfig;
use crate::dispatch::keyboard::InlineKeyboardMarkup;
use crate::dispatch::{Markup, MediaType, MessageId};
use crate::error::{BridgeError, Result};

/// Connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Timeout for regular API calls and uploads.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Extra slack on top of the long-poll timeout.
const POLL_SLACK_SECS: u64 = 10;

/// User agent string for API calls.
const USER_AGENT: &str = "botbridge/0.1";

/// Envelope around every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

/// Telegram Bot API client.
pub struct TelegramClient {
    client: Client,
    api_url: String,
    token: String,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    /// Create a client from configuration. A bot token is required.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| BridgeError::Config("TELEGRAM_TOKEN is not set".to_string()))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        debug!(method, "Telegram API call");
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(method, e))?;
        read_envelope(response, method).await
    }

    async fn call_multipart<T: DeserializeOwned>(&self, method: &str, form: Form) -> Result<T> {
        debug!(method, "Telegram API upload");
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error(method, e))?;
        read_envelope(response, method).await
    }
}

/// Request failure without the request URL, which carries the bot token.
fn request_error(method: &str, e: reqwest::Error) -> BridgeError {
    BridgeError::Transport(format!("{} failed: {}", method, e.without_url()))
}

async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response, method: &str) -> Result<T> {
    let status = response.status();
    let envelope: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| {
            BridgeError::Transport(format!("{}: malformed response: {}", method, e.without_url()))
        })?;

    if !envelope.ok {
        return Err(BridgeError::Transport(format!(
            "{}: {} ({})",
            method,
            envelope.description.unwrap_or_default(),
            status
        )));
    }
    envelope
        .result
        .ok_or_else(|| BridgeError::Transport(format!("{}: empty result", method)))
}

/// API method and form field used for a media type.
fn media_method(media: MediaType) -> (&'static str, &'static str) {
    match media {
        MediaType::Photo => ("sendPhoto", "photo"),
        MediaType::Video => ("sendVideo", "video"),
        MediaType::Audio => ("sendAudio", "audio"),
        MediaType::File => ("sendDocument", "document"),
    }
}

fn markup_json(markup: &Markup) -> Result<String> {
    serde_json::to_string(markup)
        .map_err(|e| BridgeError::Transport(format!("failed to encode markup: {}", e)))
}

#[async_trait]
impl UpdateSource for TelegramClient {
    /// Long-poll `getUpdates`.
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(self.poll_timeout_secs + POLL_SLACK_SECS))
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error("getUpdates", e))?;
        read_envelope(response, "getUpdates").await
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(&self, chat_id: &str, text: &str, markup: &Markup) -> Result<MessageId> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "reply_markup": markup,
        });
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(sent.message_id)
    }

    async fn upload(
        &self,
        chat_id: &str,
        media: MediaType,
        path: &Path,
        caption: &str,
        markup: &Markup,
    ) -> Result<MessageId> {
        let (method, field) = media_method(media);
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.essence_str())
            .map_err(|e| BridgeError::Transport(format!("invalid mime type: {}", e)))?;

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .text("reply_markup", markup_json(markup)?)
            .part(field, part);

        let sent: SentMessage = self.call_multipart(method, form).await?;
        Ok(sent.message_id)
    }

    async fn forward(
        &self,
        chat_id: &str,
        media: MediaType,
        file_id: &str,
        caption: &str,
        markup: &Markup,
    ) -> Result<MessageId> {
        let (method, field) = media_method(media);
        let mut body = json!({
            "chat_id": chat_id,
            "caption": caption,
            "parse_mode": "HTML",
            "reply_markup": markup,
        });
        body[field] = Value::String(file_id.to_string());
        let sent: SentMessage = self.call(method, &body).await?;
        Ok(sent.message_id)
    }

    async fn edit_inline_markup(
        &self,
        chat_id: &str,
        message_id: MessageId,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<MessageId> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": keyboard,
        });
        let edited: SentMessage = self.call("editMessageReplyMarkup", &body).await?;
        Ok(edited.message_id)
    }

    async fn edit_text(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &str,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
            "reply_markup": keyboard,
        });
        let _: Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: MessageId) -> Result<()> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id });
        let _: bool = self.call("deleteMessage", &body).await?;
        Ok(())
    }

    async fn file_link(&self, file_id: &str) -> Result<String> {
        let body = json!({ "file_id": file_id });
        let file: RemoteFile = self.call("getFile", &body).await?;
        let path = file
            .file_path
            .ok_or_else(|| BridgeError::Transport(format!("no download path for {}", file_id)))?;
        Ok(format!("{}/file/bot{}/{}", self.api_url, self.token, path))
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        let body = json!({ "callback_query_id": callback_id });
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}
