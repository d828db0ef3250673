//! Chat transport abstraction.
//!
//! The host never speaks the chat wire protocol directly; everything goes
//! through [`ChatTransport`]. [`TelegramClient`] implements it over the Bot
//! API, [`MemoryTransport`] records calls in memory.

pub mod memory;
pub mod telegram;
pub mod types;

pub use memory::{MemoryTransport, TransportCall};
pub use telegram::TelegramClient;
pub use types::{CallbackQuery, Chat, FileRef, Message, PhotoSize, Update, User};

use std::path::Path;

use async_trait::async_trait;

use crate::dispatch::keyboard::InlineKeyboardMarkup;
use crate::dispatch::{Markup, MediaType, MessageId};
use crate::Result;

/// Operations the host needs from a chat client.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text message.
    async fn send_text(&self, chat_id: &str, text: &str, markup: &Markup) -> Result<MessageId>;

    /// Upload a local file as `media`.
    async fn upload(
        &self,
        chat_id: &str,
        media: MediaType,
        path: &Path,
        caption: &str,
        markup: &Markup,
    ) -> Result<MessageId>;

    /// Re-send an already hosted file by its remote id.
    async fn forward(
        &self,
        chat_id: &str,
        media: MediaType,
        file_id: &str,
        caption: &str,
        markup: &Markup,
    ) -> Result<MessageId>;

    /// Replace the inline keyboard of an existing message.
    async fn edit_inline_markup(
        &self,
        chat_id: &str,
        message_id: MessageId,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<MessageId>;

    /// Replace the text and inline keyboard of an existing message.
    async fn edit_text(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &str,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<()>;

    async fn delete_message(&self, chat_id: &str, message_id: MessageId) -> Result<()>;

    /// Download URL for a remote file id.
    async fn file_link(&self, file_id: &str) -> Result<String>;

    /// Acknowledge a callback query.
    async fn answer_callback(&self, callback_id: &str) -> Result<()>;
}

/// Stream of inbound updates.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Next batch of updates with id `>= offset`. May wait before returning
    /// an empty batch.
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>>;
}
