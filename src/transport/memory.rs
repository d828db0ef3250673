//! In-memory transport that records every call.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::types::Update;
use super::{ChatTransport, UpdateSource};
use crate::dispatch::keyboard::InlineKeyboardMarkup;
use crate::dispatch::{Markup, MediaType, MessageId};
use crate::{BridgeError, Result};

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    SendText {
        chat_id: String,
        text: String,
        markup: Markup,
    },
    Upload {
        chat_id: String,
        media: MediaType,
        path: PathBuf,
        caption: String,
        markup: Markup,
        /// File contents at the time of the call.
        contents: Vec<u8>,
    },
    Forward {
        chat_id: String,
        media: MediaType,
        file_id: String,
        caption: String,
        markup: Markup,
    },
    EditInlineMarkup {
        chat_id: String,
        message_id: MessageId,
        keyboard: InlineKeyboardMarkup,
    },
    EditText {
        chat_id: String,
        message_id: MessageId,
        text: String,
        keyboard: InlineKeyboardMarkup,
    },
    DeleteMessage {
        chat_id: String,
        message_id: MessageId,
    },
    FileLink {
        file_id: String,
    },
    AnswerCallback {
        callback_id: String,
    },
}

/// Idle wait of an empty [`UpdateSource::get_updates`] call.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Transport that keeps calls in memory and hands out increasing message ids.
///
/// Updates pushed with [`MemoryTransport::push_update`] are served to the
/// update loop in order.
#[derive(Debug)]
pub struct MemoryTransport {
    calls: Mutex<Vec<TransportCall>>,
    updates: Mutex<VecDeque<Update>>,
    next_id: AtomicI64,
    failing: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            updates: Mutex::new(VecDeque::new()),
            next_id: AtomicI64::new(1),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Queue an inbound update.
    pub fn push_update(&self, update: Update) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(update);
    }

    /// Snapshot of recorded calls.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded calls addressed to `chat_id`.
    pub fn calls_to(&self, chat_id: &str) -> Vec<TransportCall> {
        self.calls()
            .into_iter()
            .filter(|call| call_chat(call) == Some(chat_id))
            .collect()
    }

    fn record(&self, call: TransportCall) -> Result<MessageId> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("simulated failure".to_string()));
        }
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn call_chat(call: &TransportCall) -> Option<&str> {
    match call {
        TransportCall::SendText { chat_id, .. }
        | TransportCall::Upload { chat_id, .. }
        | TransportCall::Forward { chat_id, .. }
        | TransportCall::EditInlineMarkup { chat_id, .. }
        | TransportCall::EditText { chat_id, .. }
        | TransportCall::DeleteMessage { chat_id, .. } => Some(chat_id),
        TransportCall::FileLink { .. } | TransportCall::AnswerCallback { .. } => None,
    }
}

#[async_trait]
impl UpdateSource for MemoryTransport {
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let batch: Vec<Update> = {
            let mut queue = self.updates.lock().unwrap_or_else(PoisonError::into_inner);
            queue.drain(..).filter(|u| u.update_id >= offset).collect()
        };
        if batch.is_empty() {
            tokio::time::sleep(IDLE_POLL).await;
        }
        Ok(batch)
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn send_text(&self, chat_id: &str, text: &str, markup: &Markup) -> Result<MessageId> {
        self.record(TransportCall::SendText {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            markup: markup.clone(),
        })
    }

    async fn upload(
        &self,
        chat_id: &str,
        media: MediaType,
        path: &Path,
        caption: &str,
        markup: &Markup,
    ) -> Result<MessageId> {
        let contents = tokio::fs::read(path).await?;
        self.record(TransportCall::Upload {
            chat_id: chat_id.to_string(),
            media,
            path: path.to_path_buf(),
            caption: caption.to_string(),
            markup: markup.clone(),
            contents,
        })
    }

    async fn forward(
        &self,
        chat_id: &str,
        media: MediaType,
        file_id: &str,
        caption: &str,
        markup: &Markup,
    ) -> Result<MessageId> {
        self.record(TransportCall::Forward {
            chat_id: chat_id.to_string(),
            media,
            file_id: file_id.to_string(),
            caption: caption.to_string(),
            markup: markup.clone(),
        })
    }

    async fn edit_inline_markup(
        &self,
        chat_id: &str,
        message_id: MessageId,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<MessageId> {
        self.record(TransportCall::EditInlineMarkup {
            chat_id: chat_id.to_string(),
            message_id,
            keyboard: keyboard.clone(),
        })?;
        Ok(message_id)
    }

    async fn edit_text(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &str,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<()> {
        self.record(TransportCall::EditText {
            chat_id: chat_id.to_string(),
            message_id,
            text: text.to_string(),
            keyboard: keyboard.clone(),
        })
        .map(|_| ())
    }

    async fn delete_message(&self, chat_id: &str, message_id: MessageId) -> Result<()> {
        self.record(TransportCall::DeleteMessage {
            chat_id: chat_id.to_string(),
            message_id,
        })
        .map(|_| ())
    }

    async fn file_link(&self, file_id: &str) -> Result<String> {
        self.record(TransportCall::FileLink {
            file_id: file_id.to_string(),
        })?;
        Ok(format!("memory://files/{}", file_id))
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        self.record(TransportCall::AnswerCallback {
            callback_id: callback_id.to_string(),
        })
        .map(|_| ())
    }
}
