//! Inbound events routed to script hooks.

use super::engine::Hook;
use crate::transport::{CallbackQuery, Message, Update};

/// Something the script may react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Init,
    Timer,
    Message(Message),
    Callback(CallbackQuery),
}

impl Event {
    /// Map a transport update. Updates of other kinds are ignored.
    pub fn from_update(update: Update) -> Option<Self> {
        if let Some(message) = update.message {
            Some(Event::Message(message))
        } else {
            update.callback_query.map(Event::Callback)
        }
    }

    pub fn hook(&self) -> Hook {
        match self {
            Event::Init => Hook::Init,
            Event::Timer => Hook::Timer,
            Event::Message(_) => Hook::Message,
            Event::Callback(_) => Hook::Callback,
        }
    }

    /// Identity capabilities are scoped to. System events use `""`.
    pub fn acting_user(&self) -> String {
        match self {
            Event::Init | Event::Timer => String::new(),
            Event::Message(message) => message.chat.id.to_string(),
            Event::Callback(callback) => callback.chat_id().to_string(),
        }
    }

    /// Hook argument.
    pub fn payload(&self) -> Option<serde_json::Value> {
        match self {
            Event::Init | Event::Timer => None,
            Event::Message(message) => serde_json::to_value(message).ok(),
            Event::Callback(callback) => serde_json::to_value(callback).ok(),
        }
    }
}
