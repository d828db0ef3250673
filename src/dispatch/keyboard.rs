//! Keyboard markup attached to outbound messages.

use serde::Serialize;

/// One `(label, token)` choice of an inline keyboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineOption {
    pub label: String,
    pub token: String,
}

impl InlineOption {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// A row of inline choices, in the order the script supplied them.
pub type InlineRow = Vec<InlineOption>;

/// A reply keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyboardButton {
    pub text: String,
}

/// Custom reply keyboard shown in place of the user's keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyKeyboardMarkup {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub one_time_keyboard: bool,
    pub resize_keyboard: bool,
}

/// An inline keyboard button: either opens a URL or sends callback data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

impl InlineKeyboardButton {
    pub fn is_link(&self) -> bool {
        self.url.is_some()
    }
}

/// Inline keyboard attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// Removes any custom keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplyKeyboardRemove {
    pub remove_keyboard: bool,
}

/// Forces the client to open a reply interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForceReply {
    pub force_reply: bool,
}

/// Decoration applied to a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Markup {
    Reply(ReplyKeyboardMarkup),
    Inline(InlineKeyboardMarkup),
    Remove(ReplyKeyboardRemove),
    ForceReply(ForceReply),
}

impl Markup {
    pub fn remove() -> Self {
        Markup::Remove(ReplyKeyboardRemove {
            remove_keyboard: true,
        })
    }

    pub fn force_reply() -> Self {
        Markup::ForceReply(ForceReply { force_reply: true })
    }
}

/// One-shot, auto-resizing reply keyboard with the given rows and columns.
pub fn reply_keyboard(rows: &[Vec<String>]) -> ReplyKeyboardMarkup {
    ReplyKeyboardMarkup {
        keyboard: rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|text| KeyboardButton { text: text.clone() })
                    .collect()
            })
            .collect(),
        one_time_keyboard: true,
        resize_keyboard: true,
    }
}

/// Inline keyboard with one output row per input row.
///
/// Buttons within a row are ordered by token so the layout does not depend on
/// the order the script's table happened to iterate in. Tokens that parse as
/// absolute URLs become link buttons, all others carry callback data.
pub fn inline_keyboard(rows: &[InlineRow]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: rows
            .iter()
            .map(|row| {
                let mut sorted: Vec<&InlineOption> = row.iter().collect();
                sorted.sort_by(|a, b| a.token.cmp(&b.token));
                sorted.into_iter().map(inline_button).collect()
            })
            .collect(),
    }
}

fn inline_button(option: &InlineOption) -> InlineKeyboardButton {
    if is_absolute_url(&option.token) {
        InlineKeyboardButton {
            text: option.label.clone(),
            url: Some(option.token.clone()),
            callback_data: None,
        }
    } else {
        InlineKeyboardButton {
            text: option.label.clone(),
            url: None,
            callback_data: Some(option.token.clone()),
        }
    }
}

fn is_absolute_url(token: &str) -> bool {
    url::Url::parse(token)
        .map(|u| u.has_host())
        .unwrap_or(false)
}
