//! Decision matrix from an [`OutboundMessage`] to a [`Delivery`].

use std::path::Path;

use super::keyboard::{inline_keyboard, reply_keyboard, Markup};
use super::{Attachment, Content, Delivery, MediaType, Options, OutboundMessage, SendMode};

/// Resolve a request into a single delivery.
///
/// Returns `None` when there is nothing to send: empty text and no attachment.
pub fn resolve(message: &OutboundMessage, mode: SendMode, attachments_dir: &Path) -> Option<Delivery> {
    let content = match Attachment::resolve(&message.attachment, attachments_dir) {
        Attachment::LocalFile(path) => {
            let media = MediaType::from_path(&path);
            Content::Upload { path, media }
        }
        Attachment::RemoteRef { id, media } => Content::Forward { file_id: id, media },
        Attachment::None => {
            if message.text.trim().is_empty() {
                return None;
            }
            Content::Text
        }
    };

    let markup = match mode {
        SendMode::Prompt => Markup::force_reply(),
        SendMode::Message => match &message.options {
            Options::Reply(rows) if !rows.is_empty() => Markup::Reply(reply_keyboard(rows)),
            Options::Inline(rows) if !rows.is_empty() => Markup::Inline(inline_keyboard(rows)),
            _ => Markup::remove(),
        },
    };

    Some(Delivery {
        target: message.target.clone(),
        text: message.text.clone(),
        content,
        markup,
    })
}
