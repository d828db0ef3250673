//! Outbound message dispatch.
//!
//! Scripts describe *what* to send: some text, optional keyboard options and an
//! optional attachment reference. [`resolve`] turns such a request into exactly
//! one concrete [`Delivery`], and [`MessageDispatcher`] performs it against the
//! chat transport.

mod dispatcher;
pub mod keyboard;
mod resolver;

pub use dispatcher::MessageDispatcher;
pub use keyboard::{InlineOption, InlineRow, Markup};
pub use resolver::resolve;

use std::path::{Component, Path, PathBuf};

use tracing::warn;

/// Transport-level message identifier. `0` means nothing was delivered.
pub type MessageId = i64;

/// Media type of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Photo,
    Video,
    Audio,
    File,
}

impl MediaType {
    /// Parse a declared media type. Unknown words degrade to a generic file.
    pub fn parse(declared: &str) -> Self {
        match declared.trim().to_lowercase().as_str() {
            "photo" | "image" | "picture" => MediaType::Photo,
            "video" => MediaType::Video,
            "audio" | "music" => MediaType::Audio,
            _ => MediaType::File,
        }
    }

    /// Infer the media type of a local file from its extension.
    pub fn from_path(path: &Path) -> Self {
        match mime_guess::from_path(path).first() {
            Some(mime) => match mime.type_().as_str() {
                "image" => MediaType::Photo,
                "video" => MediaType::Video,
                "audio" => MediaType::Audio,
                _ => MediaType::File,
            },
            None => MediaType::File,
        }
    }
}

/// Keyboard options attached to a send request. At most one kind is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Options {
    #[default]
    None,
    /// Reply keyboard rows of button labels.
    Reply(Vec<Vec<String>>),
    /// Inline keyboard rows of `(label, token)` choices.
    Inline(Vec<InlineRow>),
}

impl Options {
    /// Empty option lists count as no options.
    pub fn normalized(self) -> Self {
        match self {
            Options::Reply(rows) if rows.is_empty() => Options::None,
            Options::Inline(rows) if rows.is_empty() => Options::None,
            other => other,
        }
    }
}

/// Abstract "send this content to this user" request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub target: String,
    pub text: String,
    pub options: Options,
    /// Raw attachment reference: a file name under the attachments directory,
    /// `remoteId:mediaType`, a bare remote id, or empty.
    pub attachment: String,
}

impl OutboundMessage {
    pub fn text(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_attachment(mut self, attachment: impl Into<String>) -> Self {
        self.attachment = attachment.into();
        self
    }
}

/// Whether the request is a plain send or a prompt that forces a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Message,
    Prompt,
}

/// Resolved attachment reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    None,
    LocalFile(PathBuf),
    RemoteRef { id: String, media: MediaType },
}

impl Attachment {
    /// Resolve a raw reference against the attachments directory.
    ///
    /// An existing file inside the directory wins; otherwise the reference is
    /// a remote id, with an explicit `id:type` split when it contains exactly
    /// one colon.
    pub fn resolve(reference: &str, attachments_dir: &Path) -> Self {
        let reference = reference.trim();
        if reference.is_empty() {
            return Attachment::None;
        }

        if let Some(local) = local_file(reference, attachments_dir) {
            return Attachment::LocalFile(local);
        }

        let parts: Vec<&str> = reference.split(':').collect();
        if parts.len() == 2 {
            Attachment::RemoteRef {
                id: parts[0].to_string(),
                media: MediaType::parse(parts[1]),
            }
        } else {
            Attachment::RemoteRef {
                id: reference.to_string(),
                media: MediaType::File,
            }
        }
    }
}

/// Existing file for `reference` that stays inside `attachments_dir`.
///
/// Only plain relative paths are considered. Symlinks are followed and the
/// target must still lie under the directory.
fn local_file(reference: &str, attachments_dir: &Path) -> Option<PathBuf> {
    let relative = Path::new(reference);
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain {
        warn!(reference, "Attachment reference escapes the attachments directory");
        return None;
    }

    let local = attachments_dir.join(relative);
    if !local.is_file() {
        return None;
    }

    let root = attachments_dir.canonicalize().ok()?;
    let resolved = local.canonicalize().ok()?;
    if resolved.starts_with(&root) {
        Some(local)
    } else {
        warn!(reference, "Attachment link points outside the attachments directory");
        None
    }
}

/// Content half of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text,
    Upload { path: PathBuf, media: MediaType },
    Forward { file_id: String, media: MediaType },
}

/// One concrete transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub target: String,
    /// Message text, or the caption for media.
    pub text: String,
    pub content: Content,
    pub markup: Markup,
}
