//! Performs resolved deliveries against a [`ChatTransport`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, warn};

use super::keyboard::inline_keyboard;
use super::resolver::resolve;
use super::{Content, Delivery, InlineRow, MessageId, OutboundMessage, SendMode};
use crate::transport::ChatTransport;
use crate::Result;

/// Sends outbound messages and message edits.
///
/// Every public operation except [`MessageDispatcher::dispatch`] swallows
/// transport failures: they are logged and the call yields `0` or nothing.
#[derive(Clone)]
pub struct MessageDispatcher {
    transport: Arc<dyn ChatTransport>,
    attachments_dir: PathBuf,
}

impl MessageDispatcher {
    pub fn new(transport: Arc<dyn ChatTransport>, attachments_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            attachments_dir: attachments_dir.into(),
        }
    }

    pub fn transport(&self) -> &Arc<dyn ChatTransport> {
        &self.transport
    }

    pub fn attachments_dir(&self) -> &Path {
        &self.attachments_dir
    }

    /// Resolve and deliver a message.
    ///
    /// Returns `Ok(None)` when the request was skipped: no target, or nothing
    /// to send.
    pub async fn dispatch(
        &self,
        message: &OutboundMessage,
        mode: SendMode,
    ) -> Result<Option<MessageId>> {
        if message.target.trim().is_empty() {
            warn!("Skipping send: no target user");
            return Ok(None);
        }

        match resolve(message, mode, &self.attachments_dir) {
            Some(delivery) => self.deliver(&delivery).await.map(Some),
            None => {
                warn!(target_user = %message.target, "Skipping empty response");
                Ok(None)
            }
        }
    }

    async fn deliver(&self, delivery: &Delivery) -> Result<MessageId> {
        let chat = delivery.target.as_str();
        match &delivery.content {
            Content::Text => {
                self.transport
                    .send_text(chat, &delivery.text, &delivery.markup)
                    .await
            }
            Content::Upload { path, media } => {
                self.transport
                    .upload(chat, *media, path, &delivery.text, &delivery.markup)
                    .await
            }
            Content::Forward { file_id, media } => {
                self.transport
                    .forward(chat, *media, file_id, &delivery.text, &delivery.markup)
                    .await
            }
        }
    }

    /// Send a message. Returns the new message id, or `0`.
    pub async fn send(&self, message: &OutboundMessage) -> MessageId {
        self.dispatch_logged(message, SendMode::Message).await
    }

    /// Send a message that forces a reply. Returns the new message id, or `0`.
    pub async fn prompt(&self, message: &OutboundMessage) -> MessageId {
        self.dispatch_logged(message, SendMode::Prompt).await
    }

    async fn dispatch_logged(&self, message: &OutboundMessage, mode: SendMode) -> MessageId {
        match self.dispatch(message, mode).await {
            Ok(id) => id.unwrap_or(0),
            Err(e) => {
                error!(target_user = %message.target, error = %e, "Failed to send message");
                0
            }
        }
    }

    /// Replace the inline keyboard of a message. Returns the message id, or `0`.
    pub async fn replace_options(
        &self,
        chat_id: &str,
        message_id: MessageId,
        rows: &[InlineRow],
    ) -> MessageId {
        let keyboard = inline_keyboard(rows);
        match self
            .transport
            .edit_inline_markup(chat_id, message_id, &keyboard)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(chat_id, message_id, error = %e, "Failed to replace options");
                0
            }
        }
    }

    /// Replace text and inline keyboard of a message.
    pub async fn edit_message(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &str,
        rows: &[InlineRow],
    ) {
        let keyboard = inline_keyboard(rows);
        if let Err(e) = self
            .transport
            .edit_text(chat_id, message_id, text, &keyboard)
            .await
        {
            error!(chat_id, message_id, error = %e, "Failed to edit message");
        }
    }

    pub async fn delete_message(&self, chat_id: &str, message_id: MessageId) {
        if let Err(e) = self.transport.delete_message(chat_id, message_id).await {
            error!(chat_id, message_id, error = %e, "Failed to delete message");
        }
    }

    /// Download URL of a remote file, or an empty string.
    pub async fn file_link(&self, file_id: &str) -> String {
        match self.transport.file_link(file_id).await {
            Ok(link) => link,
            Err(e) => {
                error!(file_id, error = %e, "Failed to get file link");
                String::new()
            }
        }
    }

    pub async fn answer_callback(&self, callback_id: &str) {
        if let Err(e) = self.transport.answer_callback(callback_id).await {
            warn!(callback_id, error = %e, "Failed to answer callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{InlineOption, Markup, MediaType, Options};
    use crate::transport::{MemoryTransport, TransportCall};
    use std::fs;
    use tempfile::tempdir;

    fn setup(dir: &Path) -> (Arc<MemoryTransport>, MessageDispatcher) {
        let transport = Arc::new(MemoryTransport::new());
        let dispatcher = MessageDispatcher::new(transport.clone(), dir);
        (transport, dispatcher)
    }

    #[tokio::test]
    async fn test_send_text() {
        let dir = tempdir().unwrap();
        let (transport, dispatcher) = setup(dir.path());

        let id = dispatcher.send(&OutboundMessage::text("42", "hello")).await;
        assert_eq!(id, 1);

        let calls = transport.calls();
        assert_eq!(
            calls,
            vec![TransportCall::SendText {
                chat_id: "42".to_string(),
                text: "hello".to_string(),
                markup: Markup::remove(),
            }]
        );
    }

    #[tokio::test]
    async fn test_empty_send_makes_no_call() {
        let dir = tempdir().unwrap();
        let (transport, dispatcher) = setup(dir.path());

        let id = dispatcher.send(&OutboundMessage::text("42", "")).await;
        assert_eq!(id, 0);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_target_is_skipped() {
        let dir = tempdir().unwrap();
        let (transport, dispatcher) = setup(dir.path());

        let result = dispatcher
            .dispatch(&OutboundMessage::text("", "hello"), SendMode::Message)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_forces_reply() {
        let dir = tempdir().unwrap();
        let (transport, dispatcher) = setup(dir.path());

        dispatcher
            .prompt(&OutboundMessage::text("7", "Your name?"))
            .await;
        match &transport.calls()[0] {
            TransportCall::SendText { markup, .. } => assert_eq!(*markup, Markup::force_reply()),
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_local_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("pic.png"), b"png").unwrap();
        let (transport, dispatcher) = setup(dir.path());

        let message = OutboundMessage::text("1", "look").with_attachment("pic.png");
        assert_ne!(dispatcher.send(&message).await, 0);

        match &transport.calls()[0] {
            TransportCall::Upload {
                media,
                caption,
                contents,
                ..
            } => {
                assert_eq!(*media, MediaType::Photo);
                assert_eq!(caption, "look");
                assert_eq!(contents, b"png");
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forward_remote_reference() {
        let dir = tempdir().unwrap();
        let (transport, dispatcher) = setup(dir.path());

        let message = OutboundMessage::text("1", "")
            .with_attachment("AgAD:audio")
            .with_options(Options::Inline(vec![vec![InlineOption::new("Ok", "ok")]]));
        dispatcher.send(&message).await;

        match &transport.calls()[0] {
            TransportCall::Forward {
                media,
                file_id,
                markup,
                ..
            } => {
                assert_eq!(*media, MediaType::Audio);
                assert_eq!(file_id, "AgAD");
                assert!(matches!(markup, Markup::Inline(_)));
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_returns_zero() {
        let dir = tempdir().unwrap();
        let (transport, dispatcher) = setup(dir.path());
        transport.set_failing(true);

        assert_eq!(dispatcher.send(&OutboundMessage::text("1", "hi")).await, 0);
        assert_eq!(
            dispatcher
                .replace_options("1", 5, &[vec![InlineOption::new("a", "b")]])
                .await,
            0
        );
        assert_eq!(dispatcher.file_link("f").await, "");
        dispatcher.delete_message("1", 5).await;
        dispatcher.edit_message("1", 5, "x", &[]).await;
    }

    #[tokio::test]
    async fn test_replace_options_and_edit() {
        let dir = tempdir().unwrap();
        let (transport, dispatcher) = setup(dir.path());

        let rows = vec![vec![
            InlineOption::new("B", "2"),
            InlineOption::new("A", "1"),
        ]];
        assert_eq!(dispatcher.replace_options("9", 33, &rows).await, 33);
        dispatcher.edit_message("9", 33, "updated", &rows).await;
        dispatcher.delete_message("9", 33).await;

        let calls = transport.calls_to("9");
        assert_eq!(calls.len(), 3);
        match &calls[0] {
            TransportCall::EditInlineMarkup { keyboard, .. } => {
                assert_eq!(keyboard.inline_keyboard[0][0].text, "A");
            }
            other => panic!("unexpected call: {:?}", other),
        }
        assert!(matches!(
            &calls[1],
            TransportCall::EditText { text, .. } if text == "updated"
        ));
        assert_eq!(
            calls[2],
            TransportCall::DeleteMessage {
                chat_id: "9".to_string(),
                message_id: 33
            }
        );
    }
}
