//! The chat platform as seen by transfers and request handlers.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::BoxFuture;
use crate::transfer::progress::ProgressSink;
use crate::transfer::registry::TransferId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub i64);

#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("upload canceled")]
    Canceled,
    #[error("transport error: {0}")]
    Transport(String),
}

impl MessengerError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, MessengerError::Canceled)
    }
}

/// A local file to stream into the chat.
pub struct LocalUpload {
    pub path: PathBuf,
    pub file_name: String,
    pub progress: Arc<dyn ProgressSink>,
    pub cancel: CancellationToken,
}

pub trait Messenger: Send + Sync {
    fn send_text<'a>(
        &'a self,
        chat: ChatId,
        text: &'a str,
        reply_to: Option<MessageId>,
    ) -> BoxFuture<'a, Result<MessageId, MessengerError>>;

    /// Replace a message's text; `cancel_button` attaches a single "Cancel" control.
    fn edit_text<'a>(
        &'a self,
        chat: ChatId,
        message: MessageId,
        text: &'a str,
        cancel_button: Option<TransferId>,
    ) -> BoxFuture<'a, Result<(), MessengerError>>;

    fn delete_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> BoxFuture<'_, Result<(), MessengerError>>;

    /// Ask the platform to fetch `url` itself and post it as a document.
    fn send_document_url<'a>(
        &'a self,
        chat: ChatId,
        url: &'a str,
        reply_to: Option<MessageId>,
    ) -> BoxFuture<'a, Result<(), MessengerError>>;

    /// Stream a local file as a document. Resolves to [`MessengerError::Canceled`]
    /// once `upload.cancel` fires.
    fn send_document_file(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        upload: LocalUpload,
    ) -> BoxFuture<'_, Result<(), MessengerError>>;

    fn answer_callback<'a>(&'a self, callback_id: &'a str)
    -> BoxFuture<'a, Result<(), MessengerError>>;
}
