//! The transient status message a transfer keeps editing while it runs.
//!
//! All edits for one message go through a single worker task fed by an
//! unbounded channel, so callers never wait on the chat platform and the
//! terminal update is always the last one applied.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::registry::TransferId;
use crate::network::messenger::{ChatId, MessageId, Messenger, MessengerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalUpdate {
    /// Success: the status message disappears.
    Delete,
    /// Cancellation or failure: the status message is replaced with this text.
    Replace(String),
}

#[derive(Debug)]
enum StatusCommand {
    Edit {
        text: String,
        cancel_button: Option<TransferId>,
    },
    Finish(TerminalUpdate),
}

/// Cheap, cloneable sender side used by progress reporters.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: mpsc::UnboundedSender<StatusCommand>,
}

impl StatusHandle {
    /// Queue an edit. Never blocks; silently dropped after the line finished.
    pub fn set(&self, text: impl Into<String>, cancel_button: Option<TransferId>) {
        let _ = self.tx.send(StatusCommand::Edit {
            text: text.into(),
            cancel_button,
        });
    }
}

pub struct StatusLine {
    handle: StatusHandle,
    worker: JoinHandle<Result<(), MessengerError>>,
}

impl StatusLine {
    pub fn spawn(messenger: Arc<dyn Messenger>, chat: ChatId, message: MessageId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(drain(messenger, chat, message, rx));
        Self {
            handle: StatusHandle { tx },
            worker,
        }
    }

    pub fn handle(&self) -> StatusHandle {
        self.handle.clone()
    }

    pub fn set(&self, text: impl Into<String>, cancel_button: Option<TransferId>) {
        self.handle.set(text, cancel_button);
    }

    /// Apply the terminal update after every edit queued so far and stop the worker.
    pub async fn finish(self, update: TerminalUpdate) -> Result<(), MessengerError> {
        let _ = self.handle.tx.send(StatusCommand::Finish(update));
        self.worker
            .await
            .map_err(|e| MessengerError::Transport(format!("status worker failed: {e}")))?
    }
}

async fn drain(
    messenger: Arc<dyn Messenger>,
    chat: ChatId,
    message: MessageId,
    mut rx: mpsc::UnboundedReceiver<StatusCommand>,
) -> Result<(), MessengerError> {
    while let Some(mut cmd) = rx.recv().await {
        // only the newest pending edit matters
        while matches!(cmd, StatusCommand::Edit { .. }) {
            match rx.try_recv() {
                Ok(next) => cmd = next,
                Err(_) => break,
            }
        }

        match cmd {
            StatusCommand::Edit {
                text,
                cancel_button,
            } => {
                if let Err(err) = messenger
                    .edit_text(chat, message, &text, cancel_button)
                    .await
                {
                    debug!(target: "status", chat = chat.0, message = message.0, error = %err, "status edit failed");
                }
            }
            StatusCommand::Finish(TerminalUpdate::Delete) => {
                return messenger.delete_message(chat, message).await;
            }
            StatusCommand::Finish(TerminalUpdate::Replace(text)) => {
                return messenger.edit_text(chat, message, &text, None).await;
            }
        }
    }
    Ok(())
}

/// Test-only receiver standing in for the worker.
#[cfg(test)]
pub(crate) struct StatusCapture {
    rx: mpsc::UnboundedReceiver<StatusCommand>,
}

#[cfg(test)]
impl StatusCapture {
    pub(crate) fn new() -> (StatusHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StatusHandle { tx }, Self { rx })
    }

    /// Every edit text queued so far, in order.
    pub(crate) fn texts(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.rx.try_recv() {
            if let StatusCommand::Edit { text, .. } = cmd {
                out.push(text);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::messenger::testing::{Recorded, RecordingMessenger};

    #[tokio::test]
    async fn terminal_update_is_applied_last() {
        let messenger = Arc::new(RecordingMessenger::default());
        let line = StatusLine::spawn(messenger.clone(), ChatId(1), MessageId(7));
        for i in 0..50 {
            line.set(format!("step {i}"), None);
        }
        line.finish(TerminalUpdate::Replace("Canceled".into()))
            .await
            .unwrap();

        let calls = messenger.calls();
        assert!(!calls.is_empty());
        assert_eq!(
            calls.last(),
            Some(&Recorded::Edit {
                message: MessageId(7),
                text: "Canceled".into(),
                cancel_button: None,
            })
        );
    }

    #[tokio::test]
    async fn delete_on_success() {
        let messenger = Arc::new(RecordingMessenger::default());
        let line = StatusLine::spawn(messenger.clone(), ChatId(1), MessageId(3));
        line.finish(TerminalUpdate::Delete).await.unwrap();
        assert_eq!(messenger.calls(), vec![Recorded::Delete { message: MessageId(3) }]);
    }

    #[tokio::test]
    async fn edits_after_finish_are_dropped() {
        let messenger = Arc::new(RecordingMessenger::default());
        let line = StatusLine::spawn(messenger.clone(), ChatId(1), MessageId(3));
        let handle = line.handle();
        line.finish(TerminalUpdate::Delete).await.unwrap();
        handle.set("late", None);
        tokio::task::yield_now().await;
        assert_eq!(messenger.calls().len(), 1);
    }
}
