//! What the bot does with one incoming message or button press.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::base_system::context::Config;
use crate::network::messenger::{ChatId, MessageId, Messenger, MessengerError};
use crate::network::models::{CallbackQuery, Message, Update};
use crate::transfer::{Transfer, TransferContext, TransferId, TransferRequest};

pub const WELCOME_TEXT: &str = "Welcome!\nJust send the link to the bot.";
pub const INVALID_URL_TEXT: &str = "The URL is not valid.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Id,
    /// Anything else is treated as a link.
    Link(String),
}

impl Command {
    /// `/start` and `/id` also match the `@botname` suffix groups add.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let head = text.split('@').next().unwrap_or(text);
        match head {
            "/start" => Command::Start,
            "/id" => Command::Id,
            _ => Command::Link(text.to_string()),
        }
    }
}

pub struct Handlers {
    messenger: Arc<dyn Messenger>,
    transfers: Arc<TransferContext>,
    config: Arc<Config>,
}

impl Handlers {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        transfers: Arc<TransferContext>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            messenger,
            transfers,
            config,
        }
    }

    /// Handle one update to completion. Errors are logged, never returned.
    pub async fn handle_update(&self, update: Update) {
        let id = update.update_id;
        let result = if let Some(message) = update.message {
            self.handle_message(&message).await
        } else if let Some(query) = update.callback_query {
            self.handle_callback(&query).await
        } else {
            Ok(())
        };
        if let Err(err) = result {
            warn!(target: "bot", update = id, error = %err, "update handling failed");
        }
    }

    pub async fn handle_message(&self, message: &Message) -> Result<(), MessengerError> {
        let Some(text) = message.text.as_deref() else {
            return Ok(());
        };
        let chat = ChatId(message.chat.id);
        let user = message.from.as_ref();

        match Command::parse(text) {
            Command::Start => {
                self.messenger.send_text(chat, WELCOME_TEXT, None).await?;
            }
            Command::Id => {
                if let Some(user) = user {
                    self.messenger
                        .send_text(chat, &user.id.to_string(), None)
                        .await?;
                }
            }
            Command::Link(link) => {
                let authorized = match user {
                    Some(user) => self.config.is_authorized(user.id),
                    None => self.config.admins.is_empty(),
                };
                if !authorized {
                    // no reply: unknown callers learn nothing about the bot
                    match user {
                        Some(user) => info!(target: "bot", user = user.id, name = %user.display_name(), "unauthorized access"),
                        None => info!(target: "bot", chat = chat.0, "unauthorized access from anonymous sender"),
                    }
                    return Ok(());
                }

                let request = match TransferRequest::new(&link, self.config.transfer_limits()) {
                    Ok(request) => request,
                    Err(err) => {
                        debug!(target: "bot", chat = chat.0, error = %err, "rejected link");
                        self.messenger.send_text(chat, INVALID_URL_TEXT, None).await?;
                        return Ok(());
                    }
                };
                let transfer = Transfer::new(
                    self.transfers.clone(),
                    request,
                    chat,
                    MessageId(message.message_id),
                );
                transfer.run().await;
            }
        }
        Ok(())
    }

    pub async fn handle_callback(&self, query: &CallbackQuery) -> Result<(), MessengerError> {
        let data = query.data.as_deref().unwrap_or_default();
        match data.parse::<TransferId>() {
            Ok(id) => {
                let found = self.transfers.registry.cancel(id);
                info!(target: "bot", transfer = %id, user = query.from.id, found, "cancel requested");
            }
            Err(_) => debug!(target: "bot", data, "ignoring unknown callback data"),
        }
        self.messenger.answer_callback(&query.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::BoxFuture;
    use crate::network::messenger::testing::{Recorded, RecordingMessenger};
    use crate::network::models::{Chat, User};
    use crate::network::origin::{ByteReader, Origin, OriginError};
    use crate::transfer::CancelRegistry;
    use tokio_util::sync::CancellationToken;

    // Every probe fails, so accepted links end right after the size check.
    struct SizelessOrigin;

    impl Origin for SizelessOrigin {
        fn probe_size<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, i64> {
            Box::pin(async { -1 })
        }

        fn open<'a>(
            &'a self,
            _url: &'a str,
        ) -> BoxFuture<'a, Result<(Option<u64>, ByteReader), OriginError>> {
            Box::pin(async { Err(OriginError::Status(404)) })
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        messenger: Arc<RecordingMessenger>,
        registry: Arc<CancelRegistry>,
        handlers: Handlers,
    }

    fn fixture(admins: Vec<i64>) -> Fixture {
        let root = tempfile::TempDir::new().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let registry = Arc::new(CancelRegistry::default());
        let transfers = Arc::new(TransferContext {
            messenger: messenger.clone(),
            origin: Arc::new(SizelessOrigin),
            registry: registry.clone(),
            work_root: root.path().to_path_buf(),
            shutdown: CancellationToken::new(),
        });
        let config = Config {
            admins,
            ..Config::default()
        };
        let handlers = Handlers::new(messenger.clone(), transfers, Arc::new(config));
        Fixture {
            _root: root,
            messenger,
            registry,
            handlers,
        }
    }

    fn user(id: i64) -> User {
        User {
            id,
            first_name: "Ada".into(),
            last_name: Some("Lovelace".into()),
            username: None,
        }
    }

    fn message(from: i64, text: &str) -> Message {
        Message {
            message_id: 10,
            chat: Chat { id: 42 },
            from: Some(user(from)),
            text: Some(text.to_string()),
        }
    }

    fn sent(text: &str) -> Recorded {
        Recorded::Send {
            chat: ChatId(42),
            text: text.to_string(),
            reply_to: None,
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("/start"), Command::Start);
        assert_eq!(Command::parse(" /id@downloader_bot "), Command::Id);
        assert_eq!(
            Command::parse("https://example.com/a.zip"),
            Command::Link("https://example.com/a.zip".into())
        );
        assert_eq!(Command::parse("/help"), Command::Link("/help".into()));
    }

    #[tokio::test]
    async fn start_and_id_answer_everyone() {
        let f = fixture(vec![1]);
        f.handlers.handle_message(&message(7, "/start")).await.unwrap();
        f.handlers.handle_message(&message(7, "/id")).await.unwrap();

        assert_eq!(f.messenger.calls(), vec![sent(WELCOME_TEXT), sent("7")]);
    }

    #[tokio::test]
    async fn unauthorized_links_get_no_reply() {
        let f = fixture(vec![1]);
        f.handlers
            .handle_message(&message(7, "https://example.com/a.bin"))
            .await
            .unwrap();
        assert!(f.messenger.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_links_are_refused() {
        let f = fixture(vec![]);
        f.handlers
            .handle_message(&message(7, "ftp://example.com/a.bin"))
            .await
            .unwrap();
        assert_eq!(f.messenger.calls(), vec![sent(INVALID_URL_TEXT)]);
    }

    #[tokio::test]
    async fn valid_links_start_a_transfer() {
        let f = fixture(vec![7]);
        f.handlers
            .handle_message(&message(7, "https://example.com/a.bin"))
            .await
            .unwrap();

        let calls = f.messenger.calls();
        assert_eq!(
            calls[0],
            Recorded::Send {
                chat: ChatId(42),
                text: "Getting some info about file...".into(),
                reply_to: Some(MessageId(10)),
            }
        );
        assert_eq!(
            calls.last(),
            Some(&Recorded::Edit {
                message: MessageId(100),
                text: "Error on getting file size or the file size is 0".into(),
                cancel_button: None,
            })
        );
    }

    #[tokio::test]
    async fn non_text_messages_are_ignored() {
        let f = fixture(vec![]);
        let mut msg = message(7, "");
        msg.text = None;
        f.handlers.handle_message(&msg).await.unwrap();
        assert!(f.messenger.calls().is_empty());
    }

    #[tokio::test]
    async fn callback_cancels_registered_transfer() {
        let f = fixture(vec![]);
        let token = CancellationToken::new();
        let ticket = f.registry.register(&token);

        let query = CallbackQuery {
            id: "cb1".into(),
            from: user(7),
            data: Some(ticket.id().to_string()),
        };
        f.handlers.handle_callback(&query).await.unwrap();

        assert!(token.is_cancelled());
        assert_eq!(
            f.messenger.calls(),
            vec![Recorded::AnswerCallback { id: "cb1".into() }]
        );
    }

    #[tokio::test]
    async fn stale_or_garbage_callbacks_are_still_answered() {
        let f = fixture(vec![]);
        for data in [Some(TransferId::new().to_string()), Some("garbage".into()), None] {
            let query = CallbackQuery {
                id: "cb".into(),
                from: user(7),
                data,
            };
            f.handlers.handle_callback(&query).await.unwrap();
        }
        assert_eq!(f.messenger.calls().len(), 3);
    }
}
