//! Telegram Bot API client.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::BoxFuture;
use super::messenger::{ChatId, LocalUpload, MessageId, Messenger, MessengerError};
use super::models::{ApiResponse, InlineKeyboardMarkup, Message, Update, User};
use super::upload::ProgressStream;
use crate::transfer::registry::TransferId;

const GET_UPDATES: &str = "getUpdates";
const LONG_POLL_SLACK: Duration = Duration::from_secs(10);
const CANCEL_BUTTON_TEXT: &str = "Cancel";

pub struct TelegramBot {
    client: Client,
    api_root: String,
}

impl TelegramBot {
    pub fn new(token: &str, api_base_url: &str) -> Result<Self, MessengerError> {
        let client = Client::builder()
            .user_agent(concat!("downloader-bot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MessengerError::Http)?;
        Ok(Self {
            client,
            api_root: format!("{}/bot{}", api_base_url.trim_end_matches('/'), token.trim()),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_root)
    }

    fn request(&self, method: &str, body: &Value) -> RequestBuilder {
        let req = self.client.post(self.method_url(method)).json(body);
        match request_timeout(method, body) {
            Some(timeout) => req.timeout(timeout),
            None => req,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
    ) -> Result<T, MessengerError> {
        let resp = self.request(method, body).send().await.map_err(redact)?;
        let envelope: ApiResponse<T> = resp.json().await.map_err(redact)?;
        unwrap_envelope(envelope)
    }

    pub async fn get_me(&self) -> Result<User, MessengerError> {
        self.call("getMe", &json!({})).await
    }

    /// Long poll for updates with ids at or above `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, MessengerError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call(GET_UPDATES, &body).await
    }

    pub async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, MessengerError> {
        let mut body = json!({ "chat_id": chat.0, "text": text });
        if let Some(reply) = reply_to {
            body["reply_to_message_id"] = json!(reply.0);
        }
        let sent: Message = self.call("sendMessage", &body).await?;
        Ok(MessageId(sent.message_id))
    }

    pub async fn edit_message_text(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        cancel_button: Option<TransferId>,
    ) -> Result<(), MessengerError> {
        let mut body = json!({ "chat_id": chat.0, "message_id": message.0, "text": text });
        if let Some(id) = cancel_button {
            body["reply_markup"] = json!(InlineKeyboardMarkup::single_button(
                CANCEL_BUTTON_TEXT,
                id.to_string()
            ));
        }
        match self
            .call::<Value>("editMessageText", &body)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_modified(&err) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn delete_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> Result<(), MessengerError> {
        let body = json!({ "chat_id": chat.0, "message_id": message.0 });
        self.call::<Value>("deleteMessage", &body)
            .await
            .map(|_| ())
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<(), MessengerError> {
        let body = json!({ "callback_query_id": callback_id });
        self.call::<Value>("answerCallbackQuery", &body)
            .await
            .map(|_| ())
    }

    pub async fn send_document_url(
        &self,
        chat: ChatId,
        url: &str,
        reply_to: Option<MessageId>,
    ) -> Result<(), MessengerError> {
        let mut body = json!({ "chat_id": chat.0, "document": url });
        if let Some(reply) = reply_to {
            body["reply_to_message_id"] = json!(reply.0);
        }
        self.call::<Value>("sendDocument", &body)
            .await
            .map(|_| ())
    }

    /// Multipart upload with a streaming body. No request timeout: large parts
    /// take as long as they take, and the cancel token is the only way out.
    pub async fn send_document_file(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        upload: LocalUpload,
    ) -> Result<(), MessengerError> {
        let LocalUpload {
            path,
            file_name,
            progress,
            cancel,
        } = upload;

        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        let stream = ProgressStream::new(file, len, progress, cancel.clone());
        let body = reqwest::Body::wrap_stream(stream);
        let part = Part::stream_with_length(body, len).file_name(file_name.clone());

        let mut form = Form::new()
            .text("chat_id", chat.0.to_string())
            .part("document", part);
        if let Some(reply) = reply_to {
            form = form.text("reply_to_message_id", reply.0.to_string());
        }

        debug!(target: "telegram", file = %file_name, bytes = len, "uploading document");
        let send = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send();

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MessengerError::Canceled),
            resp = send => resp,
        };
        if cancel.is_cancelled() {
            return Err(MessengerError::Canceled);
        }
        let envelope: ApiResponse<Value> = resp.map_err(redact)?.json().await.map_err(redact)?;
        unwrap_envelope(envelope).map(|_| ())
    }
}

impl Messenger for TelegramBot {
    fn send_text<'a>(
        &'a self,
        chat: ChatId,
        text: &'a str,
        reply_to: Option<MessageId>,
    ) -> BoxFuture<'a, Result<MessageId, MessengerError>> {
        Box::pin(self.send_message(chat, text, reply_to))
    }

    fn edit_text<'a>(
        &'a self,
        chat: ChatId,
        message: MessageId,
        text: &'a str,
        cancel_button: Option<TransferId>,
    ) -> BoxFuture<'a, Result<(), MessengerError>> {
        Box::pin(self.edit_message_text(chat, message, text, cancel_button))
    }

    fn delete_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> BoxFuture<'_, Result<(), MessengerError>> {
        Box::pin(TelegramBot::delete_message(self, chat, message))
    }

    fn send_document_url<'a>(
        &'a self,
        chat: ChatId,
        url: &'a str,
        reply_to: Option<MessageId>,
    ) -> BoxFuture<'a, Result<(), MessengerError>> {
        Box::pin(TelegramBot::send_document_url(self, chat, url, reply_to))
    }

    fn send_document_file(
        &self,
        chat: ChatId,
        reply_to: Option<MessageId>,
        upload: LocalUpload,
    ) -> BoxFuture<'_, Result<(), MessengerError>> {
        Box::pin(TelegramBot::send_document_file(self, chat, reply_to, upload))
    }

    fn answer_callback<'a>(
        &'a self,
        callback_id: &'a str,
    ) -> BoxFuture<'a, Result<(), MessengerError>> {
        Box::pin(self.answer_callback_query(callback_id))
    }
}

// Only the long poll is bounded, by the wait it asked the server for.
fn request_timeout(method: &str, body: &Value) -> Option<Duration> {
    if method != GET_UPDATES {
        return None;
    }
    let wait = body["timeout"].as_u64().unwrap_or(0);
    Some(Duration::from_secs(wait) + LONG_POLL_SLACK)
}

// reqwest errors carry the request URL, which embeds the bot token.
fn redact(err: reqwest::Error) -> MessengerError {
    MessengerError::Http(err.without_url())
}

fn unwrap_envelope<T>(envelope: ApiResponse<T>) -> Result<T, MessengerError> {
    match envelope {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse {
            error_code,
            description,
            ..
        } => Err(MessengerError::Api {
            code: error_code.unwrap_or(0),
            description: description.unwrap_or_else(|| "response without result".to_string()),
        }),
    }
}

fn is_not_modified(err: &MessengerError) -> bool {
    matches!(err, MessengerError::Api { description, .. } if description.contains("message is not modified"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_urls_embed_token_once() {
        let bot = TelegramBot::new(" 123:abc ", "https://api.telegram.org/").unwrap();
        assert_eq!(
            bot.method_url("getMe"),
            "https://api.telegram.org/bot123:abc/getMe"
        );
    }

    #[test]
    fn only_long_poll_requests_time_out() {
        let bot = TelegramBot::new("1:t", "https://api.telegram.org").unwrap();

        let relay = json!({ "chat_id": 1, "document": "https://example.com/a.pdf" });
        let req = bot.request("sendDocument", &relay).build().unwrap();
        assert_eq!(req.timeout(), None);
        for method in ["getMe", "sendMessage", "editMessageText", "deleteMessage"] {
            let req = bot.request(method, &json!({})).build().unwrap();
            assert_eq!(req.timeout(), None, "{method}");
        }

        let poll = json!({ "offset": 0, "timeout": 30 });
        let req = bot.request(GET_UPDATES, &poll).build().unwrap();
        assert_eq!(req.timeout(), Some(&Duration::from_secs(40)));
    }

    #[test]
    fn envelope_errors_become_api_errors() {
        let raw = r#"{"ok":false,"error_code":400,"description":"Bad Request: message is not modified"}"#;
        let env: ApiResponse<Value> = serde_json::from_str(raw).unwrap();
        let err = unwrap_envelope(env).unwrap_err();
        assert!(is_not_modified(&err));
        assert!(matches!(err, MessengerError::Api { code: 400, .. }));

        let ok: ApiResponse<bool> = serde_json::from_str(r#"{"ok":true,"result":true}"#).unwrap();
        assert!(unwrap_envelope(ok).unwrap());
    }

    #[test]
    fn other_api_errors_are_kept() {
        let err = MessengerError::Api {
            code: 403,
            description: "Forbidden: bot was blocked by the user".into(),
        };
        assert!(!is_not_modified(&err));
    }
}
