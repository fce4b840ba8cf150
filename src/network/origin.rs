//! The remote HTTP server a transfer pulls bytes from.

use std::pin::Pin;

use futures_util::TryStreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_LENGTH;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::BoxFuture;

pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum OriginError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("origin answered with status {0}")]
    Status(u16),
}

pub trait Origin: Send + Sync {
    /// Size announced by the origin, or -1 when it is missing or unreadable.
    fn probe_size<'a>(&'a self, url: &'a str) -> BoxFuture<'a, i64>;

    /// Open the body for reading. Also returns the announced length, if any.
    fn open<'a>(&'a self, url: &'a str)
    -> BoxFuture<'a, Result<(Option<u64>, ByteReader), OriginError>>;
}

#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    pub fn new() -> Result<Self, OriginError> {
        let client = Client::builder()
            .user_agent(concat!("downloader-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn head_length(&self, url: &str) -> Result<i64, OriginError> {
        let resp = self.client.head(url).send().await?;
        if !resp.status().is_success() {
            return Err(OriginError::Status(resp.status().as_u16()));
        }
        Ok(resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(-1))
    }
}

impl Origin for HttpOrigin {
    fn probe_size<'a>(&'a self, url: &'a str) -> BoxFuture<'a, i64> {
        Box::pin(async move {
            match self.head_length(url).await {
                Ok(size) => size,
                Err(err) => {
                    debug!(target: "origin", url, error = %err, "size probe failed");
                    -1
                }
            }
        })
    }

    fn open<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<(Option<u64>, ByteReader), OriginError>> {
        Box::pin(async move {
            let resp = self.client.get(url).send().await?;
            if !resp.status().is_success() {
                return Err(OriginError::Status(resp.status().as_u16()));
            }
            let len = resp.content_length();
            let stream = resp.bytes_stream().map_err(std::io::Error::other);
            let reader: ByteReader = Box::pin(StreamReader::new(stream));
            Ok((len, reader))
        })
    }
}
