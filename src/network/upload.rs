//! Streaming request body for document uploads.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::transfer::copy::COPY_CHUNK_SIZE;
use crate::transfer::models::ProgressSample;
use crate::transfer::progress::ProgressSink;

/// File body that offers a progress sample per chunk and ends with an error
/// as soon as the transfer is canceled.
pub struct ProgressStream {
    inner: ReaderStream<tokio::fs::File>,
    total: u64,
    sent: u64,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl ProgressStream {
    pub fn new(
        file: tokio::fs::File,
        total: u64,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: ReaderStream::with_capacity(file, COPY_CHUNK_SIZE),
            total,
            sent: 0,
            progress,
            cancel,
        }
    }
}

impl futures_core::Stream for ProgressStream {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "upload canceled",
            ))));
        }
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => {
                self.sent += chunk.len() as u64;
                if self.total > 0 {
                    self.progress
                        .report(ProgressSample::new(self.total, self.sent));
                }
            }
            Poll::Ready(None) if self.sent < self.total => {
                self.progress
                    .report(ProgressSample::new(self.total, self.total));
            }
            _ => {}
        }
        polled
    }
}
