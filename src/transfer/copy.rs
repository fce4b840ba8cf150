//! Chunked, cancelable byte copy that feeds a progress sink.

use std::io::{self, Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::models::ProgressSample;
use super::progress::ProgressSink;

pub const COPY_CHUNK_SIZE: usize = 80 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("copy canceled")]
    Canceled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Copy `reader` into `writer` until EOF, returning the number of bytes copied.
///
/// `total` is the expected size; 0 means unknown and suppresses reporting.
/// Cancellation is checked between chunks and while waiting on a read, and no
/// write happens once it is observed. Partial output is left to the caller.
pub async fn copy_with_progress<R, W>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CopyError::Canceled),
            read = reader.read(&mut buf) => read?,
        };
        if n == 0 {
            break;
        }
        if cancel.is_cancelled() {
            return Err(CopyError::Canceled);
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        if total > 0 {
            progress.report(ProgressSample::new(total, copied));
        }
    }

    writer.flush().await?;
    report_done(progress, total, copied);
    Ok(copied)
}

/// Blocking twin of [`copy_with_progress`] for use inside `spawn_blocking`.
pub fn copy_blocking<R, W>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<u64, CopyError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Canceled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if cancel.is_cancelled() {
            return Err(CopyError::Canceled);
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
        if total > 0 {
            progress.report(ProgressSample::new(total, copied));
        }
    }

    writer.flush()?;
    report_done(progress, total, copied);
    Ok(copied)
}

// Closes a source that ended short of `total`; otherwise the last chunk was already full.
fn report_done(progress: &dyn ProgressSink, total: u64, copied: u64) {
    if copied < total {
        progress.report(ProgressSample::new(total, total));
    }
}
