//! Drives one transfer from size probe to the final status update.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::archive::{ArchiveError, archive};
use super::classify::{Strategy, classify};
use super::copy::{CopyError, copy_with_progress};
use super::models::{TransferError, TransferRequest, TransferState};
use super::progress::ProgressReporter;
use super::registry::{CancelRegistry, TransferId, TransferTicket};
use super::status::{StatusLine, TerminalUpdate};
use crate::base_system::work_dir::WorkDir;
use crate::network::messenger::{ChatId, LocalUpload, MessageId, Messenger};
use crate::network::origin::Origin;

const PROBING_TEXT: &str = "Getting some info about file...";
const DIRECT_RELAY_TEXT: &str = "Telegram is directly downloading the file...";
const DOWNLOADING_TEXT: &str = "Downloading file on server:";
const UPLOADING_TEXT: &str = "Uploading file";
const UPLOADING_PROGRESS_TEXT: &str = "Uploading to Telegram...";
const ZIPPING_TEXT: &str = "Zipping file";
const ZIPPING_PROGRESS_TEXT: &str = "Zipping...";
const CANCELED_TEXT: &str = "Canceled";

/// Collaborators shared by every transfer.
pub struct TransferContext {
    pub messenger: Arc<dyn Messenger>,
    pub origin: Arc<dyn Origin>,
    pub registry: Arc<CancelRegistry>,
    /// Per-transfer working directories are created under this root.
    pub work_root: PathBuf,
    /// Parent of every transfer's cancel token.
    pub shutdown: CancellationToken,
}

/// One in-flight transfer. Owns its cancel token, working directory and
/// registry entry; all three are released before [`Transfer::run`] returns.
pub struct Transfer {
    ctx: Arc<TransferContext>,
    request: TransferRequest,
    chat: ChatId,
    reply_to: MessageId,
    cancel: CancellationToken,
    state: TransferState,
    workdir: Option<WorkDir>,
    ticket: Option<TransferTicket>,
}

impl Transfer {
    pub fn new(
        ctx: Arc<TransferContext>,
        request: TransferRequest,
        chat: ChatId,
        reply_to: MessageId,
    ) -> Self {
        let cancel = ctx.shutdown.child_token();
        Self {
            ctx,
            request,
            chat,
            reply_to,
            cancel,
            state: TransferState::Probing,
            workdir: None,
            ticket: None,
        }
    }

    /// Run to a terminal state. Never panics outward and never returns an
    /// error: every failure is reported to the chat and mapped to the result.
    pub async fn run(mut self) -> TransferState {
        let url = self.request.source_url().to_string();
        info!(target: "transfer", url = %url, chat = self.chat.0, "transfer requested");

        let status_msg = match self
            .ctx
            .messenger
            .send_text(self.chat, PROBING_TEXT, Some(self.reply_to))
            .await
        {
            Ok(id) => id,
            Err(err) => {
                error!(target: "transfer", url = %url, error = %err, "cannot post status message");
                return TransferState::Failed(TransferError::from(err).to_string());
            }
        };
        let status = StatusLine::spawn(self.ctx.messenger.clone(), self.chat, status_msg);

        let result = self.drive(&status).await;
        self.release().await;

        let (state, update) = match result {
            Ok(()) => (TransferState::Completed, TerminalUpdate::Delete),
            Err(TransferError::Canceled) => (
                TransferState::Canceled,
                TerminalUpdate::Replace(CANCELED_TEXT.to_string()),
            ),
            Err(err) => {
                match err.detail() {
                    Some(detail) => {
                        warn!(target: "transfer", url = %url, error = %err, detail, "transfer failed")
                    }
                    None => warn!(target: "transfer", url = %url, error = %err, "transfer failed"),
                }
                let text = err.to_string();
                (TransferState::Failed(text.clone()), TerminalUpdate::Replace(text))
            }
        };
        debug_assert!(state.is_terminal());
        self.enter(state.clone());

        if let Err(err) = status.finish(update).await {
            warn!(target: "transfer", url = %url, error = %err, "final status update failed");
        }
        info!(
            target: "transfer",
            url = %url,
            state = %state,
            active = self.ctx.registry.len(),
            "transfer finished"
        );
        state
    }

    fn enter(&mut self, next: TransferState) {
        debug!(target: "transfer", from = %self.state, to = %next, "state change");
        self.state = next;
    }

    // Working directory and registry entry go away on every path.
    async fn release(&mut self) {
        if let Some(dir) = self.workdir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.remove().await {
                error!(target: "transfer", dir = %path.display(), error = %err, "cannot remove working directory");
            }
        }
        self.ticket = None;
    }

    async fn drive(&mut self, status: &StatusLine) -> Result<(), TransferError> {
        let url = self.request.source_url().to_string();
        let limits = self.request.limits().clone();

        let size = self.ctx.origin.probe_size(&url).await;
        let mut strategy = classify(size, self.request.source_name(), &limits)
            .map_err(|_| TransferError::SizeProbeFailed)?;
        let size = size as u64;
        debug!(target: "transfer", url = %url, size, strategy = ?strategy, "classified");

        if strategy == Strategy::DirectRelay {
            self.enter(TransferState::DirectRelay);
            status.set(DIRECT_RELAY_TEXT, None);
            match self
                .ctx
                .messenger
                .send_document_url(self.chat, &url, Some(self.reply_to))
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(target: "transfer", url = %url, error = %err, "direct relay failed, downloading instead");
                    strategy = if size >= limits.size_limit {
                        Strategy::Reject
                    } else {
                        Strategy::DownloadThenUploadWhole
                    };
                }
            }
        }

        if strategy == Strategy::Reject {
            return Err(TransferError::TooLarge(size));
        }

        let ticket = self.ctx.registry.register(&self.cancel);
        let id = ticket.id();
        self.ticket = Some(ticket);

        self.enter(TransferState::Downloading);
        status.set(DOWNLOADING_TEXT, Some(id));
        let workdir = WorkDir::create(&self.ctx.work_root)
            .map_err(|e| self.download_failed(e.to_string()))?;
        let downloaded = workdir.join(self.request.file_name());
        self.workdir = Some(workdir);
        self.download(&downloaded, size, status, id).await?;

        match strategy {
            Strategy::DownloadThenUploadWhole => {
                self.enter(TransferState::UploadingSegment { index: 1, count: 1 });
                status.set(UPLOADING_TEXT, Some(id));
                self.upload(&downloaded, UPLOADING_PROGRESS_TEXT, 1, 1, status, id)
                    .await
            }
            _ => {
                self.enter(TransferState::Archiving);
                status.set(ZIPPING_TEXT, Some(id));
                let reporter = Arc::new(ProgressReporter::new(
                    status.handle(),
                    ZIPPING_PROGRESS_TEXT,
                    Some(id),
                ));
                let segments = archive(
                    &downloaded,
                    limits.max_segment_bytes,
                    limits.compression_level,
                    reporter,
                    &self.cancel,
                )
                .await
                .map_err(|e| match e {
                    ArchiveError::Canceled => TransferError::Canceled,
                    other => TransferError::ArchiveFailed {
                        url: url.clone(),
                        reason: other.to_string(),
                    },
                })?;

                let count = segments.len();
                for (i, segment) in segments.iter().enumerate() {
                    if self.cancel.is_cancelled() {
                        return Err(TransferError::Canceled);
                    }
                    let index = i + 1;
                    self.enter(TransferState::UploadingSegment { index, count });
                    let label = format!("Uploading part {index}/{count} to Telegram...");
                    status.set(label.clone(), Some(id));
                    self.upload(segment, &label, index, count, status, id)
                        .await?;
                }
                Ok(())
            }
        }
    }

    async fn download(
        &self,
        dest: &Path,
        probed_size: u64,
        status: &StatusLine,
        id: TransferId,
    ) -> Result<(), TransferError> {
        let url = self.request.source_url();
        let (announced, mut reader) = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TransferError::Canceled),
            opened = self.ctx.origin.open(url) => {
                opened.map_err(|e| self.download_failed(e.to_string()))?
            }
        };
        let total = announced.filter(|n| *n > 0).unwrap_or(probed_size);

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| self.download_failed(e.to_string()))?;
        let reporter = ProgressReporter::new(status.handle(), DOWNLOADING_TEXT, Some(id));
        let copied = copy_with_progress(&mut reader, &mut file, total, &reporter, &self.cancel)
            .await
            .map_err(|e| match e {
                CopyError::Canceled => TransferError::Canceled,
                CopyError::Io(e) => self.download_failed(e.to_string()),
            })?;

        if self.cancel.is_cancelled() {
            return Err(TransferError::Canceled);
        }
        debug!(target: "transfer", url, bytes = copied, "download complete");
        Ok(())
    }

    async fn upload(
        &self,
        path: &Path,
        label: &str,
        part: usize,
        parts: usize,
        status: &StatusLine,
        id: TransferId,
    ) -> Result<(), TransferError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.request.file_name().to_string());
        let upload = LocalUpload {
            path: path.to_path_buf(),
            file_name,
            progress: Arc::new(ProgressReporter::new(status.handle(), label, Some(id))),
            cancel: self.cancel.clone(),
        };

        match self
            .ctx
            .messenger
            .send_document_file(self.chat, Some(self.reply_to), upload)
            .await
        {
            Ok(()) if self.cancel.is_cancelled() => Err(TransferError::Canceled),
            Ok(()) => Ok(()),
            Err(err) if err.is_canceled() || self.cancel.is_cancelled() => {
                Err(TransferError::Canceled)
            }
            Err(err) => Err(TransferError::UploadFailed {
                url: self.request.source_url().to_string(),
                part,
                parts,
                reason: err.to_string(),
            }),
        }
    }

    fn download_failed(&self, reason: String) -> TransferError {
        TransferError::DownloadFailed {
            url: self.request.source_url().to_string(),
            reason,
        }
    }
}
