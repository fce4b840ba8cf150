//! Transfer data model: requests, limits, progress samples, states and errors.

use std::collections::HashSet;
use std::fmt;

use reqwest::Url;

use crate::base_system::context::safe_fs_name;
use crate::network::messenger::MessengerError;

/// Fallback file name when a URL has no usable last path segment.
pub const FALLBACK_FILE_NAME: &str = "download.bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLimits {
    /// Files of this size or larger are rejected.
    pub size_limit: u64,
    /// Files below this size are uploaded whole (or relayed by URL).
    pub direct_upload_threshold: u64,
    /// Lowercase, dot-prefixed extensions eligible for direct relay.
    pub direct_upload_extensions: HashSet<String>,
    pub max_segment_bytes: u64,
    pub compression_level: i32,
}

/// One request to move a remote file into the chat. Immutable once built.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    source_url: String,
    source_name: String,
    file_name: String,
    limits: TransferLimits,
}

impl TransferRequest {
    /// Validates that `url` is an absolute http(s) URL.
    pub fn new(url: &str, limits: TransferLimits) -> Result<Self, TransferError> {
        let url = url.trim();
        validate_url(url)?;
        Ok(Self {
            source_url: url.to_string(),
            source_name: last_path_segment(url).to_string(),
            file_name: file_name_from_url(url),
            limits,
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Last path segment exactly as the URL has it, query cut off.
    /// Drives the direct relay extension check.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Name used on disk and for the uploaded document.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn limits(&self) -> &TransferLimits {
        &self.limits
    }
}

pub fn validate_url(url: &str) -> Result<Url, TransferError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
            Ok(parsed)
        }
        _ => Err(TransferError::InvalidSource(url.to_string())),
    }
}

/// Last `/` segment of the URL with the query string and fragment cut off.
pub fn last_path_segment(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or("");
    path.rsplit('/').next().unwrap_or("")
}

/// [`last_path_segment`] made filesystem safe.
pub fn file_name_from_url(url: &str) -> String {
    let name = last_path_segment(url).trim();
    if name.is_empty() {
        return FALLBACK_FILE_NAME.to_string();
    }
    safe_fs_name(name, "_", 180)
}

/// A progress observation: `bytes_so_far` out of `total_bytes` (0 = unknown).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSample {
    pub total_bytes: u64,
    pub bytes_so_far: u64,
}

impl ProgressSample {
    pub fn new(total_bytes: u64, bytes_so_far: u64) -> Self {
        Self {
            total_bytes,
            bytes_so_far,
        }
    }

    /// Whole percent in `0..=100`; 0 when the total is unknown.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let pct = (self.bytes_so_far as u128 * 100) / self.total_bytes as u128;
        pct.min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Probing,
    DirectRelay,
    Downloading,
    Archiving,
    UploadingSegment { index: usize, count: usize },
    Completed,
    Canceled,
    Failed(String),
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Canceled | TransferState::Failed(_)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Probing => f.write_str("probing"),
            TransferState::DirectRelay => f.write_str("direct-relay"),
            TransferState::Downloading => f.write_str("downloading"),
            TransferState::Archiving => f.write_str("archiving"),
            TransferState::UploadingSegment { index, count } => {
                write!(f, "uploading {index}/{count}")
            }
            TransferState::Completed => f.write_str("completed"),
            TransferState::Canceled => f.write_str("canceled"),
            TransferState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Every failure a transfer can end in. The `Display` text is what the user sees.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Error on getting file size or the file size is 0")]
    SizeProbeFailed,

    #[error("The URL is not valid.")]
    InvalidSource(String),

    #[error("File is too large for bot! (file size is {0} bytes)")]
    TooLarge(u64),

    #[error("Error downloading {url}")]
    DownloadFailed { url: String, reason: String },

    #[error("Error on compressing {url}")]
    ArchiveFailed { url: String, reason: String },

    #[error("Error on uploading {url} (part {part}/{parts}). Canceling operation.")]
    UploadFailed {
        url: String,
        part: usize,
        parts: usize,
        reason: String,
    },

    #[error("Canceled")]
    Canceled,

    #[error("Error talking to the chat platform: {0}")]
    DestinationTransport(#[from] MessengerError),
}

impl TransferError {
    /// Underlying cause for logs; the user-facing text omits it.
    pub fn detail(&self) -> Option<&str> {
        match self {
            TransferError::DownloadFailed { reason, .. }
            | TransferError::ArchiveFailed { reason, .. }
            | TransferError::UploadFailed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> TransferLimits {
        TransferLimits {
            size_limit: 50,
            direct_upload_threshold: 20,
            direct_upload_extensions: HashSet::new(),
            max_segment_bytes: 10,
            compression_level: 1,
        }
    }

    #[test]
    fn file_name_strips_query_and_fragment() {
        assert_eq!(
            file_name_from_url("https://example.com/files/report.pdf?token=abc"),
            "report.pdf"
        );
        assert_eq!(file_name_from_url("https://example.com/a/b.tar.gz#x"), "b.tar.gz");
        assert_eq!(file_name_from_url("https://example.com/"), FALLBACK_FILE_NAME);
        assert_eq!(file_name_from_url("https://example.com/dir/?q=1"), FALLBACK_FILE_NAME);
    }

    #[test]
    fn long_names_keep_their_extension_on_disk() {
        let url = format!("https://example.com/{}.pdf?x=1", "a".repeat(200));
        let req = TransferRequest::new(&url, limits()).unwrap();
        assert_eq!(req.source_name(), format!("{}.pdf", "a".repeat(200)));
        assert_eq!(req.file_name().len(), 180);
        assert!(req.file_name().ends_with(".pdf"));
    }

    #[test]
    fn source_name_is_not_cleaned() {
        let req = TransferRequest::new("https://example.com/d/report.pdf.?t=1", limits()).unwrap();
        assert_eq!(req.source_name(), "report.pdf.");
        assert_eq!(req.file_name(), "report.pdf");
        assert_eq!(last_path_segment("https://example.com/a/b?next=/c/d.pdf"), "b");
    }

    #[test]
    fn request_rejects_non_http_urls() {
        assert!(TransferRequest::new("ftp://example.com/a.bin", limits()).is_err());
        assert!(TransferRequest::new("not a url", limits()).is_err());
        assert!(TransferRequest::new("/relative/path", limits()).is_err());

        let req = TransferRequest::new("  https://example.com/a.bin ", limits()).unwrap();
        assert_eq!(req.source_url(), "https://example.com/a.bin");
        assert_eq!(req.file_name(), "a.bin");
    }

    #[test]
    fn percent_is_guarded_and_clamped() {
        assert_eq!(ProgressSample::new(0, 10).percent(), 0);
        assert_eq!(ProgressSample::new(200, 50).percent(), 25);
        assert_eq!(ProgressSample::new(100, 250).percent(), 100);
        assert_eq!(ProgressSample::new(u64::MAX, u64::MAX).percent(), 100);
    }

    #[test]
    fn user_messages_match_bot_wording() {
        assert_eq!(
            TransferError::TooLarge(60_000_000).to_string(),
            "File is too large for bot! (file size is 60000000 bytes)"
        );
        assert_eq!(TransferError::Canceled.to_string(), "Canceled");
        let err = TransferError::DownloadFailed {
            url: "https://x/y".into(),
            reason: "reset".into(),
        };
        assert_eq!(err.to_string(), "Error downloading https://x/y");
        assert_eq!(err.detail(), Some("reset"));
    }

    #[test]
    fn terminal_states() {
        assert!(TransferState::Completed.is_terminal());
        assert!(TransferState::Failed("x".into()).is_terminal());
        assert!(!TransferState::UploadingSegment { index: 1, count: 2 }.is_terminal());
    }
}
