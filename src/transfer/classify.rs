//! Picks how a remote file of a given size travels to the chat.

use std::path::Path;

use super::models::TransferLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Let the platform fetch the URL itself.
    DirectRelay,
    /// At or above the size limit.
    Reject,
    DownloadThenUploadWhole,
    DownloadThenArchiveThenUploadSegments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("remote size is unknown")]
    SizeUnknown,
}

/// Decide the strategy for `remote_size` bytes named `file_name`.
///
/// Rules apply in this order:
/// 1. size < 1 is unknown
/// 2. below the direct threshold with an allow-listed extension relays by URL
/// 3. at or above the size limit is rejected
/// 4. below the direct threshold downloads and uploads whole
/// 5. anything else is downloaded, zipped into segments and uploaded part by part
pub fn classify(
    remote_size: i64,
    file_name: &str,
    limits: &TransferLimits,
) -> Result<Strategy, ClassifyError> {
    if remote_size < 1 {
        return Err(ClassifyError::SizeUnknown);
    }
    let size = remote_size as u64;

    if size < limits.direct_upload_threshold && relay_extension_allowed(file_name, limits) {
        return Ok(Strategy::DirectRelay);
    }
    if size >= limits.size_limit {
        return Ok(Strategy::Reject);
    }
    if size < limits.direct_upload_threshold {
        return Ok(Strategy::DownloadThenUploadWhole);
    }
    Ok(Strategy::DownloadThenArchiveThenUploadSegments)
}

fn relay_extension_allowed(file_name: &str, limits: &TransferLimits) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .is_some_and(|e| limits.direct_upload_extensions.contains(&e))
}
