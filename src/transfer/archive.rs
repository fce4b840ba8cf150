//! Packs a downloaded file into a split zip archive.
//!
//! The archive is one ordinary zip stream cut into byte slices of at most
//! `max_segment_bytes`. A single slice is named `<name>.zip`; several are
//! `<name>.zip.001`, `<name>.zip.002`, ..., the numbered split convention
//! 7-Zip joins on open. Concatenating them in upload order gives back the
//! archive.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::copy::{CopyError, copy_blocking};
use super::progress::ProgressSink;

// Entries at or above this size need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archiving canceled")]
    Canceled,
    #[error("segment size must be positive")]
    InvalidSegmentSize,
    #[error("input has no file name: {0}")]
    InvalidInput(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive worker failed: {0}")]
    Worker(String),
}

impl From<CopyError> for ArchiveError {
    fn from(e: CopyError) -> Self {
        match e {
            CopyError::Canceled => ArchiveError::Canceled,
            CopyError::Io(e) => ArchiveError::Io(e),
        }
    }
}

/// Compress `input` into segments of at most `max_segment_bytes` each.
///
/// Progress tracks input bytes consumed. On success the input file is
/// removed and the segment paths are returned in upload order; on failure or
/// cancellation every segment written so far is removed.
pub async fn archive(
    input: &Path,
    max_segment_bytes: u64,
    compression_level: i32,
    progress: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let input = input.to_path_buf();
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || {
        archive_blocking(
            &input,
            max_segment_bytes,
            compression_level,
            progress.as_ref(),
            &cancel,
        )
    })
    .await
    .map_err(|e| ArchiveError::Worker(e.to_string()))?
}

fn archive_blocking(
    input: &Path,
    max_segment_bytes: u64,
    compression_level: i32,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>, ArchiveError> {
    if max_segment_bytes == 0 {
        return Err(ArchiveError::InvalidSegmentSize);
    }
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArchiveError::InvalidInput(input.to_path_buf()))?
        .to_string();
    let dir = input.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

    let result = write_archive(
        input,
        &dir,
        &name,
        max_segment_bytes,
        compression_level,
        progress,
        cancel,
    );
    match result {
        Ok(segments) => {
            fs::remove_file(input)?;
            debug!(target: "archive", input = %input.display(), segments = segments.len(), "archive written");
            Ok(segments)
        }
        Err(e) => {
            remove_segments(&dir, &name);
            Err(e)
        }
    }
}

fn write_archive(
    input: &Path,
    dir: &Path,
    name: &str,
    max_segment_bytes: u64,
    compression_level: i32,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut source = File::open(input)?;
    let total = source.metadata()?.len();

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(compression_level))
        .large_file(total >= ZIP64_THRESHOLD);

    let mut zip = ZipWriter::new(SegmentedWriter::new(dir, name, max_segment_bytes));
    zip.start_file(name, options)?;
    copy_blocking(&mut source, &mut zip, total, progress, cancel)?;
    if cancel.is_cancelled() {
        return Err(ArchiveError::Canceled);
    }
    let writer = zip.finish()?;
    Ok(writer.finish()?)
}

fn segment_path(dir: &Path, name: &str, index: usize) -> PathBuf {
    dir.join(format!("{name}.zip.{:03}", index + 1))
}

fn single_segment_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.zip"))
}

fn remove_segments(dir: &Path, name: &str) {
    let mut index = 0;
    loop {
        match fs::remove_file(segment_path(dir, name, index)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            _ => index += 1,
        }
    }
    let _ = fs::remove_file(single_segment_path(dir, name));
}

/// `Write + Seek` over a logical stream stored as fixed-size slice files.
struct SegmentedWriter {
    dir: PathBuf,
    name: String,
    max: u64,
    pos: u64,
    len: u64,
    // (segment index, handle, handle offset)
    current: Option<(usize, File, u64)>,
}

impl SegmentedWriter {
    fn new(dir: &Path, name: &str, max: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            max,
            pos: 0,
            len: 0,
            current: None,
        }
    }

    fn segment_count(&self) -> usize {
        self.len.div_ceil(self.max).max(1) as usize
    }

    fn handle_at(&mut self, index: usize, offset: u64) -> io::Result<&mut (usize, File, u64)> {
        let reuse = matches!(&self.current, Some((i, _, _)) if *i == index);
        if !reuse {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(segment_path(&self.dir, &self.name, index))?;
            self.current = Some((index, file, 0));
        }
        let Some(slot) = self.current.as_mut() else {
            return Err(io::Error::other("segment handle missing"));
        };
        if slot.2 != offset {
            slot.1.seek(SeekFrom::Start(offset))?;
            slot.2 = offset;
        }
        Ok(slot)
    }

    /// Flush, close and name the slices. Returns them in order.
    fn finish(mut self) -> io::Result<Vec<PathBuf>> {
        if let Some((_, mut file, _)) = self.current.take() {
            file.flush()?;
        }
        let count = self.segment_count();
        if self.len == 0 {
            File::create(segment_path(&self.dir, &self.name, 0))?;
        }
        let paths: Vec<PathBuf> = (0..count)
            .map(|i| segment_path(&self.dir, &self.name, i))
            .collect();
        if count > 1 {
            return Ok(paths);
        }
        let single = single_segment_path(&self.dir, &self.name);
        fs::rename(&paths[0], &single)?;
        Ok(vec![single])
    }
}

impl Write for SegmentedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let index = (self.pos / self.max) as usize;
        let offset = self.pos % self.max;
        let room = (self.max - offset).min(buf.len() as u64) as usize;

        let slot = self.handle_at(index, offset)?;
        let n = slot.1.write(&buf[..room])?;
        slot.2 += n as u64;

        self.pos += n as u64;
        self.len = self.len.max(self.pos);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some((_, file, _)) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Seek for SegmentedWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => self.len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of archive",
            )),
        }
    }
}
