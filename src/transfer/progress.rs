//! Throttled progress reporting into the transfer's status message.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use super::models::ProgressSample;
use super::registry::TransferId;
use super::status::StatusHandle;

/// Minimum spacing between two emitted updates.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

const BAR_CELLS: usize = 10;

/// Anything that accepts progress samples. Must return quickly.
pub trait ProgressSink: Send + Sync {
    fn report(&self, sample: ProgressSample);
}

/// Renders samples as a status text at most once per [`REPORT_INTERVAL`].
///
/// The first sample after construction may go out immediately. Samples with
/// an unknown total, arriving too early, or going backwards are dropped.
pub struct ProgressReporter {
    status: StatusHandle,
    prefix: String,
    cancel_button: Option<TransferId>,
    throttle: Mutex<Throttle>,
}

struct Throttle {
    last_bytes: u64,
    last_emit: Instant,
    next_report: Instant,
}

impl ProgressReporter {
    pub fn new(
        status: StatusHandle,
        prefix: impl Into<String>,
        cancel_button: Option<TransferId>,
    ) -> Self {
        let now = Instant::now();
        Self {
            status,
            prefix: prefix.into(),
            cancel_button,
            throttle: Mutex::new(Throttle {
                last_bytes: 0,
                last_emit: now,
                next_report: now,
            }),
        }
    }
}

impl ProgressSink for ProgressReporter {
    fn report(&self, sample: ProgressSample) {
        if sample.total_bytes == 0 {
            return;
        }

        let speed = {
            let mut t = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            if now < t.next_report || sample.bytes_so_far < t.last_bytes {
                return;
            }
            let elapsed = now.duration_since(t.last_emit).max(REPORT_INTERVAL);
            let delta = sample.bytes_so_far - t.last_bytes;
            t.last_bytes = sample.bytes_so_far;
            t.last_emit = now;
            t.next_report = now + REPORT_INTERVAL;
            (delta as f64 / elapsed.as_secs_f64()) as u64
        };

        self.status
            .set(render_progress(&self.prefix, sample, speed), self.cancel_button);
    }
}

/// ```text
/// Downloading file on server:
/// [███░░░░░░░] 30% Completed
/// 3MB from 10MB  1.2MB/s
/// ```
pub fn render_progress(prefix: &str, sample: ProgressSample, bytes_per_sec: u64) -> String {
    let pct = sample.percent();
    format!(
        "{prefix}\n{} {pct}% Completed\n{} from {}  {}/s",
        progress_bar(pct),
        bytes_to_string(sample.bytes_so_far),
        bytes_to_string(sample.total_bytes),
        bytes_to_string(bytes_per_sec),
    )
}

pub fn progress_bar(percent: u8) -> String {
    let filled = (percent.min(100) as usize * BAR_CELLS) / 100;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(BAR_CELLS - filled))
}

/// Human readable size with one decimal, base 1024: `1536` -> `1.5KB`.
pub fn bytes_to_string(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    if bytes == 0 {
        return "0B".to_string();
    }
    let mut value = bytes as f64;
    let mut place = 0;
    while value >= 1024.0 && place < UNITS.len() - 1 {
        value /= 1024.0;
        place += 1;
    }
    let rounded = (value * 10.0).round() / 10.0;
    format!("{rounded}{}", UNITS[place])
}

/// Test sink that keeps every sample it is offered.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::ProgressSink;
    use crate::transfer::models::ProgressSample;

    #[derive(Default)]
    pub(crate) struct SampleLog {
        samples: Mutex<Vec<ProgressSample>>,
    }

    impl SampleLog {
        pub(crate) fn samples(&self) -> Vec<ProgressSample> {
            self.samples.lock().unwrap().clone()
        }
    }

    impl ProgressSink for SampleLog {
        fn report(&self, sample: ProgressSample) {
            self.samples.lock().unwrap().push(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::status::StatusCapture;

    #[test]
    fn human_sizes() {
        assert_eq!(bytes_to_string(0), "0B");
        assert_eq!(bytes_to_string(512), "512B");
        assert_eq!(bytes_to_string(1024), "1KB");
        assert_eq!(bytes_to_string(1536), "1.5KB");
        assert_eq!(bytes_to_string(1024 * 1024), "1MB");
        assert_eq!(bytes_to_string(20_000_000), "19.1MB");
        assert_eq!(bytes_to_string(u64::MAX), "16EB");
    }

    #[test]
    fn bar_is_proportional() {
        assert_eq!(progress_bar(0), "[░░░░░░░░░░]");
        assert_eq!(progress_bar(35), "[███░░░░░░░]");
        assert_eq!(progress_bar(100), "[██████████]");
        assert_eq!(progress_bar(250), "[██████████]");
    }

    #[test]
    fn rendered_text_layout() {
        let text = render_progress(
            "Downloading file on server:",
            ProgressSample::new(2048, 1024),
            512,
        );
        assert_eq!(
            text,
            "Downloading file on server:\n[█████░░░░░] 50% Completed\n1KB from 2KB  512B/s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttles_to_one_update_per_second() {
        let (status, mut capture) = StatusCapture::new();
        let reporter = ProgressReporter::new(status, "p", None);

        // first sample goes out immediately, the rest of the burst is dropped
        for i in 1..=100 {
            reporter.report(ProgressSample::new(100, i));
        }
        tokio::time::advance(Duration::from_millis(999)).await;
        reporter.report(ProgressSample::new(100, 100));
        tokio::time::advance(Duration::from_millis(1)).await;
        reporter.report(ProgressSample::new(100, 100));

        let edits = capture.texts();
        assert_eq!(edits.len(), 2);
        assert!(edits[0].contains(" 1% Completed"));
        assert!(edits[1].contains("100% Completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_total_and_regressions_are_dropped() {
        let (status, mut capture) = StatusCapture::new();
        let reporter = ProgressReporter::new(status, "p", None);

        reporter.report(ProgressSample::new(0, 10));
        reporter.report(ProgressSample::new(100, 60));
        tokio::time::advance(REPORT_INTERVAL).await;
        reporter.report(ProgressSample::new(100, 40));

        let edits = capture.texts();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].contains("60% Completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn speed_uses_bytes_since_last_emission() {
        let (status, mut capture) = StatusCapture::new();
        let reporter = ProgressReporter::new(status, "p", None);

        reporter.report(ProgressSample::new(10 * 1024, 1024));
        tokio::time::advance(Duration::from_secs(2)).await;
        reporter.report(ProgressSample::new(10 * 1024, 5 * 1024));

        let edits = capture.texts();
        assert!(edits[0].ends_with("1KB/s"));
        assert!(edits[1].ends_with("2KB/s"));
    }

    #[test]
    fn concurrent_reporters_share_one_throttle() {
        let (status, mut capture) = StatusCapture::new();
        let reporter = std::sync::Arc::new(ProgressReporter::new(status, "p", None));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = reporter.clone();
                std::thread::spawn(move || {
                    for i in 1..=1000 {
                        r.report(ProgressSample::new(1000, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // the whole burst fits well inside one interval
        assert_eq!(capture.texts().len(), 1);
    }
}
