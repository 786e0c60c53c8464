//! Build events and progress reporting
//!
//! Long-running operations (generate, port, verify) report what they are
//! doing through an [`EventSink`]. The CLI turns these into progress bars;
//! library users can pass a closure or the [`TracingSink`] adapter.

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Phase of a build a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Planning partitions and hashing blocks
    Planning,
    /// Streaming the container to disk
    Writing,
    /// Checking blocks against the catalog
    Verifying,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Planning => write!(f, "Planning"),
            Phase::Writing => write!(f, "Writing"),
            Phase::Verifying => write!(f, "Verifying"),
        }
    }
}

/// Block-level progress
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Phase being reported
    pub phase: Phase,

    /// Blocks processed so far
    pub blocks_done: u64,

    /// Total blocks in this phase
    pub blocks_total: u64,

    /// Bytes processed so far
    pub bytes_done: u64,

    /// Current speed in bytes per second
    pub speed_bps: u64,

    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,

    /// Elapsed time since the phase started
    pub elapsed: Duration,
}

impl Progress {
    /// Create a progress record at zero
    pub fn new(phase: Phase, blocks_total: u64) -> Self {
        Self {
            phase,
            blocks_done: 0,
            blocks_total,
            bytes_done: 0,
            speed_bps: 0,
            eta_seconds: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Calculate completion percentage (0.0 to 100.0)
    pub fn percentage(&self) -> f64 {
        if self.blocks_total == 0 {
            100.0
        } else {
            (self.blocks_done as f64 / self.blocks_total as f64) * 100.0
        }
    }

    /// Whether every block has been processed
    pub fn is_complete(&self) -> bool {
        self.blocks_done >= self.blocks_total
    }

    /// Format speed for display (e.g., "45.2 MB/s")
    pub fn speed_display(&self) -> String {
        format_speed(self.speed_bps)
    }

    /// Format ETA for display (e.g., "2m 30s")
    pub fn eta_display(&self) -> String {
        match self.eta_seconds {
            Some(secs) if secs > 0 => format_duration(secs),
            _ => "calculating...".to_string(),
        }
    }
}

/// Something noteworthy that happened during a build
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    /// A phase is starting
    PhaseStarted {
        /// The phase
        phase: Phase,
        /// Blocks the phase will process
        blocks_total: u64,
    },

    /// A partition was left out because it is on the exclusion list
    PartitionExcluded {
        /// Partition name
        name: String,
    },

    /// A blank run was left out of the payload
    BlankRunElided {
        /// Partition name
        partition: String,
        /// Partition-relative first block
        first_block: u64,
        /// Run length in blocks
        blocks: u64,
    },

    /// A partition has been planned
    PartitionPlanned {
        /// Partition name
        name: String,
        /// Number of write descriptors
        descriptors: usize,
        /// Blocks going into the payload
        emitted_blocks: u64,
        /// Blank blocks left out
        elided_blocks: u64,
    },

    /// Block-level progress
    Progress(Progress),

    /// The container was published
    Finished {
        /// Final location
        path: PathBuf,
        /// Container size in bytes
        bytes: u64,
        /// Catalog entries written
        catalog_entries: u64,
        /// Total time taken
        elapsed: Duration,
    },
}

/// Receiver for build events
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// Handle one event
    fn emit(&self, event: &BuildEvent);
}

impl<F> EventSink for F
where
    F: Fn(&BuildEvent) + Send + Sync,
{
    fn emit(&self, event: &BuildEvent) {
        self(event)
    }
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &BuildEvent) {}
}

/// Sink that forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &BuildEvent) {
        match event {
            BuildEvent::PhaseStarted {
                phase,
                blocks_total,
            } => tracing::info!("{} {} block(s)", phase, blocks_total),
            BuildEvent::PartitionExcluded { name } => {
                tracing::info!("Excluding partition '{}'", name)
            }
            BuildEvent::BlankRunElided {
                partition,
                first_block,
                blocks,
            } => tracing::debug!(
                "Left out {} blank block(s) of '{}' at block {}",
                blocks,
                partition,
                first_block
            ),
            BuildEvent::PartitionPlanned {
                name,
                descriptors,
                emitted_blocks,
                elided_blocks,
            } => tracing::info!(
                "Planned '{}': {} descriptor(s), {} block(s), {} blank block(s) left out",
                name,
                descriptors,
                emitted_blocks,
                elided_blocks
            ),
            BuildEvent::Progress(progress) => tracing::trace!(
                "{}: {}/{} block(s), {}",
                progress.phase,
                progress.blocks_done,
                progress.blocks_total,
                progress.speed_display()
            ),
            BuildEvent::Finished {
                path,
                bytes,
                catalog_entries,
                elapsed,
            } => tracing::info!(
                "Wrote {} ({} bytes, {} catalog entries) in {:.1}s",
                path.display(),
                bytes,
                catalog_entries,
                elapsed.as_secs_f64()
            ),
        }
    }
}

// ============================================================================
// Progress tracking helpers
// ============================================================================

/// Tracks block progress for one phase and reports it to a sink
pub(crate) struct ProgressReporter<'a> {
    sink: &'a dyn EventSink,
    progress: Progress,
    start_time: Instant,
    speed_tracker: SpeedTracker,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn start(sink: &'a dyn EventSink, phase: Phase, blocks_total: u64) -> Self {
        sink.emit(&BuildEvent::PhaseStarted {
            phase,
            blocks_total,
        });
        Self {
            sink,
            progress: Progress::new(phase, blocks_total),
            start_time: Instant::now(),
            speed_tracker: SpeedTracker::new(),
        }
    }

    /// Record one more block of `bytes` bytes
    pub(crate) fn advance(&mut self, bytes: u64) {
        let progress = &mut self.progress;
        progress.blocks_done += 1;
        progress.bytes_done += bytes;
        progress.elapsed = self.start_time.elapsed();
        self.speed_tracker.update(progress.bytes_done);
        progress.speed_bps = self.speed_tracker.current_speed();

        let remaining_blocks = progress.blocks_total.saturating_sub(progress.blocks_done);
        let bytes_per_block = if progress.blocks_done > 0 {
            progress.bytes_done / progress.blocks_done
        } else {
            0
        };
        progress.eta_seconds = calculate_eta(remaining_blocks * bytes_per_block, progress.speed_bps);

        self.sink.emit(&BuildEvent::Progress(progress.clone()));
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Speed tracking with smoothing
struct SpeedTracker {
    samples: Vec<(Instant, u64)>,
    max_samples: usize,
}

impl SpeedTracker {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(10),
            max_samples: 10,
        }
    }

    fn update(&mut self, bytes_done: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push((Instant::now(), bytes_done));
    }

    fn current_speed(&self) -> u64 {
        if self.samples.len() < 2 {
            return 0;
        }

        let first = &self.samples[0];
        let last = &self.samples[self.samples.len() - 1];

        let duration = last.0.duration_since(first.0);
        let bytes = last.1.saturating_sub(first.1);

        if duration.as_millis() > 0 {
            (bytes as f64 / duration.as_secs_f64()) as u64
        } else {
            0
        }
    }
}

/// Estimated seconds to move `remaining_bytes` at `speed_bps`
fn calculate_eta(remaining_bytes: u64, speed_bps: u64) -> Option<u64> {
    if speed_bps == 0 || remaining_bytes == 0 {
        return None;
    }
    Some(remaining_bytes / speed_bps)
}

/// Format speed for display
pub fn format_speed(bytes_per_second: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes_per_second >= GB {
        format!("{:.1} GB/s", bytes_per_second as f64 / GB as f64)
    } else if bytes_per_second >= MB {
        format!("{:.1} MB/s", bytes_per_second as f64 / MB as f64)
    } else if bytes_per_second >= KB {
        format!("{:.1} KB/s", bytes_per_second as f64 / KB as f64)
    } else {
        format!("{} B/s", bytes_per_second)
    }
}

/// Format duration for display
pub fn format_duration(seconds: u64) -> String {
    if seconds >= 3600 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds >= 60 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_percentage() {
        let mut progress = Progress::new(Phase::Writing, 4);
        assert_eq!(progress.percentage(), 0.0);
        progress.blocks_done = 1;
        assert_eq!(progress.percentage(), 25.0);
        progress.blocks_done = 4;
        assert!(progress.is_complete());

        let empty = Progress::new(Phase::Planning, 0);
        assert_eq!(empty.percentage(), 100.0);
        assert!(empty.is_complete());
    }

    #[test]
    fn test_eta_display() {
        let mut progress = Progress::new(Phase::Writing, 10);
        assert_eq!(progress.eta_display(), "calculating...");
        progress.eta_seconds = Some(150);
        assert_eq!(progress.eta_display(), "2m 30s");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(500), "500 B/s");
        assert_eq!(format_speed(2048), "2.0 KB/s");
        assert_eq!(format_speed(45 * 1024 * 1024), "45.0 MB/s");
        assert_eq!(format_speed(3 * 1024 * 1024 * 1024), "3.0 GB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(150), "2m 30s");
        assert_eq!(format_duration(3 * 3600 + 120), "3h 2m");
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: &BuildEvent| seen.lock().unwrap().push(event.clone());
        sink.emit(&BuildEvent::PartitionExcluded {
            name: "DPP".to_string(),
        });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_reporter_emits_phase_and_progress() {
        let mut sink = MockEventSink::new();
        sink.expect_emit()
            .withf(|e| matches!(e, BuildEvent::PhaseStarted { phase: Phase::Verifying, blocks_total: 2 }))
            .times(1)
            .return_const(());
        sink.expect_emit()
            .withf(|e| matches!(e, BuildEvent::Progress(_)))
            .times(2)
            .return_const(());

        let mut reporter = ProgressReporter::start(&sink, Phase::Verifying, 2);
        reporter.advance(4096);
        reporter.advance(4096);
    }

    #[test]
    fn test_speed_tracker_needs_two_samples() {
        let mut tracker = SpeedTracker::new();
        assert_eq!(tracker.current_speed(), 0);
        tracker.update(100);
        assert_eq!(tracker.current_speed(), 0);
    }

    #[test]
    fn test_speed_tracker_keeps_bounded_samples() {
        let mut tracker = SpeedTracker::new();
        for i in 0..25 {
            tracker.update(i * 1000);
        }
        assert_eq!(tracker.samples.len(), 10);
    }
}
