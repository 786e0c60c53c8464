//! Progress display for long-running commands
//!
//! [`ProgressSink`] turns core build events into an indicatif bar: a spinner
//! while partitions are planned, a block bar while the container is written
//! or verified.

use console::style;
use flashpack_core::{BuildEvent, EventSink, Phase};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Event sink that drives a terminal progress bar
pub struct ProgressSink {
    bar: ProgressBar,
    silent: bool,
    verbose: bool,
}

impl ProgressSink {
    /// Create a sink; `silent` hides everything
    pub fn new(silent: bool, verbose: bool) -> Self {
        let bar = if silent {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        Self {
            bar,
            silent,
            verbose,
        }
    }

    /// Remove the bar from the terminal
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn start_phase(&self, phase: Phase, blocks_total: u64) {
        if self.silent {
            return;
        }
        match phase {
            Phase::Planning => {
                self.bar.set_style(spinner_style());
                self.bar.set_message("Planning partitions...");
                self.bar.enable_steady_tick(Duration::from_millis(100));
            }
            Phase::Writing | Phase::Verifying => {
                self.bar.disable_steady_tick();
                self.bar.set_style(block_style(phase));
                self.bar.set_length(blocks_total);
                self.bar.set_position(0);
            }
        }
    }

    fn line(&self, text: String) {
        if !self.silent {
            self.bar.println(text);
        }
    }
}

impl EventSink for ProgressSink {
    fn emit(&self, event: &BuildEvent) {
        match event {
            BuildEvent::PhaseStarted {
                phase,
                blocks_total,
            } => self.start_phase(*phase, *blocks_total),
            BuildEvent::PartitionExcluded { name } => self.line(format!(
                "  {} {} {}",
                style("-").dim(),
                name,
                style("(excluded)").dim()
            )),
            BuildEvent::BlankRunElided {
                partition,
                first_block,
                blocks,
            } => {
                if self.verbose {
                    self.line(format!(
                        "    {} left out {} blank block(s) of {} at block {}",
                        style("·").dim(),
                        blocks,
                        partition,
                        first_block
                    ));
                }
            }
            BuildEvent::PartitionPlanned {
                name,
                descriptors,
                emitted_blocks,
                elided_blocks,
            } => self.line(format!(
                "  {} {}: {} block(s) in {} descriptor(s), {} blank block(s) left out",
                style("✓").green(),
                name,
                emitted_blocks,
                descriptors,
                elided_blocks
            )),
            BuildEvent::Progress(progress) => {
                self.bar.set_position(progress.blocks_done);
                self.bar.set_message(progress.speed_display());
            }
            BuildEvent::Finished { .. } => self.bar.finish_and_clear(),
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn block_style(phase: Phase) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(&format!(
            "  {{spinner:.green}} {} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} blocks {{msg}} ({{eta}})",
            phase
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashpack_core::Progress;

    #[test]
    fn test_silent_sink_accepts_all_events() {
        let sink = ProgressSink::new(true, true);
        sink.emit(&BuildEvent::PhaseStarted {
            phase: Phase::Planning,
            blocks_total: 0,
        });
        sink.emit(&BuildEvent::PartitionExcluded {
            name: "misc".to_string(),
        });
        sink.emit(&BuildEvent::PhaseStarted {
            phase: Phase::Writing,
            blocks_total: 4,
        });
        let mut progress = Progress::new(Phase::Writing, 4);
        progress.blocks_done = 2;
        sink.emit(&BuildEvent::Progress(progress));
        sink.finish();
    }

    #[test]
    fn test_block_bar_tracks_position() {
        let sink = ProgressSink::new(false, false);
        sink.emit(&BuildEvent::PhaseStarted {
            phase: Phase::Verifying,
            blocks_total: 10,
        });
        let mut progress = Progress::new(Phase::Verifying, 10);
        progress.blocks_done = 7;
        sink.emit(&BuildEvent::Progress(progress));

        assert_eq!(sink.bar.length(), Some(10));
        assert_eq!(sink.bar.position(), 7);
        sink.finish();
    }
}
