//! Progress display for fetch runs
//!
//! A single indicatif bar counts finished entries and bytes transferred. The
//! bar draws to stderr and disappears by itself when stderr is not a
//! terminal; quiet and JSON modes hide it entirely.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

use crate::app::models::EntryOutcome;
use crate::app::worker::EntryReport;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";

/// Live progress of a fetch run
pub struct FetchProgress {
    bar: ProgressBar,
    bytes: u64,
    failed: usize,
}

impl FetchProgress {
    /// Create a bar for `total` entries, hidden when `visible` is false
    pub fn new(total: usize, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr())
        } else {
            ProgressBar::hidden()
        };

        match ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            Ok(style) => bar.set_style(style.progress_chars("##-")),
            Err(e) => debug!("Progress bar template error: {}", e),
        }
        bar.set_message("starting");

        Self {
            bar,
            bytes: 0,
            failed: 0,
        }
    }

    /// Account for one finished entry
    pub fn record(&mut self, report: &EntryReport) {
        self.bytes += report.bytes_transferred;
        if report.outcome.is_failure() {
            self.failed += 1;
            self.bar.println(format!("  {}", report.describe()));
        } else if report.outcome == EntryOutcome::Interrupted {
            debug!("{}", report.describe());
        }

        self.bar.set_message(format!(
            "{} transferred, {} failed",
            indicatif::HumanBytes(self.bytes),
            self.failed
        ));
        self.bar.inc(1);
    }

    /// Entries that failed so far
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Remove the bar from the terminal
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
