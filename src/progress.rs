//! Progress reporting
//!
//! Send and receive progress is approximate (bitmap or address
//! position) and must never affect correctness. Unattended runs get
//! a hidden bar.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress reporter for send and receive operations
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a visible reporter spanning `total` position units
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total.max(1));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {percent:>3}% [{bar:40.cyan/blue}] {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }

    /// Create a hidden reporter (unattended mode)
    pub fn disabled(total: u64) -> Self {
        let reporter = Self::new(total);
        reporter.bar.set_draw_target(ProgressDrawTarget::hidden());
        reporter
    }

    /// Move the position marker (monotonic; regressions are ignored)
    pub fn set_position(&self, pos: u64) {
        if pos > self.bar.position() {
            self.bar.set_position(pos);
        }
    }

    /// Update the trailing message, e.g. megabytes shipped
    pub fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    /// Finish and clear the bar
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_is_monotonic() {
        let reporter = ProgressReporter::disabled(100);
        reporter.set_position(50);
        reporter.set_position(10);
        assert_eq!(reporter.bar.position(), 50);
    }

    #[test]
    fn test_zero_total_is_safe() {
        let reporter = ProgressReporter::disabled(0);
        reporter.set_position(1);
        reporter.finish();
    }
}
