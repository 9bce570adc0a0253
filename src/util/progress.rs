//! Terminal progress reporting for long mirror operations.
//!
//! Bars and spinners render only when stderr is an interactive terminal;
//! piped and scripted runs stay silent, so call sites don't carry a
//! show/hide flag around.

use std::io::{IsTerminal, stderr};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress handle for one export or import pass.
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    /// A counted bar over `total` records.
    ///
    /// # Panics
    ///
    /// Panics if the bar template is invalid (compile-time constant).
    #[must_use]
    pub fn records(total: u64, message: &'static str) -> Self {
        let bar = ProgressBar::new(total);
        if stderr().is_terminal() {
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:30.cyan/blue}] {pos}/{len}")
                    .expect("valid template")
                    .progress_chars("=>-"),
            );
            bar.set_message(message);
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { bar }
    }

    /// An indeterminate spinner for work without a known record count.
    ///
    /// # Panics
    ///
    /// Panics if the spinner template is invalid (compile-time constant).
    #[must_use]
    pub fn spinner(message: &'static str) -> Self {
        let bar = ProgressBar::new_spinner();
        if stderr().is_terminal() {
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .expect("valid template"),
            );
            bar.set_message(message);
            bar.enable_steady_tick(Duration::from_millis(120));
        } else {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { bar }
    }

    /// Advance a counted bar by one record.
    pub fn tick(&self) {
        self.bar.inc(1);
    }

    /// Finish, leaving a terminal summary line.
    pub fn done(&self, message: &'static str) {
        self.bar.finish_with_message(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_bar_is_silent_off_terminal() {
        // Test stderr is not a TTY, so this exercises the hidden path
        let progress = Progress::records(10, "Scanning");
        for _ in 0..10 {
            progress.tick();
        }
        progress.done("scan complete");
    }

    #[test]
    fn test_spinner_is_silent_off_terminal() {
        let progress = Progress::spinner("Reading mirror");
        progress.done("read complete");
    }
}
