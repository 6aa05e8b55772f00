//! Progress reporting hooks for long traversals.
//!
//! The traversal engine calls a [`ProgressReporter`] before and after each
//! link's query batch. Reporting is purely cosmetic: running without a
//! reporter changes nothing about what gets fetched.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

pub trait ProgressReporter {
    /// A link is about to be processed.
    fn start(&self, text: &str);

    /// The current link finished.
    fn finish(&self, text: &str);
}

/// Terminal spinner on stderr.
pub struct SpinnerReporter {
    bar: ProgressBar,
}

impl SpinnerReporter {
    pub fn new(initial: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(initial.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Stop the spinner, leaving `text` on screen.
    pub fn close(&self, text: &str) {
        self.bar.finish_with_message(text.to_string());
    }
}

impl ProgressReporter for SpinnerReporter {
    fn start(&self, text: &str) {
        self.bar.set_message(text.to_string());
    }

    fn finish(&self, text: &str) {
        self.bar.println(format!("✔ {text}"));
    }
}

impl Drop for SpinnerReporter {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
