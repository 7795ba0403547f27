//! Terminal spinner for long blocking steps.
//!
//! Purely cosmetic: the spinner ticks on its own thread and carries no
//! state the pipeline depends on.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// A running spinner; cleared when dropped.
pub struct Spinner {
    bar: Option<ProgressBar>,
}

impl Spinner {
    /// Starts a spinner showing `message`, or a no-op when `enabled` is false.
    pub fn start(enabled: bool, message: impl Into<String>) -> Self {
        if !enabled {
            return Self { bar: None };
        }
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} ({elapsed})") {
            bar.set_style(style);
        }
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar: Some(bar) }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
