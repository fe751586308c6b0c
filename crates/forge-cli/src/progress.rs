//! Progress bar helpers for installer callbacks.

use indicatif::{ProgressBar, ProgressStyle};

/// Percent-based bar driven by an installer progress closure.
pub fn install_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    bar
}

/// Observer closure updating `bar`; forge-pm accepts any `FnMut(f32, &str)`.
pub fn observe(bar: &ProgressBar) -> impl FnMut(f32, &str) + '_ {
    move |percent, status| {
        bar.set_position(percent as u64);
        bar.set_message(status.to_string());
    }
}
