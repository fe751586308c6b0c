//! Progress reporting.
//!
//! Observers receive complete snapshots, never diffs, and are invoked
//! synchronously on the worker thread at every meaningful milestone. UI
//! collaborators redispatch to their own event loop themselves.

/// Latest progress snapshot: a status line and an overall percentage.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub status: String,
    pub percent: f32,
}

impl Progress {
    pub fn new(status: impl Into<String>, percent: f32) -> Self {
        Self {
            status: status.into(),
            percent: percent.clamp(0.0, 100.0),
        }
    }
}

/// Callback receiving progress snapshots.
pub trait ProgressObserver {
    fn on_progress(&mut self, percent: f32, status: &str);
}

impl<F: FnMut(f32, &str)> ProgressObserver for F {
    fn on_progress(&mut self, percent: f32, status: &str) {
        self(percent, status)
    }
}

/// Maps a fixed number of sequential 0-100% sub-operations onto one global
/// 0-100% figure. Step `i` at local `p`% reports `(i * 100 + p) / steps`.
pub struct MultiStepProgress<'a> {
    steps: usize,
    current: usize,
    status: String,
    observer: Option<&'a mut dyn ProgressObserver>,
}

impl<'a> MultiStepProgress<'a> {
    pub fn new(steps: usize, observer: Option<&'a mut dyn ProgressObserver>) -> Self {
        Self {
            steps: steps.max(1),
            current: 0,
            status: String::new(),
            observer,
        }
    }

    /// Advance to the next named step. The new step starts at local 0%.
    pub fn step(&mut self, status: impl Into<String>) {
        if self.current < self.steps {
            self.current += 1;
        }
        self.status = status.into();
        self.update(0.0);
    }

    /// Report local progress of the current step.
    pub fn update(&mut self, local_percent: f32) {
        let snapshot = self.snapshot(local_percent);
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.on_progress(snapshot.percent, &snapshot.status);
        }
    }

    /// Mark the current step finished (local 100%).
    pub fn finish_step(&mut self) {
        self.update(100.0);
    }

    fn snapshot(&self, local_percent: f32) -> Progress {
        let local = local_percent.clamp(0.0, 100.0);
        let done = self.current.saturating_sub(1) as f32;
        let percent = (done * 100.0 + local) / self.steps as f32;
        Progress::new(self.status.clone(), percent)
    }
}
