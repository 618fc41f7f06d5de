//! Progress reporting for long replays.

/// Receives `(fraction, phase)` updates while a replay runs.
///
/// `fraction` is in `[0, 1]`.
pub trait ProgressSink {
    fn report(&mut self, fraction: f64, phase: &str);
}

impl<F> ProgressSink for F
where
    F: FnMut(f64, &str),
{
    fn report(&mut self, fraction: f64, phase: &str) {
        self(fraction, phase)
    }
}

/// Discards all progress updates.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _fraction: f64, _phase: &str) {}
}
