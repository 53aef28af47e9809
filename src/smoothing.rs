//! Rolling-window debouncer for continuous incident scores.
//!
//! The smoother samples the score stream at a fixed decimation, keeps the last
//! `capacity` samples, and reports `mean >= threshold`. Once a few samples are
//! in, one strong frame cannot raise the signal; a sustained run across the
//! window can. The very first sample is the whole window, so it alone decides
//! until the next one arrives. The window lives for the whole stream and is not
//! reset between incidents.

use std::collections::VecDeque;

/// Default number of samples averaged.
pub const DEFAULT_WINDOW: usize = 128;

/// Default decimation: score every Nth frame.
pub const DEFAULT_SAMPLE_EVERY: u64 = 5;

/// Default debounce threshold on the window mean.
pub const DEFAULT_THRESHOLD: f32 = 0.87;

#[derive(Clone, Debug)]
pub struct TemporalSmoother {
    window: VecDeque<f32>,
    capacity: usize,
    threshold: f32,
    sample_every: u64,
    frames_seen: u64,
}

impl TemporalSmoother {
    /// `capacity` and `sample_every` are clamped to at least 1.
    pub fn new(capacity: usize, threshold: f32, sample_every: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            threshold,
            sample_every: sample_every.max(1),
            frames_seen: 0,
        }
    }

    /// True when the next call to `tick` will take a sample.
    pub fn sample_due(&self) -> bool {
        self.frames_seen % self.sample_every == 0
    }

    /// Advance one frame. `score` is only invoked on sampled frames; it may
    /// return `None` when no score is available, in which case the window is
    /// left untouched. Returns the current debounced signal.
    pub fn tick<F>(&mut self, score: F) -> bool
    where
        F: FnOnce() -> Option<f32>,
    {
        if self.sample_due() {
            if let Some(raw) = score() {
                self.observe(raw);
            }
        }
        self.frames_seen += 1;
        self.signal()
    }

    /// Append one sampled score and return the debounced signal.
    pub fn observe(&mut self, raw_score: f32) -> bool {
        let score = if raw_score.is_finite() {
            raw_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(score);
        self.signal()
    }

    /// Mean of the current window, or `None` before the first sample.
    pub fn mean(&self) -> Option<f32> {
        if self.window.is_empty() {
            return None;
        }
        let total: f64 = self.window.iter().map(|s| *s as f64).sum();
        Some((total / self.window.len() as f64) as f32)
    }

    /// Debounced signal. An empty window is never raised.
    pub fn signal(&self) -> bool {
        self.mean().is_some_and(|mean| mean >= self.threshold)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for TemporalSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_THRESHOLD, DEFAULT_SAMPLE_EVERY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_signal(history: &[f32], capacity: usize, threshold: f32) -> bool {
        let start = history.len().saturating_sub(capacity);
        let tail = &history[start..];
        if tail.is_empty() {
            return false;
        }
        let mean = tail.iter().map(|s| *s as f64).sum::<f64>() / tail.len() as f64;
        mean as f32 >= threshold
    }

    #[test]
    fn empty_window_is_not_raised() {
        let smoother = TemporalSmoother::default();
        assert!(smoother.mean().is_none());
        assert!(!smoother.signal());
    }

    #[test]
    fn single_spike_does_not_raise_signal() {
        let mut smoother = TemporalSmoother::new(8, 0.87, 1);
        for _ in 0..7 {
            smoother.observe(0.1);
        }
        assert!(!smoother.observe(1.0));
    }

    #[test]
    fn window_length_never_exceeds_capacity() {
        let mut smoother = TemporalSmoother::new(4, 0.5, 1);
        for i in 0..50 {
            smoother.observe((i % 3) as f32 / 2.0);
            assert!(smoother.len() <= 4);
        }
        assert_eq!(smoother.len(), 4);
    }

    #[test]
    fn signal_matches_mean_of_last_samples_across_wraparound() {
        let capacity = 5;
        let threshold = 0.6;
        let mut smoother = TemporalSmoother::new(capacity, threshold, 1);
        let mut history = Vec::new();
        // Deterministic pseudo-random stream.
        let mut state = 0x2545_f491_u32;
        for _ in 0..200 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let score = (state % 1000) as f32 / 999.0;
            history.push(score);
            let got = smoother.observe(score);
            assert_eq!(got, reference_signal(&history, capacity, threshold));
        }
    }

    #[test]
    fn tick_samples_every_nth_frame() {
        let mut smoother = TemporalSmoother::new(16, 0.5, 5);
        let mut calls = 0;
        for _ in 0..20 {
            smoother.tick(|| {
                calls += 1;
                Some(0.9)
            });
        }
        assert_eq!(calls, 4);
        assert_eq!(smoother.len(), 4);
        assert!(smoother.signal());
    }

    #[test]
    fn tick_without_score_keeps_window() {
        let mut smoother = TemporalSmoother::new(4, 0.5, 1);
        smoother.observe(0.9);
        assert!(smoother.tick(|| None));
        assert_eq!(smoother.len(), 1);
    }
}
