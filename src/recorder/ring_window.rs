// src/recorder/ring_window.rs

use std::collections::VecDeque;

use crate::config::SamplerConfig;
use crate::recorder::meter::AmplitudeSample;
use crate::waveform::{Waveform, WAVEFORM_VERSION};

/// Fixed-size window of live waveform values. Always holds exactly
/// `capacity` entries (zero-filled at creation); every push replaces the
/// oldest column with a new one.
#[derive(Debug, Clone)]
pub struct RingWindow {
    samples: VecDeque<i16>,
    capacity: usize,
}

impl RingWindow {
    /// # Panics
    ///
    /// Panics if `capacity` is zero or odd.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity % 2 == 0,
            "RingWindow capacity must be even and > 0"
        );
        Self {
            samples: VecDeque::from(vec![0; capacity]),
            capacity,
        }
    }

    /// Appends the mirrored pair `(v, -v)` and evicts the oldest pair.
    pub fn push_mirrored(&mut self, v: i16) {
        self.samples.push_back(v);
        self.samples.push_back(v.saturating_neg());
        self.samples.pop_front();
        self.samples.pop_front();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_vec(&self) -> Vec<i16> {
        self.samples.iter().copied().collect()
    }
}

/// Turns periodic amplitude readings into live waveform snapshots.
///
/// Owns its window outright; the rendering side only ever receives the
/// copies returned from [`push`](Self::push).
pub struct RingWindowSampler {
    window: RingWindow,
    config: SamplerConfig,
}

impl RingWindowSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            window: RingWindow::new(config.window_capacity),
            config,
        }
    }

    /// Shifts by the configured offset and gates `[-gate, gate]` to zero.
    /// Fractions are truncated toward zero.
    pub fn gate(&self, sample: &AmplitudeSample) -> i16 {
        let shifted = sample.current + self.config.db_offset;
        if (-self.config.noise_gate..=self.config.noise_gate).contains(&shifted) {
            return 0;
        }
        shifted.clamp(-(i16::MAX as f32), i16::MAX as f32) as i16
    }

    /// Feeds one tick. Missing or non-finite readings produce no snapshot
    /// and leave the window untouched.
    pub fn push(&mut self, sample: Option<AmplitudeSample>) -> Option<Waveform> {
        let sample = sample.filter(|s| s.current.is_finite())?;
        let v = self.gate(&sample);
        self.window.push_mirrored(v);
        self.snapshot()
    }

    pub fn snapshot(&self) -> Option<Waveform> {
        match Waveform::new(
            WAVEFORM_VERSION,
            0,
            self.config.display_sample_rate,
            self.config.display_samples_per_pixel,
            self.window.to_vec(),
        ) {
            Ok(wf) => Some(wf),
            Err(e) => {
                log::error!("Live snapshot rejected: {e}");
                None
            }
        }
    }

    pub fn window(&self) -> &RingWindow {
        &self.window
    }

    /// Starts a fresh zero-filled window, e.g. for a new take.
    pub fn reset(&mut self) {
        self.window = RingWindow::new(self.config.window_capacity);
    }
}
