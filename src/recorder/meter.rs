// src/recorder/meter.rs

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Floor reported for digital silence.
pub const SILENCE_DB: f32 = -160.0;

/// One amplitude reading, in dBFS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplitudeSample {
    pub current: f32,
    pub max: f32,
}

impl AmplitudeSample {
    pub fn new(current: f32, max: f32) -> Self {
        Self { current, max }
    }
}

pub fn to_db(linear: f32) -> f32 {
    if !(linear > 0.0) {
        return SILENCE_DB;
    }
    (20.0 * linear.log10()).max(SILENCE_DB)
}

/// Lock-free peak meter. The writer thread folds blocks in, the amplitude
/// ticker reads (and clears) the peak once per interval.
pub struct AmplitudeMeter {
    peak: AtomicU32,
    max_db: AtomicU32,
    seen: AtomicBool,
}

impl Default for AmplitudeMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl AmplitudeMeter {
    pub fn new() -> Self {
        Self {
            peak: AtomicU32::new(0f32.to_bits()),
            max_db: AtomicU32::new(SILENCE_DB.to_bits()),
            seen: AtomicBool::new(false),
        }
    }

    pub fn process_block(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let block_peak = samples
            .iter()
            .filter(|s| s.is_finite())
            .fold(0.0f32, |acc, s| acc.max(s.abs()));

        let _ = self
            .peak
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                let prev = f32::from_bits(bits);
                (block_peak > prev).then_some(block_peak.to_bits())
            });
        self.seen.store(true, Ordering::Release);
    }

    /// Peak since the previous read. `None` until the first block arrives.
    pub fn read(&self) -> Option<AmplitudeSample> {
        if !self.seen.load(Ordering::Acquire) {
            return None;
        }
        let peak = f32::from_bits(self.peak.swap(0f32.to_bits(), Ordering::Relaxed));
        let current = to_db(peak);

        let prev_max = f32::from_bits(self.max_db.load(Ordering::Relaxed));
        let max = prev_max.max(current);
        self.max_db.store(max.to_bits(), Ordering::Relaxed);

        Some(AmplitudeSample { current, max })
    }

    pub fn reset(&self) {
        self.peak.store(0f32.to_bits(), Ordering::Relaxed);
        self.max_db.store(SILENCE_DB.to_bits(), Ordering::Relaxed);
        self.seen.store(false, Ordering::Release);
    }
}
