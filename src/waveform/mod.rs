// src/waveform/mod.rs
pub mod format;
pub mod render;
pub mod terminal;

use crate::error::{PipelineError, Result};
use std::time::Duration;

pub use render::{render, render_all, render_tail, Bar, Viewport};

/// Flags bit 0: samples are 8-bit (stored widened in `data`).
pub const FLAG_8_BIT: u32 = 0x1;

pub const WAVEFORM_VERSION: u32 = 1;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Per-column (min, max) amplitude summary shared by the live preview and
/// the offline extractor.
///
/// Immutable once built. Offline waveforms hold true `min <= max` pairs;
/// live snapshots hold mirrored `(v, -v)` pairs, so that ordering is not
/// guaranteed there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waveform {
    version: u32,
    flags: u32,
    sample_rate: u32,
    samples_per_pixel: u32,
    length: u32,
    data: Vec<i16>,
}

impl Waveform {
    pub fn new(
        version: u32,
        flags: u32,
        sample_rate: u32,
        samples_per_pixel: u32,
        data: Vec<i16>,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(PipelineError::InvalidWaveform("sample rate must be > 0".into()));
        }
        if samples_per_pixel == 0 {
            return Err(PipelineError::InvalidWaveform(
                "samples per pixel must be > 0".into(),
            ));
        }
        // Both are stored as i32 on disk.
        if i32::try_from(sample_rate).is_err() || i32::try_from(samples_per_pixel).is_err() {
            return Err(PipelineError::InvalidWaveform(format!(
                "rate {sample_rate} or samples per pixel {samples_per_pixel} exceeds i32"
            )));
        }
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(PipelineError::InvalidWaveform(format!(
                "expected a non-empty even number of samples, got {}",
                data.len()
            )));
        }
        let length = u32::try_from(data.len() / 2)
            .map_err(|_| PipelineError::InvalidWaveform("too many columns".into()))?;

        Ok(Self {
            version,
            flags,
            sample_rate,
            samples_per_pixel,
            length,
            data,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples_per_pixel(&self) -> u32 {
        self.samples_per_pixel
    }

    /// Number of columns.
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Interleaved (min, max) pairs, `2 * length` long.
    pub fn data(&self) -> &[i16] {
        &self.data
    }

    pub fn is_8_bit(&self) -> bool {
        self.flags & FLAG_8_BIT != 0
    }

    /// Magnitude that maps to a full-height bar.
    pub fn full_scale(&self) -> f32 {
        if self.is_8_bit() { 128.0 } else { 32_768.0 }
    }

    pub fn column(&self, column: usize) -> Option<(i16, i16)> {
        let pair = self.data.get(2 * column..2 * column + 2)?;
        Some((pair[0], pair[1]))
    }

    pub fn columns(&self) -> impl Iterator<Item = (i16, i16)> + '_ {
        self.data.chunks_exact(2).map(|pair| (pair[0], pair[1]))
    }

    /// `length * samples_per_pixel / sample_rate`.
    pub fn duration(&self) -> Duration {
        self.time_at(self.length as u64)
    }

    /// Start time of `column`, rounded up to the next nanosecond so that
    /// `column_at(time_at(c)) == c`.
    pub fn time_at(&self, column: u64) -> Duration {
        let nanos = (column as u128 * self.samples_per_pixel as u128 * NANOS_PER_SEC)
            .div_ceil(self.sample_rate as u128);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Column containing `time`; may be `>= length` past the end.
    pub fn column_at(&self, time: Duration) -> u64 {
        let column = time.as_nanos() * self.sample_rate as u128
            / (self.samples_per_pixel as u128 * NANOS_PER_SEC);
        u64::try_from(column).unwrap_or(u64::MAX)
    }

    /// Exclusive end column of a range ending at `time`.
    pub(crate) fn column_end(&self, time: Duration) -> u64 {
        if time.is_zero() {
            return 0;
        }
        self.column_at(time - Duration::from_nanos(1)).saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline(length: usize) -> Waveform {
        let data = (0..length).flat_map(|i| [-(i as i16), i as i16]).collect();
        Waveform::new(WAVEFORM_VERSION, 0, 44_100, 256, data).unwrap()
    }

    #[test]
    fn length_is_half_the_data() {
        let wf = offline(10);
        assert_eq!(wf.length(), 10);
        assert_eq!(wf.data().len(), 20);
        assert_eq!(wf.column(3), Some((-3, 3)));
        assert_eq!(wf.column(10), None);
        assert_eq!(wf.columns().count(), 10);
    }

    #[test]
    fn rejects_odd_or_empty_data() {
        assert!(matches!(
            Waveform::new(1, 0, 44_100, 256, vec![1, 2, 3]),
            Err(PipelineError::InvalidWaveform(_))
        ));
        assert!(Waveform::new(1, 0, 44_100, 256, Vec::new()).is_err());
    }

    #[test]
    fn rejects_zero_rates() {
        assert!(Waveform::new(1, 0, 0, 256, vec![0, 0]).is_err());
        assert!(Waveform::new(1, 0, 44_100, 0, vec![0, 0]).is_err());
    }

    #[test]
    fn rejects_rates_the_file_format_cannot_hold() {
        let too_big = i32::MAX as u32 + 1;
        assert!(matches!(
            Waveform::new(1, 0, too_big, 256, vec![0, 0]),
            Err(PipelineError::InvalidWaveform(_))
        ));
        assert!(Waveform::new(1, 0, 44_100, too_big, vec![0, 0]).is_err());
        assert!(Waveform::new(1, 0, i32::MAX as u32, i32::MAX as u32, vec![0, 0]).is_ok());
    }

    #[test]
    fn far_times_saturate() {
        let wf = offline(4);
        assert_eq!(wf.column_at(Duration::MAX), u64::MAX);
        assert_eq!(wf.column_end(Duration::MAX), u64::MAX);
        assert_eq!(wf.time_at(u64::MAX), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn duration_from_columns() {
        // 1723 * 256 / 44100 = 10.0013s
        let wf = offline(1723);
        let secs = wf.duration().as_secs_f64();
        assert!((secs - 1723.0 * 256.0 / 44_100.0).abs() < 1e-6, "{secs}");
    }

    #[test]
    fn column_time_mapping() {
        let wf = offline(100);
        assert_eq!(wf.column_at(Duration::ZERO), 0);
        assert_eq!(wf.column_at(wf.time_at(42)), 42);
        assert_eq!(wf.column_at(wf.duration()), 100);
        assert_eq!(wf.column_end(wf.duration()), 100);
        assert_eq!(wf.column_end(wf.time_at(10)), 10);
        assert_eq!(wf.column_end(Duration::ZERO), 0);
    }

    #[test]
    fn full_scale_follows_flags() {
        let wf16 = offline(1);
        let wf8 = Waveform::new(1, FLAG_8_BIT, 44_100, 256, vec![-1, 1]).unwrap();
        assert_eq!(wf16.full_scale(), 32_768.0);
        assert!(wf8.is_8_bit());
        assert_eq!(wf8.full_scale(), 128.0);
    }
}
