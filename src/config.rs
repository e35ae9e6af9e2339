// src/config.rs

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;

use crate::waveform::FLAG_8_BIT;

/// Live sampler tuning. The display rate/spp pair only scales the preview;
/// it says nothing about the microphone's real sample rate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SamplerConfig {
    pub window_capacity: usize,
    pub amplitude_interval_ms: u64,
    pub db_offset: f32,
    pub noise_gate: f32,
    pub display_sample_rate: u32,
    pub display_samples_per_pixel: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            window_capacity: 500,
            amplitude_interval_ms: 100,
            db_offset: 40.0,
            noise_gate: 10.0,
            display_sample_rate: 44_100,
            display_samples_per_pixel: 256,
        }
    }
}

impl SamplerConfig {
    pub fn amplitude_interval(&self) -> Duration {
        Duration::from_millis(self.amplitude_interval_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Snapshots queued while the relay handshake is still pending.
    pub mailbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { mailbox_capacity: 32 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExtractorConfig {
    pub samples_per_pixel: u32,
    /// 8 or 16.
    pub bits: u8,
    /// Fraction of the file between two intermediate progress events.
    pub progress_step: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            samples_per_pixel: 256,
            bits: 16,
            progress_step: 0.1,
        }
    }
}

impl ExtractorConfig {
    pub fn flags(&self) -> u32 {
        if self.bits == 8 { FLAG_8_BIT } else { 0 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub rows: usize,
    pub columns: usize,
    /// Live values are shifted decibels, not PCM, so they need a large gain.
    pub live_scale: f32,
    pub offline_scale: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            rows: 20,
            columns: 120,
            live_scale: 800.0,
            offline_scale: 1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampler: SamplerConfig,
    pub relay: RelayConfig,
    pub extractor: ExtractorConfig,
    pub render: RenderConfig,
}

impl PipelineConfig {
    pub fn save_to_disk(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("creating {}", path.as_ref().display()))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_from_disk(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("opening {}", path.as_ref().display()))?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Missing or broken config files are not worth aborting over.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load_from_disk(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using default config ({}): {e:#}", path.as_ref().display());
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let cap = self.sampler.window_capacity;
        if cap == 0 || cap % 2 != 0 {
            bail!("sampler.window_capacity must be even and > 0, got {cap}");
        }
        if self.sampler.display_sample_rate == 0 || self.sampler.display_samples_per_pixel == 0 {
            bail!("sampler display rate and samples per pixel must be > 0");
        }
        if self.relay.mailbox_capacity == 0 {
            bail!("relay.mailbox_capacity must be > 0");
        }
        if self.extractor.samples_per_pixel == 0 {
            bail!("extractor.samples_per_pixel must be > 0");
        }
        if !matches!(self.extractor.bits, 8 | 16) {
            bail!("extractor.bits must be 8 or 16, got {}", self.extractor.bits);
        }
        if !(self.extractor.progress_step > 0.0 && self.extractor.progress_step <= 1.0) {
            bail!("extractor.progress_step must be in (0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_live_preview_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.sampler.window_capacity, 500);
        assert_eq!(config.sampler.amplitude_interval(), Duration::from_millis(100));
        assert_eq!(config.sampler.display_sample_rate, 44_100);
        assert_eq!(config.sampler.display_samples_per_pixel, 256);
        assert_eq!(config.extractor.flags(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");

        let mut config = PipelineConfig::default();
        config.extractor.bits = 8;
        config.render.columns = 80;
        config.save_to_disk(&path).unwrap();

        let loaded = PipelineConfig::load_from_disk(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.extractor.flags(), FLAG_8_BIT);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{ "sampler": { "noise_gate": 6.0 } }"#).unwrap();

        let loaded = PipelineConfig::load_from_disk(&path).unwrap();
        assert_eq!(loaded.sampler.noise_gate, 6.0);
        assert_eq!(loaded.sampler.window_capacity, 500);
        assert_eq!(loaded.relay, RelayConfig::default());
    }

    #[test]
    fn odd_window_rejected() {
        let mut config = PipelineConfig::default();
        config.sampler.window_capacity = 501;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_or_default(dir.path().join("nope.json"));
        assert_eq!(config, PipelineConfig::default());
    }
}
