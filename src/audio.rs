// src/audio.rs

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};

use crate::error::{PipelineError, Result};

/// Default output device and the config it prefers.
pub struct OutputConfig {
    pub device: Device,
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
    pub output_channels: usize,
    pub output_sample_rate: u32,
}

pub fn setup_output_device() -> Result<OutputConfig> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PipelineError::Device("no output device available".into()))?;
    let supported_config = device
        .default_output_config()
        .map_err(PipelineError::device)?;
    let sample_format = supported_config.sample_format();
    let config = supported_config.config();
    let output_channels = config.channels as usize;
    let output_sample_rate = config.sample_rate.0;

    log::info!("Output device: {output_channels} ch @ {output_sample_rate} Hz ({sample_format:?})");

    Ok(OutputConfig {
        device,
        config,
        sample_format,
        output_channels,
        output_sample_rate,
    })
}

/// Builds an output stream whose callback asks `fill` for interleaved f32
/// frames and converts them to the device format. The stream is not started.
pub fn open_output_stream<F>(output: &OutputConfig, fill: F) -> Result<Stream>
where
    F: FnMut(&mut [f32]) + Send + 'static,
{
    match output.sample_format {
        SampleFormat::F32 => build_stream::<f32, F>(output, fill),
        SampleFormat::I16 => build_stream::<i16, F>(output, fill),
        SampleFormat::I32 => build_stream::<i32, F>(output, fill),
        SampleFormat::U16 => build_stream::<u16, F>(output, fill),
        other => Err(PipelineError::Device(format!(
            "unsupported output sample format {other:?}"
        ))),
    }
}

fn build_stream<T, F>(output: &OutputConfig, mut fill: F) -> Result<Stream>
where
    T: cpal::Sample + FromSample<f32> + SizedSample,
    F: FnMut(&mut [f32]) + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();
    output
        .device
        .build_output_stream(
            &output.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                fill(&mut scratch);
                for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(s);
                }
            },
            |err| log::error!("Output stream error: {err}"),
            None,
        )
        .map_err(PipelineError::device)
}
