// src/decoder/mod.rs

pub mod dsp;

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::{PipelineError, Result};

/// One decoded packet as interleaved f32.
pub struct DecodedBlock<'a> {
    pub samples: &'a [f32],
    pub channels: usize,
    pub sample_rate: u32,
}

impl DecodedBlock<'_> {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }
}

/// Packet-by-packet reader over the default track of an audio file.
pub struct SourceStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_rate: Option<u32>,
    channels: Option<usize>,
    n_frames: Option<u64>,
}

impl SourceStream {
    /// Anything that is not a readable, probe-able audio file is a
    /// `DecodeFailure`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| PipelineError::DecodeFailure(format!("{}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(PipelineError::decode)?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| PipelineError::DecodeFailure("no default audio track".into()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let decoder = get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(PipelineError::decode)?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_buf: None,
            sample_rate: codec_params.sample_rate,
            channels: codec_params.channels.map(|c| c.count()),
            n_frames: codec_params.n_frames,
        })
    }

    /// Sample rate from the container, if it declares one.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn channels(&self) -> Option<usize> {
        self.channels
    }

    /// Total frame count, when the container knows it up front.
    pub fn n_frames(&self) -> Option<u64> {
        self.n_frames
    }

    /// Decodes the next packet of the track. `Ok(None)` is end of stream.
    /// Corrupt packets are skipped.
    pub fn next_block(&mut self) -> Result<Option<DecodedBlock<'_>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(PipelineError::decode(e)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {e}");
                    continue;
                }
                Err(SymphoniaError::IoError(_)) => continue,
                Err(e) => return Err(PipelineError::decode(e)),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let mut buf = match self.sample_buf.take() {
                Some(buf) if buf.capacity() >= decoded.capacity() => buf,
                _ => SampleBuffer::<f32>::new(decoded.capacity() as u64, spec),
            };
            buf.copy_interleaved_ref(decoded);
            let buf = self.sample_buf.insert(buf);

            self.sample_rate = Some(spec.rate);
            self.channels = Some(spec.channels.count());
            return Ok(Some(DecodedBlock {
                samples: buf.samples(),
                channels: spec.channels.count(),
                sample_rate: spec.rate,
            }));
        }
    }
}

/// A whole file decoded into memory.
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }
}

/// Decodes `path` completely. Packets whose channel count differs from the
/// first decoded packet are re-mixed to match it.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let mut source = SourceStream::open(path)?;
    let mut samples = Vec::new();
    let mut layout: Option<(usize, u32)> = None;

    while let Some(block) = source.next_block()? {
        let (channels, _) = *layout.get_or_insert((block.channels, block.sample_rate));
        if block.channels == channels {
            samples.extend_from_slice(block.samples);
        } else {
            samples.extend(dsp::updown_mix_interleaved(block.samples, block.channels, channels));
        }
    }

    let (channels, sample_rate) =
        layout.ok_or_else(|| PipelineError::DecodeFailure("no audio frames decoded".into()))?;
    Ok(DecodedAudio {
        samples,
        channels,
        sample_rate,
    })
}
