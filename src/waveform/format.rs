// src/waveform/format.rs
//
// Little-endian layout:
//   i32 version | u32 flags | i32 sample_rate | i32 samples_per_pixel | u32 length
//   [i32 channels]            (version 2 only)
//   2 * length samples, i8 if flags & FLAG_8_BIT else i16

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use super::{Waveform, FLAG_8_BIT, WAVEFORM_VERSION};
use crate::error::{PipelineError, Result};

impl Waveform {
    pub fn write_to<W: Write>(&self, mut out: W) -> Result<()> {
        out.write_all(&(WAVEFORM_VERSION as i32).to_le_bytes())?;
        out.write_all(&self.flags.to_le_bytes())?;
        out.write_all(&header_i32(self.sample_rate, "sample rate")?.to_le_bytes())?;
        out.write_all(&header_i32(self.samples_per_pixel, "samples per pixel")?.to_le_bytes())?;
        out.write_all(&self.length.to_le_bytes())?;

        if self.is_8_bit() {
            let body: Vec<u8> = self
                .data
                .iter()
                .map(|&s| s.clamp(i8::MIN as i16, i8::MAX as i16) as i8 as u8)
                .collect();
            out.write_all(&body)?;
        } else {
            let mut body = Vec::with_capacity(self.data.len() * 2);
            for s in &self.data {
                body.extend_from_slice(&s.to_le_bytes());
            }
            out.write_all(&body)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut input: R) -> Result<Self> {
        let version = read_i32(&mut input)?;
        if !(1..=2).contains(&version) {
            return Err(PipelineError::InvalidWaveform(format!(
                "unsupported version {version}"
            )));
        }
        let flags = read_u32(&mut input)?;
        let sample_rate = positive(read_i32(&mut input)?, "sample rate")?;
        let samples_per_pixel = positive(read_i32(&mut input)?, "samples per pixel")?;
        let length = read_u32(&mut input)? as usize;

        if version == 2 {
            let channels = read_i32(&mut input)?;
            if channels != 1 {
                return Err(PipelineError::InvalidWaveform(format!(
                    "only mono waveforms are supported, got {channels} channels"
                )));
            }
        }

        let count = 2 * length;
        let data = if flags & FLAG_8_BIT != 0 {
            let body = read_sized(&mut input, count)?;
            body.into_iter().map(|b| b as i8 as i16).collect()
        } else {
            let body = read_sized(&mut input, count * 2)?;
            body.chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect()
        };

        Waveform::new(version as u32, flags, sample_rate, samples_per_pixel, data)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(BufReader::new(file))
    }
}

fn read_i32<R: Read>(input: &mut R) -> Result<i32> {
    let mut b = [0u8; 4];
    read_body(input, &mut b)?;
    Ok(i32::from_le_bytes(b))
}

fn read_u32<R: Read>(input: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    read_body(input, &mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_body<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<()> {
    input.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => PipelineError::InvalidWaveform("truncated waveform".into()),
        _ => PipelineError::Io(e),
    })
}

/// Reads exactly `len` bytes. The buffer grows with what the input actually
/// holds, so a bogus header length cannot force a huge allocation.
fn read_sized<R: Read>(input: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    input.take(len as u64).read_to_end(&mut body)?;
    if body.len() < len {
        return Err(PipelineError::InvalidWaveform("truncated waveform".into()));
    }
    Ok(body)
}

fn header_i32(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| PipelineError::InvalidWaveform(format!("{what} {value} does not fit the header")))
}

fn positive(value: i32, what: &str) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|&v| v > 0)
        .ok_or_else(|| PipelineError::InvalidWaveform(format!("{what} must be > 0, got {value}")))
}
