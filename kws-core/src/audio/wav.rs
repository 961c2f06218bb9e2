//! WAV container boundary.
//!
//! Only little-endian RIFF/WAVE, PCM format code 1, mono, 16-bit signed
//! samples are accepted. Anything else — float data, extra channels, other
//! bit depths, short reads — is rejected as [`KwsError::InvalidContainer`].
//!
//! hound reports WAVE_FORMAT_EXTENSIBLE files with a PCM sub-format as plain
//! integer PCM, so the `fmt ` chunk's format code is read directly first.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::buffering::samples::SampleBuffer;
use crate::error::{KwsError, Result};

/// Plain PCM format code in the `fmt ` chunk.
const WAVE_FORMAT_PCM: u16 = 1;

/// Format code of the first `fmt ` chunk, or `None` when the RIFF chunk
/// list ends before one is found.
fn fmt_format_code(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    let mut pos = 12usize;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body = pos + 8;
        if id == b"fmt " {
            return bytes
                .get(body..body + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]));
        }
        // chunks are padded to an even length
        pos = body.checked_add(size)?.checked_add(size & 1)?;
    }
    None
}

/// Decode an in-memory WAV file into f32 samples in [-1.0, 1.0].
pub fn decode(bytes: &[u8]) -> Result<SampleBuffer> {
    if let Some(code) = fmt_format_code(bytes) {
        if code != WAVE_FORMAT_PCM {
            return Err(KwsError::InvalidContainer(format!(
                "only PCM (format 1) is supported, file has format {code:#06x}"
            )));
        }
    }
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| KwsError::InvalidContainer(format!("bad header: {e}")))?;
    let spec = reader.spec();

    if spec.sample_format != SampleFormat::Int {
        return Err(KwsError::InvalidContainer(
            "only PCM (format 1) is supported".into(),
        ));
    }
    if spec.channels != 1 {
        return Err(KwsError::InvalidContainer(format!(
            "only mono is supported, file has {} channels",
            spec.channels
        )));
    }
    if spec.bits_per_sample != 16 {
        return Err(KwsError::InvalidContainer(format!(
            "only 16-bit samples are supported, file has {} bits",
            spec.bits_per_sample
        )));
    }
    if spec.sample_rate == 0 {
        return Err(KwsError::InvalidContainer("sample rate is zero".into()));
    }

    let samples = reader
        .into_samples::<i16>()
        .map(|s| s.map(|v| v as f32 / 32768.0))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| KwsError::InvalidContainer(format!("could not read all audio bytes: {e}")))?;

    Ok(SampleBuffer::new(samples, spec.sample_rate))
}

/// Read and decode a WAV file from disk.
pub fn read_wav(path: &Path) -> Result<SampleBuffer> {
    let bytes = std::fs::read(path)?;
    let buffer = decode(&bytes)?;
    tracing::info!(
        path = %path.display(),
        sample_rate = buffer.sample_rate,
        samples = buffer.len(),
        duration_secs = buffer.duration_secs(),
        "loaded WAV"
    );
    Ok(buffer)
}

/// Encode mono f32 samples as a 16-bit PCM WAV file in memory.
///
/// Samples are clamped to [-1.0, 1.0] and scaled by `i16::MAX`.
pub fn encode_pcm16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav encode: {e}"))?;
        for &sample in samples {
            let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| anyhow::anyhow!("wav encode: {e}"))?;
        }
        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize: {e}"))?;
    }
    Ok(cursor.into_inner())
}

/// Write `buffer` to `path` as a mono 16-bit PCM WAV file.
pub fn write_wav(path: &Path, buffer: &SampleBuffer) -> Result<()> {
    let bytes = encode_pcm16(&buffer.samples, buffer.sample_rate)?;
    std::fs::write(path, bytes)?;
    Ok(())
}
