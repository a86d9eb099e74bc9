//! Audio format definitions and PCM16 utilities.

use crate::error::{RealtimeError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Microphone capture rate expected by the live service.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Rate of the audio the live service sends back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per captured chunk (128 ms at 16 kHz).
pub const CAPTURE_CHUNK_SAMPLES: usize = 2048;

/// Samples per volume-meter window.
pub const VOLUME_WINDOW_SAMPLES: usize = 1024;

/// Mime type of captured microphone chunks.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Audio encoding formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// 16-bit little-endian PCM.
    #[default]
    Pcm16,
    /// 32-bit float, as delivered by audio hardware.
    F32,
}

impl std::fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pcm16 => write!(f, "pcm16"),
            Self::F32 => write!(f, "f32"),
        }
    }
}

/// Complete audio format specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample encoding.
    pub encoding: AudioEncoding,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::live_output()
    }
}

impl AudioFormat {
    /// Mono PCM16 at the given rate.
    pub fn pcm16(sample_rate: u32) -> Self {
        Self { sample_rate, channels: 1, encoding: AudioEncoding::Pcm16 }
    }

    /// Format of microphone chunks sent to the service.
    pub fn live_input() -> Self {
        Self::pcm16(INPUT_SAMPLE_RATE)
    }

    /// Format of audio received from the service.
    pub fn live_output() -> Self {
        Self::pcm16(OUTPUT_SAMPLE_RATE)
    }

    /// Bytes per sample frame (all channels).
    pub fn bytes_per_frame(&self) -> usize {
        let sample = match self.encoding {
            AudioEncoding::Pcm16 => 2,
            AudioEncoding::F32 => 4,
        };
        sample * self.channels as usize
    }

    /// Bytes per second of audio.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.bytes_per_frame() as u32
    }

    /// Duration in milliseconds of `bytes` of audio.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        bytes as f64 * 1000.0 / self.bytes_per_second() as f64
    }

    /// Mime type for inline data in this format.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// Scale a float sample to 16 bits, truncating toward zero.
///
/// Values outside `[-1, 1]` saturate at the `i16` bounds.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0) as i16
}

/// Scale a 16-bit sample to `[-1, 1)`.
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode samples as PCM16 little-endian bytes.
pub fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    data
}

/// Decode PCM16 little-endian bytes.
///
/// Odd-length input is not valid PCM16.
pub fn le_bytes_to_i16(data: &[u8]) -> Result<Vec<i16>> {
    if data.len() % 2 != 0 {
        return Err(RealtimeError::audio(format!(
            "Invalid data length for PCM16: {} (must be even)",
            data.len()
        )));
    }
    Ok(data.chunks_exact(2).map(|pair| i16::from_le_bytes([pair[0], pair[1]])).collect())
}

/// Decode PCM16 little-endian bytes straight to float samples.
pub fn pcm16_to_f32(data: &[u8]) -> Result<Vec<f32>> {
    Ok(le_bytes_to_i16(data)?.into_iter().map(i16_to_f32).collect())
}

/// Base64-encode PCM16 samples for a realtime-input chunk.
pub fn encode_pcm16_base64(samples: &[i16]) -> String {
    STANDARD.encode(i16_to_le_bytes(samples))
}

/// Decode a base64 audio payload.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD.decode(encoded).map_err(|e| RealtimeError::audio(format!("Invalid base64 audio: {e}")))
}

/// Linear-interpolation resampler.
///
/// Each call is independent; chunk boundaries are not smoothed.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[next] * frac
        })
        .collect()
}

/// Average interleaved frames down to mono.
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
