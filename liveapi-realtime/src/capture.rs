//! Audio capture pipeline.
//!
//! Microphone samples are converted to PCM16 in the device callback and cut
//! into fixed-size chunks; each full chunk is base64-encoded and delivered as
//! [`CaptureEvent::Data`]. A volume meter runs over the same samples.

use crate::audio::{CAPTURE_CHUNK_SAMPLES, VOLUME_WINDOW_SAMPLES, encode_pcm16_base64, f32_to_i16};
use crate::device::{ActiveStream, InputDevice};
use crate::error::{RealtimeError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};

/// Output of the capture pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// One full chunk of base64 PCM16.
    Data(String),
    /// RMS of the latest meter window.
    Volume(f32),
}

/// Accumulates float samples into fixed-size PCM16 chunks.
#[derive(Debug, Clone)]
pub struct Pcm16Chunker {
    buffer: Vec<i16>,
    write_index: usize,
}

impl Default for Pcm16Chunker {
    fn default() -> Self {
        Self::new(CAPTURE_CHUNK_SAMPLES)
    }
}

impl Pcm16Chunker {
    /// Create a chunker emitting chunks of `chunk_samples`.
    pub fn new(chunk_samples: usize) -> Self {
        Self { buffer: vec![0; chunk_samples.max(1)], write_index: 0 }
    }

    /// Convert and buffer `samples`, calling `emit` for every full chunk.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[i16])) {
        for &sample in samples {
            self.buffer[self.write_index] = f32_to_i16(sample);
            self.write_index += 1;
            if self.write_index == self.buffer.len() {
                emit(&self.buffer);
                self.write_index = 0;
            }
        }
    }

    /// Samples waiting for the chunk to fill.
    pub fn buffered(&self) -> usize {
        self.write_index
    }

    /// Chunk size in samples.
    pub fn chunk_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Drop the partial chunk. Returns how many samples were discarded.
    pub fn reset(&mut self) -> usize {
        std::mem::take(&mut self.write_index)
    }
}

/// Root-mean-square level over fixed windows.
#[derive(Debug, Clone)]
pub struct VolumeMeter {
    window: usize,
    sum_squares: f64,
    count: usize,
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self::new(VOLUME_WINDOW_SAMPLES)
    }
}

impl VolumeMeter {
    /// Create a meter over windows of `window` samples.
    pub fn new(window: usize) -> Self {
        Self { window: window.max(1), sum_squares: 0.0, count: 0 }
    }

    /// Feed samples, calling `emit` with the RMS of each completed window.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(f32)) {
        for &sample in samples {
            self.sum_squares += (sample as f64) * (sample as f64);
            self.count += 1;
            if self.count == self.window {
                emit((self.sum_squares / self.count as f64).sqrt() as f32);
                self.sum_squares = 0.0;
                self.count = 0;
            }
        }
    }
}

/// Microphone recorder.
///
/// `start` and `stop` are serialized: a `stop` issued while `start` is
/// acquiring the device waits for it and then releases the device.
pub struct AudioRecorder {
    device: Arc<dyn InputDevice>,
    sample_rate: u32,
    events: mpsc::UnboundedSender<CaptureEvent>,
    active: Mutex<Option<Box<dyn ActiveStream>>>,
    recording: Arc<AtomicBool>,
}

impl AudioRecorder {
    /// Create a recorder and the receiver for its events.
    pub fn new(device: Arc<dyn InputDevice>, sample_rate: u32) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let recorder = Self {
            device,
            sample_rate,
            events,
            active: Mutex::new(None),
            recording: Arc::new(AtomicBool::new(false)),
        };
        (recorder, rx)
    }

    /// Acquire the device and start emitting events. No-op when already
    /// recording.
    pub async fn start(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Ok(());
        }

        let device = self.device.clone();
        let sample_rate = self.sample_rate;
        let events = self.events.clone();
        let live = self.recording.clone();
        live.store(true, Ordering::SeqCst);

        let opened = tokio::task::spawn_blocking(move || {
            let mut chunker = Pcm16Chunker::default();
            let mut meter = VolumeMeter::default();
            device.open(
                sample_rate,
                Box::new(move |samples: &[f32]| {
                    if !live.load(Ordering::Relaxed) {
                        return;
                    }
                    chunker.push(samples, |chunk| {
                        let _ = events.send(CaptureEvent::Data(encode_pcm16_base64(chunk)));
                    });
                    meter.push(samples, |volume| {
                        let _ = events.send(CaptureEvent::Volume(volume));
                    });
                }),
            )
        })
        .await
        .map_err(|e| RealtimeError::device(format!("Capture start task failed: {e}")))
        .and_then(|opened| opened);

        match opened {
            Ok(stream) => {
                *active = Some(stream);
                tracing::info!(sample_rate, "Recording started");
                Ok(())
            }
            Err(e) => {
                self.recording.store(false, Ordering::SeqCst);
                tracing::warn!(error = %e, "Recording failed to start");
                Err(e)
            }
        }
    }

    /// Release the device. The partial chunk is discarded. Returns whether a
    /// recording was stopped.
    pub async fn stop(&self) -> bool {
        let mut active = self.active.lock().await;
        self.recording.store(false, Ordering::SeqCst);
        let Some(mut stream) = active.take() else {
            return false;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || stream.close()).await {
            tracing::warn!(error = %e, "Capture stop task failed");
        }
        tracing::info!("Recording stopped");
        true
    }

    /// Whether the microphone is live.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Rate of emitted chunks.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_emits_full_chunks_only() {
        let mut chunker = Pcm16Chunker::new(4);
        let mut chunks = Vec::new();
        chunker.push(&[0.5; 10], |c| chunks.push(c.to_vec()));
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c == &vec![16_384; 4]));
        assert_eq!(chunker.buffered(), 2);
        assert_eq!(chunker.reset(), 2);
        assert_eq!(chunker.buffered(), 0);
    }

    #[test]
    fn test_chunker_spans_pushes() {
        let mut chunker = Pcm16Chunker::new(3);
        let mut chunks = Vec::new();
        chunker.push(&[0.0, 0.0], |c| chunks.push(c.to_vec()));
        assert!(chunks.is_empty());
        chunker.push(&[-1.0, 0.0], |c| chunks.push(c.to_vec()));
        assert_eq!(chunks, vec![vec![0, 0, i16::MIN]]);
    }

    #[test]
    fn test_volume_meter_rms() {
        let mut meter = VolumeMeter::new(4);
        let mut levels = Vec::new();
        meter.push(&[0.5, -0.5, 0.5, -0.5, 0.0, 0.0], |v| levels.push(v));
        assert_eq!(levels.len(), 1);
        assert!((levels[0] - 0.5).abs() < 1e-6);
        meter.push(&[0.0, 0.0], |v| levels.push(v));
        assert_eq!(levels[1], 0.0);
    }
}
