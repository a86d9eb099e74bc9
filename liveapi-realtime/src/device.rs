//! Audio hardware seam.
//!
//! Capture and playback pipelines talk to hardware only through
//! [`InputDevice`] and [`OutputDevice`]. Callbacks run on the device's
//! real-time thread and must not block.

use crate::error::{RealtimeError, Result};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Receives mono capture samples at the requested rate.
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Fills a mono output buffer at the device rate.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// A running device stream. Dropping it stops the stream.
pub trait ActiveStream: Send {
    /// Stop the stream and release the device.
    fn close(&mut self);
}

/// A capture device.
pub trait InputDevice: Send + Sync {
    /// Start capturing mono audio resampled to `sample_rate`.
    fn open(&self, sample_rate: u32, on_samples: InputCallback) -> Result<Box<dyn ActiveStream>>;
}

/// An opened output stream and the rate its render callback runs at.
pub struct OpenedOutput {
    /// The running stream.
    pub stream: Box<dyn ActiveStream>,
    /// Rate of the samples the render callback produces.
    pub sample_rate: u32,
}

/// A playback device.
pub trait OutputDevice: Send + Sync {
    /// Start pulling mono audio from `render`.
    fn open(&self, render: RenderCallback) -> Result<OpenedOutput>;
}

/// Stream parked on a dedicated thread until closed.
struct ThreadStream {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ActiveStream for ThreadStream {
    fn close(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Audio stream thread panicked");
            }
        }
    }
}

impl Drop for ThreadStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Output device that renders into nothing at real-time pace.
#[derive(Debug, Clone, Copy)]
pub struct NullOutput {
    sample_rate: u32,
    period: Duration,
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new(crate::audio::OUTPUT_SAMPLE_RATE)
    }
}

impl NullOutput {
    /// A null device running at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate, period: Duration::from_millis(20) }
    }
}

impl OutputDevice for NullOutput {
    fn open(&self, mut render: RenderCallback) -> Result<OpenedOutput> {
        let (stop, stopped) = mpsc::channel::<()>();
        let frames = (self.sample_rate as u128 * self.period.as_millis() / 1000).max(1) as usize;
        let period = self.period;

        let thread = std::thread::Builder::new()
            .name("liveapi-null-output".to_string())
            .spawn(move || {
                let mut buffer = vec![0.0f32; frames];
                while let Err(mpsc::RecvTimeoutError::Timeout) = stopped.recv_timeout(period) {
                    render(&mut buffer);
                }
            })
            .map_err(|e| RealtimeError::device(format!("Failed to spawn output thread: {e}")))?;

        tracing::debug!(sample_rate = self.sample_rate, "Null output opened");
        Ok(OpenedOutput {
            stream: Box::new(ThreadStream { stop: Some(stop), thread: Some(thread) }),
            sample_rate: self.sample_rate,
        })
    }
}

#[cfg(feature = "desktop-audio")]
pub use self::cpal_backend::{CpalInput, CpalOutput};

#[cfg(feature = "desktop-audio")]
mod cpal_backend {
    use super::*;
    use crate::audio::{downmix_to_mono, i16_to_f32, resample_linear};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};

    /// Default system microphone.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct CpalInput;

    /// Default system speaker.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct CpalOutput;

    fn spawn_stream<F>(name: &str, build: F) -> Result<(ThreadStream, u32)>
    where
        F: FnOnce() -> Result<(cpal::Stream, u32)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (stop, stopped) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // cpal streams are not Send; this thread owns it until close.
                let stream = match build() {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stopped.recv();
                drop(stream);
            })
            .map_err(|e| RealtimeError::device(format!("Failed to spawn audio thread: {e}")))?;

        let rate = ready_rx
            .recv()
            .map_err(|_| RealtimeError::device("Audio thread exited before opening the device"))??;
        Ok((ThreadStream { stop: Some(stop), thread: Some(thread) }, rate))
    }

    fn stream_error(err: cpal::StreamError) {
        tracing::warn!(error = %err, "Audio stream error");
    }

    impl InputDevice for CpalInput {
        fn open(&self, sample_rate: u32, mut on_samples: InputCallback) -> Result<Box<dyn ActiveStream>> {
            let (stream, device_rate) = spawn_stream("liveapi-capture", move || {
                let device = cpal::default_host()
                    .default_input_device()
                    .ok_or_else(|| RealtimeError::device("No microphone available"))?;
                let supported = device
                    .default_input_config()
                    .map_err(|e| RealtimeError::device(format!("No usable input config: {e}")))?;
                let format = supported.sample_format();
                let config: StreamConfig = supported.into();
                let channels = config.channels;
                let device_rate = config.sample_rate.0;

                let mut deliver = move |mono: Vec<f32>| {
                    on_samples(&resample_linear(&mono, device_rate, sample_rate));
                };

                let stream = match format {
                    SampleFormat::F32 => device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            deliver(downmix_to_mono(data, channels));
                        },
                        stream_error,
                        None,
                    ),
                    SampleFormat::I16 => device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            let floats: Vec<f32> = data.iter().copied().map(i16_to_f32).collect();
                            deliver(downmix_to_mono(&floats, channels));
                        },
                        stream_error,
                        None,
                    ),
                    other => {
                        return Err(RealtimeError::device(format!("Unsupported input sample format {other:?}")));
                    }
                }
                .map_err(|e| RealtimeError::device(format!("Failed to open microphone: {e}")))?;

                stream.play().map_err(|e| RealtimeError::device(format!("Failed to start microphone: {e}")))?;
                Ok((stream, device_rate))
            })?;

            tracing::info!(device_rate, sample_rate, "Microphone opened");
            Ok(Box::new(stream))
        }
    }

    impl OutputDevice for CpalOutput {
        fn open(&self, mut render: RenderCallback) -> Result<OpenedOutput> {
            let (stream, device_rate) = spawn_stream("liveapi-playback", move || {
                let device = cpal::default_host()
                    .default_output_device()
                    .ok_or_else(|| RealtimeError::device("No speaker available"))?;
                let supported = device
                    .default_output_config()
                    .map_err(|e| RealtimeError::device(format!("No usable output config: {e}")))?;
                if supported.sample_format() != SampleFormat::F32 {
                    return Err(RealtimeError::device(format!(
                        "Unsupported output sample format {:?}",
                        supported.sample_format()
                    )));
                }
                let config: StreamConfig = supported.into();
                let channels = config.channels.max(1) as usize;
                let device_rate = config.sample_rate.0;
                let mut mono = Vec::new();

                let stream = device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            mono.resize(data.len() / channels, 0.0);
                            render(&mut mono);
                            for (frame, sample) in data.chunks_mut(channels).zip(mono.iter()) {
                                frame.fill(*sample);
                            }
                        },
                        stream_error,
                        None,
                    )
                    .map_err(|e| RealtimeError::device(format!("Failed to open speaker: {e}")))?;

                stream.play().map_err(|e| RealtimeError::device(format!("Failed to start speaker: {e}")))?;
                Ok((stream, device_rate))
            })?;

            tracing::info!(device_rate, "Speaker opened");
            Ok(OpenedOutput { stream: Box::new(stream), sample_rate: device_rate })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_null_output_pulls_until_closed() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let mut opened = NullOutput::new(1000)
            .open(Box::new(move |buf: &mut [f32]| {
                counter.fetch_add(buf.len(), Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(opened.sample_rate, 1000);

        std::thread::sleep(Duration::from_millis(120));
        opened.stream.close();
        let after_close = pulled.load(Ordering::SeqCst);
        assert!(after_close > 0);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(pulled.load(Ordering::SeqCst), after_close);
    }
}
