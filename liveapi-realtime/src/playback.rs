//! Audio playback pipeline.
//!
//! [`AudioStreamer`] is the control side: it decodes PCM16 chunks, resamples
//! them to the device rate and sends them, in order, to a
//! [`PlaybackScheduler`] that lives inside the device's render callback. The
//! scheduler plays chunks back to back with sample-accurate continuation.
//!
//! Two stop semantics:
//! - [`AudioStreamer::complete`] queues an end-of-turn marker; everything
//!   before it plays, then [`PlaybackEvent::Complete`] fires.
//! - [`AudioStreamer::stop`] bumps an epoch; the scheduler drops its current
//!   chunk and every queued item from older epochs before rendering again.

use crate::audio::{AudioEncoding, AudioFormat, downmix_to_mono, pcm16_to_f32, resample_linear};
use crate::device::{ActiveStream, OutputDevice};
use crate::error::{RealtimeError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use tokio::sync::mpsc;

/// Notifications from the playback pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Every chunk queued before `complete()` has played.
    Complete,
}

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing queued or playing.
    Idle,
    /// Chunks are queued or playing.
    Playing,
    /// End of turn signalled; remaining chunks are draining.
    Draining,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Draining,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Playing => 1,
            Self::Draining => 2,
        }
    }
}

#[derive(Debug)]
enum PlaybackItem {
    Samples(Vec<f32>),
    EndOfTurn,
}

struct PlaybackShared {
    epoch: AtomicU64,
    queued: AtomicUsize,
    state: AtomicU8,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

impl PlaybackShared {
    fn set_state(&self, state: PlaybackState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn chunk_finished(&self) {
        let _ = self.queued.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Render-side state machine fed by [`AudioStreamer`].
pub(crate) struct PlaybackScheduler {
    items: std_mpsc::Receiver<(u64, PlaybackItem)>,
    shared: Arc<PlaybackShared>,
    current: Option<(Vec<f32>, usize)>,
    epoch: u64,
}

impl PlaybackScheduler {
    fn new(items: std_mpsc::Receiver<(u64, PlaybackItem)>, shared: Arc<PlaybackShared>) -> Self {
        let epoch = shared.epoch.load(Ordering::SeqCst);
        Self { items, shared, current: None, epoch }
    }

    /// Fill `out` with the next samples, padding with silence on underrun.
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        let mut written = 0;

        while written < out.len() {
            let epoch = self.shared.epoch.load(Ordering::SeqCst);
            if epoch != self.epoch {
                self.epoch = epoch;
                self.current = None;
            }

            if self.current.is_none() {
                let (item_epoch, item) = match self.items.try_recv() {
                    Ok((item_epoch, _)) if item_epoch < self.epoch => continue,
                    Ok(next) => next,
                    Err(_) => break,
                };
                // Newer only when a stop landed after the epoch check above.
                self.epoch = item_epoch;
                match item {
                    PlaybackItem::Samples(samples) => self.current = Some((samples, 0)),
                    PlaybackItem::EndOfTurn => {
                        self.finish_turn();
                        continue;
                    }
                }
            }

            if let Some((samples, position)) = self.current.as_mut() {
                let n = (samples.len() - *position).min(out.len() - written);
                out[written..written + n].copy_from_slice(&samples[*position..*position + n]);
                written += n;
                *position += n;
                if *position == samples.len() {
                    self.current = None;
                    self.shared.chunk_finished();
                }
            }
        }

        out[written..].fill(0.0);
    }

    fn finish_turn(&mut self) {
        let next = if self.shared.queued.load(Ordering::SeqCst) == 0 {
            PlaybackState::Idle
        } else {
            PlaybackState::Playing
        };
        self.shared.set_state(next);
        let _ = self.shared.events.send(PlaybackEvent::Complete);
    }
}

struct OutputLink {
    items: std_mpsc::Sender<(u64, PlaybackItem)>,
    stream: Box<dyn ActiveStream>,
    device_rate: u32,
}

/// Streams model audio to an output device.
pub struct AudioStreamer {
    device: Arc<dyn OutputDevice>,
    format: AudioFormat,
    shared: Arc<PlaybackShared>,
    output: Mutex<Option<OutputLink>>,
}

impl AudioStreamer {
    /// Create a streamer for PCM16 audio in `format`.
    ///
    /// Multi-channel input is downmixed to mono before playback.
    pub fn new(
        device: Arc<dyn OutputDevice>,
        format: AudioFormat,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PlaybackEvent>)> {
        if format.encoding != AudioEncoding::Pcm16 || format.sample_rate == 0 || format.channels == 0 {
            return Err(RealtimeError::audio(format!(
                "Unsupported playback format: {} at {} Hz, {} channels",
                format.encoding, format.sample_rate, format.channels
            )));
        }
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PlaybackShared {
            epoch: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            state: AtomicU8::new(PlaybackState::Idle.as_u8()),
            events,
        });
        Ok((Self { device, format, shared, output: Mutex::new(None) }, rx))
    }

    /// Queue one PCM16 little-endian chunk.
    ///
    /// The output device is opened on the first chunk. An undecodable chunk
    /// is skipped and reported; playback of other chunks is unaffected.
    pub fn add_pcm16(&self, pcm: &[u8]) -> Result<()> {
        let samples = pcm16_to_f32(pcm).inspect_err(|e| {
            tracing::warn!(bytes = pcm.len(), error = %e, "Skipping undecodable audio chunk");
        })?;
        if samples.is_empty() {
            return Ok(());
        }

        let mut output = self.output.lock();
        if output.is_none() {
            *output = Some(self.open_output()?);
        }
        let Some(link) = output.as_ref() else {
            return Err(RealtimeError::device("Output device unavailable"));
        };

        tracing::trace!(duration_ms = self.format.duration_ms(pcm.len()), "Queueing audio chunk");
        let samples = downmix_to_mono(&samples, self.format.channels);
        let samples = resample_linear(&samples, self.format.sample_rate, link.device_rate);
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        self.shared.set_state(PlaybackState::Playing);

        if link.items.send((epoch, PlaybackItem::Samples(samples))).is_err() {
            self.shared.chunk_finished();
            output.take();
            return Err(RealtimeError::device("Output stream stopped"));
        }
        Ok(())
    }

    /// Let queued audio finish, then emit [`PlaybackEvent::Complete`].
    pub fn complete(&self) {
        let output = self.output.lock();
        let Some(link) = output.as_ref() else {
            let _ = self.shared.events.send(PlaybackEvent::Complete);
            return;
        };
        self.shared.set_state(PlaybackState::Draining);
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        if link.items.send((epoch, PlaybackItem::EndOfTurn)).is_err() {
            self.shared.set_state(PlaybackState::Idle);
            let _ = self.shared.events.send(PlaybackEvent::Complete);
        }
    }

    /// Halt immediately and discard everything queued.
    pub fn stop(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.queued.store(0, Ordering::SeqCst);
        self.shared.set_state(PlaybackState::Idle);
    }

    /// Chunks queued or playing.
    pub fn queued_chunks(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Current playback state.
    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Stop playback and release the output device.
    pub fn close(&self) {
        self.stop();
        if let Some(mut link) = self.output.lock().take() {
            link.stream.close();
            tracing::debug!("Output device released");
        }
    }

    fn open_output(&self) -> Result<OutputLink> {
        let (items, rx) = std_mpsc::channel();
        let mut scheduler = PlaybackScheduler::new(rx, self.shared.clone());
        let opened = self.device.open(Box::new(move |out: &mut [f32]| scheduler.render(out)))?;
        tracing::info!(source_rate = self.format.sample_rate, device_rate = opened.sample_rate, "Playback started");
        Ok(OutputLink { items, stream: opened.stream, device_rate: opened.sample_rate })
    }
}

impl Drop for AudioStreamer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> (
        std_mpsc::Sender<(u64, PlaybackItem)>,
        PlaybackScheduler,
        Arc<PlaybackShared>,
        mpsc::UnboundedReceiver<PlaybackEvent>,
    ) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PlaybackShared {
            epoch: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            state: AtomicU8::new(0),
            events,
        });
        let (tx, rx) = std_mpsc::channel();
        (tx, PlaybackScheduler::new(rx, shared.clone()), shared, events_rx)
    }

    #[test]
    fn test_chunks_play_back_to_back() {
        let (tx, mut scheduler, shared, _events) = scheduler();
        shared.queued.store(2, Ordering::SeqCst);
        tx.send((0, PlaybackItem::Samples(vec![0.1, 0.2, 0.3]))).unwrap();
        tx.send((0, PlaybackItem::Samples(vec![0.4, 0.5]))).unwrap();

        let mut out = [9.0; 4];
        scheduler.render(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(shared.queued.load(Ordering::SeqCst), 1);

        scheduler.render(&mut out);
        assert_eq!(out, [0.5, 0.0, 0.0, 0.0]);
        assert_eq!(shared.queued.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_end_of_turn_fires_after_queued_audio() {
        let (tx, mut scheduler, shared, mut events) = scheduler();
        shared.queued.store(1, Ordering::SeqCst);
        shared.set_state(PlaybackState::Draining);
        tx.send((0, PlaybackItem::Samples(vec![0.5; 6]))).unwrap();
        tx.send((0, PlaybackItem::EndOfTurn)).unwrap();

        let mut out = [0.0; 4];
        scheduler.render(&mut out);
        assert!(events.try_recv().is_err());
        assert_eq!(shared.state(), PlaybackState::Draining);

        scheduler.render(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
        assert_eq!(events.try_recv().unwrap(), PlaybackEvent::Complete);
        assert_eq!(shared.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_epoch_change_drops_stale_audio() {
        let (tx, mut scheduler, shared, mut events) = scheduler();
        tx.send((0, PlaybackItem::Samples(vec![0.5; 8]))).unwrap();
        let mut out = [0.0; 2];
        scheduler.render(&mut out);
        assert_eq!(out, [0.5, 0.5]);

        tx.send((0, PlaybackItem::Samples(vec![0.7; 8]))).unwrap();
        tx.send((0, PlaybackItem::EndOfTurn)).unwrap();
        shared.epoch.fetch_add(1, Ordering::SeqCst);
        tx.send((1, PlaybackItem::Samples(vec![-0.25]))).unwrap();

        let mut out = [0.0; 3];
        scheduler.render(&mut out);
        assert_eq!(out, [-0.25, 0.0, 0.0]);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_newer_epoch_item_is_played() {
        // The item was queued after a stop the scheduler has not observed yet.
        let (tx, mut scheduler, shared, _events) = scheduler();
        shared.queued.store(1, Ordering::SeqCst);
        tx.send((1, PlaybackItem::Samples(vec![0.25, 0.25]))).unwrap();

        let mut out = [0.0; 3];
        scheduler.render(&mut out);
        assert_eq!(out, [0.25, 0.25, 0.0]);
        assert_eq!(scheduler.epoch, 1);
        assert_eq!(shared.queued.load(Ordering::SeqCst), 0);
    }
}
