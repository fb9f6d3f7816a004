//! Frame → decoder → scheduler plumbing

use super::decoder::{create_decoder, is_async_codec, AudioDecoder};
use super::types::{DecodedBuffer, StreamInfo};
use crate::playback::{ScheduleOutcome, SharedScheduler};
use crate::protocol::AudioFrame;
use crate::sync::MonotonicClock;
use crate::{Error, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Frame handed to the decode worker with the epoch current at submission
#[derive(Debug)]
struct DecodeRequest {
    frame: AudioFrame,
    epoch: u64,
}

enum ActiveDecoder {
    /// Decoded on the caller's task
    Inline(Box<dyn AudioDecoder>),
    /// Decoded on a worker task
    Worker {
        tx: mpsc::UnboundedSender<DecodeRequest>,
        handle: JoinHandle<()>,
    },
}

/// Routes audio frames of the active stream to its decoder
pub struct DecodePipeline {
    scheduler: SharedScheduler,
    clock: MonotonicClock,
    reports: mpsc::UnboundedSender<Error>,
    active: Option<ActiveDecoder>,
}

impl DecodePipeline {
    /// Create a pipeline; worker-side decode failures are sent to `reports`
    pub fn new(
        scheduler: SharedScheduler,
        clock: MonotonicClock,
        reports: mpsc::UnboundedSender<Error>,
    ) -> Self {
        Self {
            scheduler,
            clock,
            reports,
            active: None,
        }
    }

    /// True when a stream decoder is configured
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Set up decoding for a new stream, replacing any previous decoder
    pub fn configure(&mut self, info: &StreamInfo) -> Result<()> {
        self.stop();

        if !is_async_codec(&info.codec) {
            self.active = Some(ActiveDecoder::Inline(create_decoder(info)?));
            debug!(codec = %info.codec, "Configured inline decoder");
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(decode_worker(
            info.clone(),
            rx,
            self.scheduler.clone(),
            self.clock,
            self.reports.clone(),
        ));
        self.active = Some(ActiveDecoder::Worker { tx, handle });
        debug!(codec = %info.codec, "Started decode worker");
        Ok(())
    }

    /// Decode or enqueue one frame
    ///
    /// Frames arriving without an active stream are dropped. Inline decode
    /// failures are returned; worker failures go to the report channel.
    pub fn submit(&mut self, frame: AudioFrame) -> Result<()> {
        let epoch = self.scheduler.lock().epoch();

        match self.active.as_mut() {
            None => {
                trace!("Dropping audio frame without active stream");
                Ok(())
            }
            Some(ActiveDecoder::Inline(decoder)) => {
                let buffer = decode_frame(decoder.as_mut(), &frame)?;
                let now = self.clock.now_us();
                log_outcome(self.scheduler.lock().schedule(buffer, epoch, now));
                Ok(())
            }
            Some(ActiveDecoder::Worker { tx, .. }) => tx
                .send(DecodeRequest { frame, epoch })
                .map_err(|_| Error::DecodingError("decode worker stopped".to_string())),
        }
    }

    /// Tear down the active decoder
    pub fn stop(&mut self) {
        if let Some(ActiveDecoder::Worker { handle, .. }) = self.active.take() {
            handle.abort();
        }
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_frame(decoder: &mut dyn AudioDecoder, frame: &AudioFrame) -> Result<DecodedBuffer> {
    let timestamp_us = i64::try_from(frame.timestamp_us).map_err(|_| {
        Error::InvalidFrame(format!("timestamp {} out of range", frame.timestamp_us))
    })?;
    let channels = decoder.decode(&frame.payload)?;
    Ok(DecodedBuffer::new(channels, decoder.sample_rate(), timestamp_us))
}

fn log_outcome(outcome: ScheduleOutcome) {
    match outcome {
        ScheduleOutcome::Resynced { drift_us } => {
            debug!(drift_us, "Frame dropped by resync");
        }
        ScheduleOutcome::Stale => trace!("Stale frame discarded"),
        ScheduleOutcome::Empty => trace!("Empty frame discarded"),
        ScheduleOutcome::Scheduled { .. } => {}
    }
}

async fn decode_worker(
    info: StreamInfo,
    mut rx: mpsc::UnboundedReceiver<DecodeRequest>,
    scheduler: SharedScheduler,
    clock: MonotonicClock,
    reports: mpsc::UnboundedSender<Error>,
) {
    let mut decoder = match create_decoder(&info) {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!(codec = %info.codec, "Failed to create decoder: {}", e);
            let _ = reports.send(e);
            return;
        }
    };

    while let Some(request) = rx.recv().await {
        match decode_frame(decoder.as_mut(), &request.frame) {
            Ok(buffer) => {
                let now = clock.now_us();
                log_outcome(scheduler.lock().schedule(buffer, request.epoch, now));
            }
            Err(e) => {
                warn!(
                    codec = decoder.codec_name(),
                    timestamp_us = request.frame.timestamp_us,
                    "Dropping frame: {}",
                    e
                );
                let _ = reports.send(e);
            }
        }
    }

    trace!(codec = %info.codec, "Decode worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Codec;
    use crate::config::PlaybackConfig;
    use crate::playback::{ChannelSink, PlaybackScheduler, SinkEvent};
    use crate::sync::ClockEstimate;
    use bytes::Bytes;
    use parking_lot::RwLock;
    use std::sync::Arc;
    use std::time::Duration;

    fn info(codec: Codec, channels: u16) -> StreamInfo {
        StreamInfo {
            stream_id: "s1".to_string(),
            codec,
            sample_rate: 48_000,
            channels,
            bit_depth: 16,
            codec_header: None,
            duration: None,
            metadata: None,
        }
    }

    fn setup() -> (
        DecodePipeline,
        SharedScheduler,
        mpsc::UnboundedReceiver<SinkEvent>,
        mpsc::UnboundedReceiver<Error>,
    ) {
        let clock = Arc::new(RwLock::new(ClockEstimate::default()));
        let (sink, sink_rx) = ChannelSink::new();
        let scheduler =
            PlaybackScheduler::new(&PlaybackConfig::default(), clock, Box::new(sink)).into_shared();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let pipeline = DecodePipeline::new(scheduler.clone(), MonotonicClock::new(), report_tx);
        (pipeline, scheduler, sink_rx, report_rx)
    }

    fn pcm_frame(ts: u64, frames: usize) -> AudioFrame {
        let mut payload = Vec::new();
        for _ in 0..frames {
            payload.extend_from_slice(&1000i16.to_le_bytes());
        }
        AudioFrame {
            timestamp_us: ts,
            payload: Bytes::from(payload),
        }
    }

    async fn next_play(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> crate::playback::ScheduledBuffer {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for sink")
                .expect("sink closed");
            if let SinkEvent::Play(buffer) = event {
                return buffer;
            }
        }
    }

    #[tokio::test]
    async fn test_frames_without_stream_are_dropped() {
        let (mut pipeline, scheduler, _sink_rx, _reports) = setup();
        pipeline.submit(pcm_frame(0, 10)).unwrap();
        assert_eq!(scheduler.lock().queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_pcm_is_scheduled_inline() {
        let (mut pipeline, scheduler, mut sink_rx, _reports) = setup();
        scheduler.lock().rebase(0);
        pipeline.configure(&info(Codec::Pcm, 1)).unwrap();

        pipeline.submit(pcm_frame(0, 480)).unwrap();
        assert_eq!(scheduler.lock().queue_depth(), 1);

        let played = next_play(&mut sink_rx).await;
        assert_eq!(played.buffer.frames(), 480);
    }

    #[tokio::test]
    async fn test_opus_worker_schedules_directly() {
        let (mut pipeline, scheduler, mut sink_rx, _reports) = setup();
        let now = MonotonicClock::new().now_us();
        scheduler.lock().rebase(now);
        pipeline.configure(&info(Codec::Opus, 2)).unwrap();

        let mut encoder =
            opus::Encoder::new(48_000, opus::Channels::Stereo, opus::Application::Audio).unwrap();
        let pcm = vec![0.0f32; 960 * 2];
        let mut packet = vec![0u8; 4000];
        let len = encoder.encode_float(&pcm, &mut packet).unwrap();
        packet.truncate(len);

        pipeline
            .submit(AudioFrame {
                timestamp_us: 0,
                payload: Bytes::from(packet),
            })
            .unwrap();

        let played = next_play(&mut sink_rx).await;
        assert_eq!(played.buffer.channel_count(), 2);
        assert_eq!(played.buffer.frames(), 960);
    }

    #[tokio::test]
    async fn test_opus_decode_failure_is_reported() {
        let (mut pipeline, scheduler, _sink_rx, mut reports) = setup();
        scheduler.lock().rebase(0);
        pipeline.configure(&info(Codec::Opus, 2)).unwrap();

        // Code 3 packet declaring zero frames is rejected by libopus
        pipeline
            .submit(AudioFrame {
                timestamp_us: 0,
                payload: Bytes::from_static(&[0x03, 0x00]),
            })
            .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(err.is_frame_level());
    }

    #[tokio::test]
    async fn test_stale_inline_frame_after_rebase() {
        let (mut pipeline, scheduler, _sink_rx, _reports) = setup();
        scheduler.lock().rebase(0);
        pipeline.configure(&info(Codec::Pcm, 1)).unwrap();
        pipeline.submit(pcm_frame(0, 480)).unwrap();

        scheduler.lock().rebase(0);
        assert_eq!(scheduler.lock().queue_depth(), 0);
        pipeline.submit(pcm_frame(10_000, 480)).unwrap();
        assert_eq!(scheduler.lock().queue_depth(), 1);
    }

    #[tokio::test]
    async fn test_unsigned_timestamp_overflow_is_rejected() {
        let (mut pipeline, scheduler, _sink_rx, _reports) = setup();
        scheduler.lock().rebase(0);
        pipeline.configure(&info(Codec::Pcm, 1)).unwrap();

        for timestamp in [u64::MAX, 1u64 << 63] {
            let err = pipeline.submit(pcm_frame(timestamp, 480)).unwrap_err();
            assert!(matches!(err, Error::InvalidFrame(_)), "{:?}", err);
        }
        assert_eq!(scheduler.lock().queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_stop_deactivates() {
        let (mut pipeline, _scheduler, _sink_rx, _reports) = setup();
        pipeline.configure(&info(Codec::Opus, 2)).unwrap();
        assert!(pipeline.is_active());
        pipeline.stop();
        assert!(!pipeline.is_active());
    }
}
