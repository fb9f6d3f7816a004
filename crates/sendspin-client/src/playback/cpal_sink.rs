//! System audio output through cpal
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! host). Scheduled buffers are shared with the render callback, which starts
//! each one when the local clock reaches its start time and resamples it
//! linearly by `playback_rate * buffer_rate / device_rate`.

use super::scheduler::ScheduledBuffer;
use super::sink::{effective_gain, AudioSink};
use crate::sync::MonotonicClock;
use crate::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info};

/// Buffer being rendered and its fractional read position
struct Playing {
    buffer: ScheduledBuffer,
    position: f64,
}

#[derive(Default)]
struct RenderState {
    pending: VecDeque<ScheduledBuffer>,
    playing: Option<Playing>,
    gain: f32,
}

/// Plays scheduled buffers on the default output device
pub struct CpalSink {
    state: Arc<Mutex<RenderState>>,
    // Dropping the sender stops the output thread
    _shutdown: std::sync::mpsc::Sender<()>,
    device_rate: u32,
    device_channels: u16,
}

impl CpalSink {
    /// Open the default output device
    pub fn open(clock: MonotonicClock) -> Result<Self> {
        let state = Arc::new(Mutex::new(RenderState {
            gain: 1.0,
            ..Default::default()
        }));
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(u32, u16)>>();

        let render_state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("sendspin-audio-out".to_string())
            .spawn(move || {
                let stream = match build_stream(render_state, clock) {
                    Ok((stream, rate, channels)) => {
                        let _ = ready_tx.send(Ok((rate, channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until the sink is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::AudioOutputError(format!("Failed to spawn output thread: {}", e)))?;

        let (device_rate, device_channels) = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutputError("Output thread exited early".to_string()))??;

        info!(
            sample_rate = device_rate,
            channels = device_channels,
            "Opened audio output device"
        );

        Ok(Self {
            state,
            _shutdown: shutdown_tx,
            device_rate,
            device_channels,
        })
    }

    /// Device sample rate
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Device channel count
    pub fn device_channels(&self) -> u16 {
        self.device_channels
    }
}

fn build_stream(
    state: Arc<Mutex<RenderState>>,
    clock: MonotonicClock,
) -> Result<(cpal::Stream, u32, u16)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutputError("No output device available".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| Error::AudioOutputError(e.to_string()))?;
    let config: cpal::StreamConfig = supported.into();
    let device_rate = config.sample_rate.0;
    let channels = config.channels;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render(&mut state.lock(), data, channels as usize, device_rate, clock.now_us());
            },
            |err| {
                error!("Audio output error: {}", err);
            },
            None,
        )
        .map_err(|e| Error::AudioOutputError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::AudioOutputError(e.to_string()))?;

    Ok((stream, device_rate, channels))
}

/// Fill one device callback worth of interleaved frames
fn render(state: &mut RenderState, data: &mut [f32], channels: usize, device_rate: u32, now_us: i64) {
    let frame_us = 1_000_000.0 / device_rate as f64;

    for (i, frame) in data.chunks_mut(channels).enumerate() {
        let t = now_us + (i as f64 * frame_us) as i64;

        if state.playing.is_none() {
            while let Some(front) = state.pending.front() {
                if front.end_us() <= t {
                    state.pending.pop_front();
                    continue;
                }
                if front.start_us <= t {
                    state.playing = state.pending.pop_front().map(|buffer| Playing {
                        buffer,
                        position: 0.0,
                    });
                }
                break;
            }
        }

        let Some(playing) = state.playing.as_mut() else {
            frame.fill(0.0);
            continue;
        };

        let source = &playing.buffer.buffer;
        let frames = source.frames();
        let index = playing.position as usize;
        let frac = (playing.position - index as f64) as f32;

        for (c, out) in frame.iter_mut().enumerate() {
            let channel = &source.channels[c.min(source.channel_count().saturating_sub(1))];
            let a = channel.get(index).copied().unwrap_or(0.0);
            let b = channel.get(index + 1).copied().unwrap_or(a);
            *out = (a + (b - a) * frac) * state.gain;
        }

        playing.position += playing.buffer.playback_rate * source.sample_rate as f64
            / device_rate as f64;
        if playing.position as usize >= frames {
            state.playing = None;
        }
    }
}

impl AudioSink for CpalSink {
    fn play(&mut self, buffer: &ScheduledBuffer) -> Result<()> {
        if buffer.buffer.channel_count() == 0 {
            return Ok(());
        }
        self.state.lock().pending.push_back(buffer.clone());
        Ok(())
    }

    fn flush(&mut self) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.playing = None;
    }

    fn set_volume(&mut self, volume: f32, muted: bool) {
        self.state.lock().gain = effective_gain(volume, muted);
    }

    fn name(&self) -> &str {
        "cpal"
    }
}
