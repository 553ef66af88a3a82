//! Microphone capture of a single utterance with an energy-based stop gate.
//!
//! The gate balances stopping quickly after the user is done speaking against
//! clipping trailing words: silence can end the capture only after speech was
//! heard and the minimum duration passed. Capture always runs on a worker
//! thread; the stream never outlives one call.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::log_debug;

/// Whisper expects 16 kHz mono PCM.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Gate frame granularity.
const FRAME_MS: u64 = 30;

/// How long the capture loop waits for the device before counting dead air.
const RECV_TIMEOUT_MS: u64 = 50;

/// Max buffered device chunks before backpressure drops apply.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Tuning for one capture session, resolved from configuration.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device: Option<String>,
    pub threshold_db: f32,
    pub min_utterance_ms: u64,
    pub silence_ms: u64,
    pub max_utterance_ms: u64,
}

/// Why a capture ended; used for logs and timing telemetry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStop {
    /// Trailing silence after speech; carries the silence tail length.
    TrailingSilence { tail_ms: u64 },
    /// Hard duration ceiling reached.
    MaxDuration,
    /// Caller raised the stop flag; the partial capture is discarded.
    Stopped,
    /// No speech arrived before the ceiling.
    Timeout,
}

impl CaptureStop {
    /// Compact label for log lines.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::TrailingSilence { .. } => "trailing_silence",
            Self::MaxDuration => "max_duration",
            Self::Stopped => "stopped",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameLabel {
    Speech,
    Silence,
}

/// Tracks speech/silence windows and decides when the utterance is over.
struct UtteranceGate {
    threshold_db: f32,
    min_ms: u64,
    silence_stop_ms: u64,
    max_ms: u64,
    speech_ms: u64,
    silence_streak_ms: u64,
    total_ms: u64,
}

impl UtteranceGate {
    fn new(settings: &CaptureSettings) -> Self {
        Self {
            threshold_db: settings.threshold_db,
            min_ms: settings.min_utterance_ms,
            silence_stop_ms: settings.silence_ms,
            max_ms: settings.max_utterance_ms,
            speech_ms: 0,
            silence_streak_ms: 0,
            total_ms: 0,
        }
    }

    fn classify(&self, rms_db: f32) -> FrameLabel {
        if rms_db >= self.threshold_db {
            FrameLabel::Speech
        } else {
            FrameLabel::Silence
        }
    }

    /// Advance by one frame; silence can stop capture only after speech was
    /// heard and the minimum duration is met, so a quiet room never ends the
    /// session immediately.
    fn on_frame(&mut self, rms_db: f32, frame_ms: u64) -> Option<CaptureStop> {
        match self.classify(rms_db) {
            FrameLabel::Speech => {
                self.speech_ms = self.speech_ms.saturating_add(frame_ms);
                self.silence_streak_ms = 0;
            }
            FrameLabel::Silence => {
                self.silence_streak_ms = self.silence_streak_ms.saturating_add(frame_ms);
            }
        }
        self.total_ms = self.total_ms.saturating_add(frame_ms);

        if self.total_ms >= self.max_ms {
            return Some(if self.speech_ms == 0 {
                CaptureStop::Timeout
            } else {
                CaptureStop::MaxDuration
            });
        }
        if self.speech_ms > 0
            && self.total_ms >= self.min_ms
            && self.silence_streak_ms >= self.silence_stop_ms
        {
            return Some(CaptureStop::TrailingSilence {
                tail_ms: self.silence_streak_ms,
            });
        }
        None
    }

    /// Advance elapsed time when the device delivered nothing, so a stalled
    /// input cannot keep the capture alive forever.
    fn on_dead_air(&mut self, elapsed_ms: u64) -> Option<CaptureStop> {
        self.total_ms = self.total_ms.saturating_add(elapsed_ms);
        if self.total_ms >= self.max_ms {
            Some(if self.speech_ms == 0 {
                CaptureStop::Timeout
            } else {
                CaptureStop::MaxDuration
            })
        } else {
            None
        }
    }

    fn heard_speech(&self) -> bool {
        self.speech_ms > 0
    }
}

/// RMS level of a frame in dBFS, floored for silent input.
fn frame_rms_dbfs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return -120.0;
    }
    let mean_square =
        samples.iter().map(|s| f64::from(*s) * f64::from(*s)).sum::<f64>() / samples.len() as f64;
    let rms = mean_square.sqrt();
    if rms <= 1e-6 {
        -120.0
    } else {
        (20.0 * rms.log10()) as f32
    }
}

/// Average interleaved channels down to mono.
fn downmix_to_mono(input: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return input.to_vec();
    }
    input
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampler. Speech at 16 kHz mono does not need a
/// polyphase filter bank.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (input.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = i as f64 * ratio;
        let idx = src as usize;
        let frac = (src - idx as f64) as f32;
        let a = input[idx.min(input.len() - 1)];
        let b = input[(idx + 1).min(input.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

enum CaptureEvent {
    Chunk(Vec<f32>),
    DeviceError(String),
}

/// Record one utterance and return it as 16 kHz mono PCM.
///
/// Returns an empty buffer when nothing usable was heard: manual stop (the
/// partial capture is discarded), timeout before speech, or a silent take.
///
/// # Errors
///
/// Returns an error when no input device is available, the stream cannot be
/// built, or the device reports a failure mid-capture.
pub fn record_utterance(settings: &CaptureSettings, stop: &AtomicBool) -> Result<Vec<f32>> {
    let host = cpal::default_host();
    let device = match settings.device.as_deref() {
        Some(name) => host
            .input_devices()
            .context("failed to enumerate audio input devices")?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("audio input device '{name}' not found"))?,
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default audio input device"))?,
    };

    let supported = device
        .default_input_config()
        .context("failed to query default input config")?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    let (tx, rx) = crossbeam_channel::bounded::<CaptureEvent>(CHUNK_CHANNEL_CAPACITY);
    let err_tx = tx.clone();
    let on_error = move |err: cpal::StreamError| {
        let _ = err_tx.try_send(CaptureEvent::DeviceError(err.to_string()));
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            let tx = tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.try_send(CaptureEvent::Chunk(data.to_vec()));
                },
                on_error,
                None,
            )
        }
        cpal::SampleFormat::I16 => {
            let tx = tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let converted = data
                        .iter()
                        .map(|s| f32::from(*s) / f32::from(i16::MAX))
                        .collect();
                    let _ = tx.try_send(CaptureEvent::Chunk(converted));
                },
                on_error,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let tx = tx.clone();
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let converted = data
                        .iter()
                        .map(|s| (f32::from(*s) - 32_768.0) / 32_768.0)
                        .collect();
                    let _ = tx.try_send(CaptureEvent::Chunk(converted));
                },
                on_error,
                None,
            )
        }
        other => bail!("unsupported input sample format {other:?}"),
    }
    .context("failed to build audio input stream")?;

    stream.play().context("failed to start audio capture")?;

    let frame_len = ((u64::from(sample_rate) * FRAME_MS) / 1000).max(1) as usize;
    let mut gate = UtteranceGate::new(settings);
    let mut captured: Vec<f32> = Vec::new();
    let mut pending: Vec<f32> = Vec::new();
    let stop_reason;

    loop {
        if stop.load(Ordering::Relaxed) {
            stop_reason = CaptureStop::Stopped;
            break;
        }
        match rx.recv_timeout(Duration::from_millis(RECV_TIMEOUT_MS)) {
            Ok(CaptureEvent::Chunk(chunk)) => {
                pending.extend(downmix_to_mono(&chunk, channels));
                let mut ended = None;
                while pending.len() >= frame_len {
                    let frame: Vec<f32> = pending.drain(..frame_len).collect();
                    let level = frame_rms_dbfs(&frame);
                    captured.extend_from_slice(&frame);
                    if let Some(reason) = gate.on_frame(level, FRAME_MS) {
                        ended = Some(reason);
                        break;
                    }
                }
                if let Some(reason) = ended {
                    stop_reason = reason;
                    break;
                }
            }
            Ok(CaptureEvent::DeviceError(message)) => {
                drop(stream);
                bail!("audio capture failed: {message}");
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(reason) = gate.on_dead_air(RECV_TIMEOUT_MS) {
                    stop_reason = reason;
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                drop(stream);
                bail!("audio capture stream closed unexpectedly");
            }
        }
    }
    drop(stream);

    log_debug(&format!(
        "capture ended: reason={} captured_ms={}",
        stop_reason.label(),
        (captured.len() as u64 * 1000) / u64::from(sample_rate.max(1))
    ));

    if matches!(stop_reason, CaptureStop::Stopped | CaptureStop::Timeout) || !gate.heard_speech() {
        return Ok(Vec::new());
    }
    Ok(resample_linear(&captured, sample_rate, TARGET_SAMPLE_RATE))
}

/// Names of the available audio input devices.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .context("failed to enumerate audio input devices")?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// Whether the host exposes any input device at all.
#[must_use]
pub fn has_input_device() -> bool {
    cpal::default_host().default_input_device().is_some()
}
