//! Voice capture session: one utterance per listening session, delivered as a
//! message to a single subscriber.
//!
//! The recognizer is a host capability that may simply not exist (no model, no
//! microphone, unsupported platform). Absence is not an error: the session is
//! constructed "unsupported" and callers hide voice affordances entirely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::audio::{self, CaptureSettings};
use crate::config::AppConfig;
use crate::log_debug;
use crate::stt::Transcriber;

/// Capture lifecycle owned exclusively by [`VoiceCaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningState {
    Idle,
    Listening,
}

/// Terminal outcome of one listening session, delivered at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceSessionMessage {
    /// Finalized transcript, ready to submit.
    Transcript { text: String },
    /// Capture-device or transcription failure. Recovered locally; callers
    /// reset state and log, they do not surface a blocking error.
    Error(String),
    /// The session ended with nothing usable (silence, timeout).
    Ended,
}

/// Host speech capability: capture exactly one utterance, honoring `stop`.
pub trait CaptureEngine: Send + Sync {
    /// Blocks on the worker thread until the utterance ends. `Ok(None)` means
    /// nothing usable was heard (including a caller-requested stop).
    fn capture_once(&self, stop: &AtomicBool) -> anyhow::Result<Option<String>>;
}

/// Microphone + Whisper implementation of the capture capability.
struct WhisperCaptureEngine {
    transcriber: Transcriber,
    settings: CaptureSettings,
    lang: String,
}

impl CaptureEngine for WhisperCaptureEngine {
    fn capture_once(&self, stop: &AtomicBool) -> anyhow::Result<Option<String>> {
        let samples = audio::record_utterance(&self.settings, stop)?;
        if samples.is_empty() {
            return Ok(None);
        }
        let text = self.transcriber.transcribe(&samples, &self.lang)?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(text.to_string()))
    }
}

/// Build the capture engine for this host, degrading to `None` (unsupported)
/// instead of failing startup.
pub fn detect_engine(config: &AppConfig) -> Option<Arc<dyn CaptureEngine>> {
    let Some(model) = config.model.clone() else {
        log_debug("voice unsupported: no whisper model configured");
        return None;
    };
    if !model.exists() {
        log_debug(&format!(
            "voice unsupported: model {} not found",
            model.display()
        ));
        return None;
    }
    if !audio::has_input_device() {
        log_debug("voice unsupported: no audio input device");
        return None;
    }
    match Transcriber::new(&model) {
        Ok(transcriber) => Some(Arc::new(WhisperCaptureEngine {
            transcriber,
            settings: capture_settings(config),
            lang: config.resolved_lang().to_string(),
        })),
        Err(err) => {
            log_debug(&format!("voice unsupported: {err:#}"));
            None
        }
    }
}

fn capture_settings(config: &AppConfig) -> CaptureSettings {
    CaptureSettings {
        device: config.input_device.clone(),
        threshold_db: config.vad_threshold_db,
        min_utterance_ms: config.min_record_ms,
        silence_ms: config.silence_ms,
        max_utterance_ms: config.max_record_secs * 1000,
    }
}

struct ActiveCapture {
    rx: Receiver<VoiceSessionMessage>,
    stop: Arc<AtomicBool>,
    started_at: Instant,
}

/// One start-to-result (or start-to-stop) speech capture cycle.
///
/// Each `start_listening` spawns a worker that sends exactly one message on a
/// session-private channel; `stop_listening` drops the channel so a late
/// result from a stopped session can never trigger a submission.
pub struct VoiceCaptureSession {
    engine: Option<Arc<dyn CaptureEngine>>,
    state: ListeningState,
    active: Option<ActiveCapture>,
}

impl VoiceCaptureSession {
    #[must_use]
    pub fn new(engine: Option<Arc<dyn CaptureEngine>>) -> Self {
        Self {
            engine,
            state: ListeningState::Idle,
            active: None,
        }
    }

    /// Session with no capture capability; every voice call is a no-op.
    #[must_use]
    pub fn unsupported() -> Self {
        Self::new(None)
    }

    #[must_use]
    pub fn supported(&self) -> bool {
        self.engine.is_some()
    }

    #[must_use]
    pub fn state(&self) -> ListeningState {
        self.state
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state == ListeningState::Listening
    }

    /// Begin one listening session. No-op when unsupported or already
    /// listening; any undelivered result from a previous session is cleared.
    pub fn start_listening(&mut self) {
        if self.is_listening() {
            return;
        }
        let Some(engine) = self.engine.as_ref() else {
            log_debug("start_listening ignored: voice capture unsupported");
            return;
        };

        // A fresh channel per session is what makes delivery one-shot.
        let (tx, rx) = crossbeam_channel::bounded::<VoiceSessionMessage>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker_engine = Arc::clone(engine);
        thread::spawn(move || {
            let message = match worker_engine.capture_once(&worker_stop) {
                Ok(Some(text)) => VoiceSessionMessage::Transcript { text },
                Ok(None) => VoiceSessionMessage::Ended,
                Err(err) => VoiceSessionMessage::Error(format!("{err:#}")),
            };
            let _ = tx.send(message);
        });

        self.active = Some(ActiveCapture {
            rx,
            stop,
            started_at: Instant::now(),
        });
        self.state = ListeningState::Listening;
    }

    /// Stop the current session, discarding whatever it eventually produces.
    /// No-op when not listening.
    pub fn stop_listening(&mut self) {
        if !self.is_listening() {
            return;
        }
        if let Some(active) = self.active.take() {
            active.stop.store(true, Ordering::Relaxed);
            // Dropping the receiver here is the discard: the worker's send
            // lands in a disconnected channel.
        }
        self.state = ListeningState::Idle;
        log_debug("listening stopped by caller; partial capture discarded");
    }

    /// Drain the session's one-shot result. Every returned message resets the
    /// session to idle; `Error` is additionally logged here because its
    /// contract is log-only recovery.
    pub fn poll(&mut self) -> Option<VoiceSessionMessage> {
        let message = match self.active.as_ref()?.rx.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => {
                VoiceSessionMessage::Error("capture worker exited without a result".to_string())
            }
        };
        if let Some(active) = &self.active {
            tracing::info!(
                target: "reporterm::voice",
                elapsed_ms = active.started_at.elapsed().as_millis() as u64,
                transcript = matches!(&message, VoiceSessionMessage::Transcript { .. }),
                "listening session finished"
            );
        }
        self.active = None;
        self.state = ListeningState::Idle;
        if let VoiceSessionMessage::Error(reason) = &message {
            log_debug(&format!("speech capture failed: {reason}"));
        }
        Some(message)
    }
}

impl Drop for VoiceCaptureSession {
    fn drop(&mut self) {
        // Release the capture device promptly on teardown.
        if let Some(active) = self.active.take() {
            active.stop.store(true, Ordering::Relaxed);
        }
    }
}
