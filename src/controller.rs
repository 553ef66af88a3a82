//! Submission orchestration: one prompt, at most one in-flight request, and
//! exactly one terminal notification per accepted submission.
//!
//! The controller is the single authority over "should we submit, with what
//! text, and what happens to the result". The fetch itself runs on a worker
//! thread and reports back on a one-shot channel, so the caller's loop stays
//! responsive while a request is in flight and drains the outcome the same way
//! it drains voice messages.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};

use crate::artifact::save_artifact;
use crate::notify::{NotificationSink, ToastId};
use crate::report::{opaque_message, ReportApi, ReportArtifact, ReportFailure};
use crate::{log_debug, log_debug_content};

/// Validation notice for an empty or blank prompt.
pub const MSG_EMPTY_PROMPT: &str = "Por favor, escribe o dicta un comando.";

/// Progress notice shown before the request leaves.
pub const MSG_PROGRESS: &str = "Generando reporte, por favor espera...";

/// Terminal notice for a saved report.
pub const MSG_SUCCESS: &str = "¡Reporte descargado!";

/// Submission lifecycle owned exclusively by [`ReportController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    InFlight,
}

/// What `submit` decided to do with the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitDisposition {
    /// Accepted; a progress notice was emitted and the fetch started.
    Accepted,
    /// Blank prompt; only a validation notice was emitted.
    EmptyPrompt,
    /// A submission is already in flight; this call had no effect on it.
    AlreadyInFlight,
}

/// Terminal outcome of one accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedSubmission {
    /// Path of the saved artifact; `None` when the submission ended in error.
    pub saved: Option<PathBuf>,
}

struct InflightSubmission {
    outcome_rx: Receiver<Result<ReportArtifact, ReportFailure>>,
    toast: ToastId,
    started_at: Instant,
}

pub struct ReportController<S: NotificationSink> {
    api: Arc<dyn ReportApi>,
    sink: S,
    output_dir: PathBuf,
    prompt: String,
    inflight: Option<InflightSubmission>,
}

impl<S: NotificationSink> ReportController<S> {
    #[must_use]
    pub fn new(api: Arc<dyn ReportApi>, sink: S, output_dir: PathBuf) -> Self {
        Self {
            api,
            sink,
            output_dir,
            prompt: String::new(),
            inflight: None,
        }
    }

    /// Current prompt text, as last written by an edit or a voice transcript.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Manual prompt edit; overwrites any earlier voice transcript.
    pub fn set_prompt(&mut self, text: &str) {
        self.prompt = text.to_string();
    }

    #[must_use]
    pub fn submission_state(&self) -> SubmissionState {
        if self.inflight.is_some() {
            SubmissionState::InFlight
        } else {
            SubmissionState::Idle
        }
    }

    /// Submit a prompt. Blank prompts fail fast with a validation notice and
    /// never reach the network; a call while a submission is in flight is
    /// rejected and leaves the in-flight operation untouched.
    pub fn submit(&mut self, prompt: &str) -> SubmitDisposition {
        if prompt.trim().is_empty() {
            self.sink.show_error(None, MSG_EMPTY_PROMPT);
            return SubmitDisposition::EmptyPrompt;
        }
        if self.inflight.is_some() {
            log_debug("submit rejected: a submission is already in flight");
            return SubmitDisposition::AlreadyInFlight;
        }

        self.prompt = prompt.to_string();
        log_debug_content(&format!("submitting prompt: {prompt}"));

        // Progress is emitted before the worker exists, so it strictly
        // precedes the network call.
        let toast = self.sink.show_progress(MSG_PROGRESS);

        let (tx, outcome_rx) = crossbeam_channel::bounded(1);
        let api = Arc::clone(&self.api);
        let request = prompt.to_string();
        thread::spawn(move || {
            let _ = tx.send(api.fetch(&request));
        });

        self.inflight = Some(InflightSubmission {
            outcome_rx,
            toast,
            started_at: Instant::now(),
        });
        SubmitDisposition::Accepted
    }

    /// Voice input is dictate-and-send: store the transcript as the prompt,
    /// then submit it without further confirmation.
    pub fn on_voice_result(&mut self, transcript: &str) -> SubmitDisposition {
        self.prompt = transcript.to_string();
        self.submit(transcript)
    }

    /// Drain the in-flight submission. Returns the terminal outcome once,
    /// after emitting exactly one success or error notification and returning
    /// the state to idle; `None` while still waiting or when idle.
    pub fn poll(&mut self) -> Option<CompletedSubmission> {
        let outcome = match self.inflight.as_ref()?.outcome_rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => None,
        };
        let inflight = self.inflight.take()?;

        let completed = match outcome {
            Some(Ok(artifact)) => match save_artifact(&artifact, &self.output_dir) {
                Ok(path) => {
                    log_debug_content(&format!("report saved to {}", path.display()));
                    self.sink.show_success(inflight.toast, MSG_SUCCESS);
                    CompletedSubmission { saved: Some(path) }
                }
                Err(err) => {
                    self.sink
                        .show_error(Some(inflight.toast), &opaque_message(format_args!("{err:#}")));
                    CompletedSubmission { saved: None }
                }
            },
            Some(Err(failure)) => {
                log_debug(&format!("report request failed: {}", failure.message()));
                self.sink.show_error(Some(inflight.toast), failure.message());
                CompletedSubmission { saved: None }
            }
            None => {
                // Worker died without reporting; still owe the terminal notice.
                self.sink.show_error(
                    Some(inflight.toast),
                    &opaque_message("la descarga terminó inesperadamente"),
                );
                CompletedSubmission { saved: None }
            }
        };
        tracing::info!(
            target: "reporterm::submission",
            elapsed_ms = inflight.started_at.elapsed().as_millis() as u64,
            saved = completed.saved.is_some(),
            "submission finished"
        );
        Some(completed)
    }

    /// Block until the in-flight submission (if any) reaches its terminal
    /// notification. Used by the one-shot CLI modes.
    pub fn wait_for_outcome(&mut self, tick: Duration) -> Option<CompletedSubmission> {
        while self.submission_state() == SubmissionState::InFlight {
            if let Some(done) = self.poll() {
                return Some(done);
            }
            thread::sleep(tick);
        }
        None
    }
}
