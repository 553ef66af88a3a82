//! Whisper speech-to-text so captured audio becomes a submittable prompt.
//!
//! Wraps `whisper_rs` behind a small transcription API. The model is loaded
//! once and shared across capture sessions; loading it per utterance would add
//! seconds of latency.

/// Whether joining `prev` and `next` across a segment boundary needs a space.
#[inline]
fn needs_boundary_space(prev: char, next: char) -> bool {
    if prev.is_whitespace() || next.is_whitespace() {
        return false;
    }
    // Closing punctuation attaches to the previous word.
    if matches!(next, '.' | ',' | ';' | ':' | '!' | '?' | ')' | ']' | '}' | '%') {
        return false;
    }
    // Opening brackets and quotes attach to the following word.
    !matches!(prev, '(' | '[' | '{' | '"' | '\'' | '¿' | '¡' | '-' | '/')
}

/// Append one Whisper segment, stitching word boundaries between segments.
fn push_segment(transcript: &mut String, segment: &str) {
    let segment = segment.trim();
    if segment.is_empty() {
        return;
    }
    if let (Some(prev), Some(next)) = (transcript.chars().last(), segment.chars().next()) {
        if needs_boundary_space(prev, next) {
            transcript.push(' ');
        }
    }
    transcript.push_str(segment);
}

#[cfg(unix)]
mod platform {
    use anyhow::{anyhow, Context, Result};
    use std::io;
    use std::os::raw::{c_char, c_uint, c_void};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;
    use std::sync::Once;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    use crate::log_debug;

    /// Redirects stderr to `/dev/null` for its lifetime and restores it on drop.
    ///
    /// whisper.cpp prints verbose initialization banners straight to stderr;
    /// this keeps them out of the user's terminal during model load. The
    /// redirect is process-wide, so the silencer is held only across the load.
    struct StderrSilencer {
        saved_fd: i32,
    }

    impl StderrSilencer {
        fn install() -> Result<Self> {
            let null = std::fs::OpenOptions::new()
                .write(true)
                .open("/dev/null")
                .context("failed to open /dev/null")?;

            // SAFETY: dup(2) on the live stderr descriptor; the duplicate is
            // closed in drop after stderr is restored.
            let saved_fd = unsafe { libc::dup(libc::STDERR_FILENO) };
            if saved_fd < 0 {
                return Err(anyhow!(
                    "failed to dup stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            // SAFETY: both descriptors are valid; dup2 atomically repoints stderr.
            let redirected = unsafe { libc::dup2(null.as_raw_fd(), libc::STDERR_FILENO) };
            if redirected < 0 {
                // SAFETY: saved_fd came from dup(2) above.
                unsafe {
                    libc::close(saved_fd);
                }
                return Err(anyhow!(
                    "failed to redirect stderr: {}",
                    io::Error::last_os_error()
                ));
            }
            Ok(Self { saved_fd })
        }
    }

    impl Drop for StderrSilencer {
        fn drop(&mut self) {
            // SAFETY: saved_fd is the dup of the original stderr; restoring and
            // closing it is the documented dup/dup2 teardown sequence.
            unsafe {
                let _ = libc::dup2(self.saved_fd, libc::STDERR_FILENO);
                let _ = libc::close(self.saved_fd);
            }
        }
    }

    /// Loaded Whisper model shared by all capture sessions.
    pub struct Transcriber {
        ctx: WhisperContext,
    }

    impl Transcriber {
        /// Load the model from disk with whisper.cpp logging suppressed.
        ///
        /// # Errors
        ///
        /// Returns an error when the model file cannot be loaded or the
        /// stderr redirect cannot be installed.
        pub fn new(model_path: &Path) -> Result<Self> {
            install_log_silencer();

            let path = model_path
                .to_str()
                .ok_or_else(|| anyhow!("model path is not valid UTF-8"))?;
            let silencer = StderrSilencer::install()?;
            let loaded =
                WhisperContext::new_with_params(path, WhisperContextParameters::default());
            drop(silencer);

            let ctx = loaded.context("failed to load whisper model")?;
            Ok(Self { ctx })
        }

        /// Transcribe 16 kHz mono PCM and return the stitched text.
        ///
        /// # Errors
        ///
        /// Returns an error when Whisper state allocation or inference fails.
        pub fn transcribe(&self, samples: &[f32], lang: &str) -> Result<String> {
            let mut state = self
                .ctx
                .create_state()
                .context("failed to create whisper state")?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            if lang.eq_ignore_ascii_case("auto") {
                params.set_language(None);
                params.set_detect_language(true);
            } else {
                params.set_language(Some(lang));
                params.set_detect_language(false);
            }
            // Leave one logical core free and cap the fanout; transcription
            // shares the machine with the capture and submission threads.
            let workers = std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1)
                .saturating_sub(1)
                .clamp(1, 4);
            params.set_n_threads(i32::try_from(workers).unwrap_or(1));
            params.set_print_progress(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_translate(false);
            params.set_token_timestamps(false);

            state.full(params, samples)?;

            let mut transcript = String::new();
            let segments = match state.full_n_segments() {
                Ok(count) if count >= 0 => count,
                Ok(_) => {
                    log_debug("whisper returned a negative segment count");
                    return Ok(transcript);
                }
                Err(err) => {
                    log_debug(&format!("whisper failed to report segments: {err}"));
                    return Ok(transcript);
                }
            };
            for index in 0..segments {
                match state.full_get_segment_text_lossy(index) {
                    Ok(text) => super::push_segment(&mut transcript, &text),
                    Err(err) => {
                        log_debug(&format!("failed to read whisper segment {index}: {err}"));
                    }
                }
            }
            // Whisper emits this marker for takes it considers empty.
            Ok(transcript.replace("[BLANK_AUDIO]", ""))
        }
    }

    fn install_log_silencer() {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| unsafe {
            // SAFETY: the callback ignores every argument and dereferences nothing.
            whisper_rs::set_log_callback(Some(silent_log_callback), std::ptr::null_mut());
        });
    }

    #[allow(unused_variables)]
    unsafe extern "C" fn silent_log_callback(
        _level: c_uint,
        _text: *const c_char,
        _user_data: *mut c_void,
    ) {
        // Drop whisper.cpp log lines so they cannot interleave with output.
        // SAFETY: no incoming pointer is dereferenced.
    }
}

#[cfg(not(unix))]
mod platform {
    use anyhow::{anyhow, Result};
    use std::path::Path;

    /// Stub for targets without Whisper support; voice stays unsupported there.
    pub struct Transcriber;

    impl Transcriber {
        /// # Errors
        ///
        /// Always fails: Whisper transcription requires a Unix-like target.
        pub fn new(_: &Path) -> Result<Self> {
            Err(anyhow!(
                "voice capture is currently supported only on Unix-like platforms"
            ))
        }

        /// # Errors
        ///
        /// Always fails: Whisper transcription requires a Unix-like target.
        pub fn transcribe(&self, _: &[f32], _: &str) -> Result<String> {
            Err(anyhow!(
                "voice capture is currently supported only on Unix-like platforms"
            ))
        }
    }
}

pub use platform::Transcriber;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_join_with_sentence_spacing() {
        let mut transcript = String::new();
        push_segment(&mut transcript, "reporte de ventas");
        push_segment(&mut transcript, "de este mes");
        push_segment(&mut transcript, "en excel");
        assert_eq!(transcript, "reporte de ventas de este mes en excel");
    }

    #[test]
    fn closing_punctuation_attaches_to_previous_word() {
        let mut transcript = String::new();
        push_segment(&mut transcript, "listo");
        push_segment(&mut transcript, "!");
        push_segment(&mut transcript, "?");
        assert_eq!(transcript, "listo!?");
    }

    #[test]
    fn opening_marks_attach_to_following_word() {
        let mut transcript = String::from("dijo ¿");
        push_segment(&mut transcript, "cuándo?");
        assert_eq!(transcript, "dijo ¿cuándo?");
    }

    #[test]
    fn empty_and_whitespace_segments_are_skipped() {
        let mut transcript = String::from("hola");
        push_segment(&mut transcript, "   ");
        push_segment(&mut transcript, "");
        push_segment(&mut transcript, "  mundo  ");
        push_segment(&mut transcript, ".");
        assert_eq!(transcript, "hola mundo.");
    }

    #[test]
    fn boundary_rules_cover_whitespace_and_punctuation() {
        assert!(!needs_boundary_space('a', ' '));
        assert!(!needs_boundary_space(' ', 'a'));
        assert!(!needs_boundary_space('a', ','));
        assert!(!needs_boundary_space('(', 'a'));
        assert!(!needs_boundary_space('¿', 'q'));
        assert!(needs_boundary_space('a', 'b'));
        assert!(needs_boundary_space('.', 'S'));
    }

    #[cfg(unix)]
    #[test]
    fn transcriber_rejects_missing_model() {
        let result = Transcriber::new(std::path::Path::new("/no/such/model.bin"));
        assert!(result.is_err());
    }
}
