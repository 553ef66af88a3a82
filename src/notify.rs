//! Notification boundary so submission feedback stays decoupled from rendering.
//!
//! A progress notification returns a handle; the matching terminal call
//! (success or error) consumes it. Validation notices carry no handle because
//! nothing was in progress when they fired.

use std::io::{self, Write};

/// Handle tying a terminal notification back to the progress it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToastId(pub u64);

/// Consumer-facing notification surface with exactly three operations.
pub trait NotificationSink {
    /// Announce that work started. The returned handle must be passed to the
    /// terminal call that replaces this notification.
    fn show_progress(&mut self, message: &str) -> ToastId;

    /// Replace the progress notification with a success outcome.
    fn show_success(&mut self, toast: ToastId, message: &str);

    /// Surface a failure. `toast` is `None` for standalone notices that had no
    /// progress phase (e.g. prompt validation).
    fn show_error(&mut self, toast: Option<ToastId>, message: &str);
}

const COLOR_INFO: &str = "\x1b[36m";
const COLOR_SUCCESS: &str = "\x1b[32m";
const COLOR_ERROR: &str = "\x1b[31m";
const COLOR_RESET: &str = "\x1b[0m";

/// Severity glyphs shared with the progress/terminal lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Progress,
    Success,
    Error,
}

impl Severity {
    fn icon(self) -> &'static str {
        match self {
            Self::Progress => "…",
            Self::Success => "✓",
            Self::Error => "✗",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Progress => COLOR_INFO,
            Self::Success => COLOR_SUCCESS,
            Self::Error => COLOR_ERROR,
        }
    }
}

/// Line-oriented terminal sink. Each notification renders as one line; the
/// terminal line for a submission visually supersedes its progress line.
#[derive(Debug)]
pub struct TerminalSink {
    color: bool,
    next_id: u64,
}

impl TerminalSink {
    #[must_use]
    pub fn new(color: bool) -> Self {
        Self { color, next_id: 0 }
    }

    fn emit(&self, severity: Severity, message: &str) {
        let line = format_notification(severity, message, self.color);
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
}

impl NotificationSink for TerminalSink {
    fn show_progress(&mut self, message: &str) -> ToastId {
        let id = ToastId(self.next_id);
        self.next_id += 1;
        self.emit(Severity::Progress, message);
        id
    }

    fn show_success(&mut self, _toast: ToastId, message: &str) {
        self.emit(Severity::Success, message);
    }

    fn show_error(&mut self, _toast: Option<ToastId>, message: &str) {
        self.emit(Severity::Error, message);
    }
}

fn format_notification(severity: Severity, message: &str, color: bool) -> String {
    let icon = severity.icon();
    if color {
        format!(
            "{}{icon}{} {message}",
            severity.color(),
            COLOR_RESET
        )
    } else {
        format!("{icon} {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_handles_are_monotonic() {
        let mut sink = TerminalSink::new(false);
        let a = sink.show_progress("uno");
        let b = sink.show_progress("dos");
        assert_ne!(a, b);
        assert_eq!(a, ToastId(0));
        assert_eq!(b, ToastId(1));
    }

    #[test]
    fn formatting_without_color_has_no_ansi_sequences() {
        let line = format_notification(Severity::Error, "algo falló", false);
        assert!(!line.contains("\x1b["));
        assert!(line.contains("algo falló"));
        assert!(line.starts_with("✗"));
    }

    #[test]
    fn formatting_with_color_wraps_only_the_icon() {
        let line = format_notification(Severity::Success, "listo", true);
        assert!(line.contains(COLOR_SUCCESS));
        assert!(line.contains(COLOR_RESET));
        assert!(line.ends_with(" listo"));
    }

    #[test]
    fn severity_icons_are_distinct() {
        assert_ne!(Severity::Progress.icon(), Severity::Success.icon());
        assert_ne!(Severity::Success.icon(), Severity::Error.icon());
    }
}
