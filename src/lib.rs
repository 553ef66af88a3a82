//! Shared Reporterm library exports so the binary and tests agree on core behavior.

pub mod artifact;
pub mod audio;
pub mod config;
pub mod controller;
pub mod doctor;
mod logging;
pub mod notify;
pub mod report;
pub mod stt;
mod telemetry;
pub mod voice;

pub use logging::{init_logging, log_debug, log_debug_content, log_file_path};
pub use telemetry::init_tracing;
pub use voice::{ListeningState, VoiceCaptureSession, VoiceSessionMessage};
