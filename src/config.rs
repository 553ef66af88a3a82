//! CLI flag schema and persistent user defaults so startup behavior is explicit.

use anyhow::{bail, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::log_debug;

/// Report service used when neither the CLI nor the user config names one.
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

/// Recognition locale for the service; the backend parses Spanish prompts.
pub const DEFAULT_LANG: &str = "es";

pub(crate) const MIN_SILENCE_MS: u64 = 200;
pub(crate) const MAX_SILENCE_MS: u64 = 5_000;
const MIN_THRESHOLD_DB: f32 = -90.0;
const MAX_THRESHOLD_DB: f32 = -5.0;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "reporterm",
    about = "Voice-first client for dynamic report generation",
    author,
    version
)]
pub struct AppConfig {
    /// Natural-language report request; submits once and exits
    pub prompt: Option<String>,

    /// Base URL of the report service
    #[arg(long = "server", env = "REPORTERM_SERVER")]
    pub server: Option<String>,

    /// Directory where downloaded reports are saved (default: downloads directory)
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Whisper model path used for voice capture
    #[arg(long = "model", env = "REPORTERM_MODEL")]
    pub model: Option<PathBuf>,

    /// Recognition language passed to Whisper
    #[arg(long = "lang")]
    pub lang: Option<String>,

    /// Audio input device name (default: system default input)
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Speech gate threshold in dBFS; quieter frames count as silence
    #[arg(
        long = "vad-threshold-db",
        default_value_t = -40.0,
        allow_hyphen_values = true,
        value_parser = parse_threshold_db
    )]
    pub vad_threshold_db: f32,

    /// Trailing silence that ends an utterance (ms)
    #[arg(long = "silence-ms", default_value_t = 900, value_parser = parse_silence_ms)]
    pub silence_ms: u64,

    /// Minimum utterance length before silence can end it (ms)
    #[arg(long = "min-record-ms", default_value_t = 600)]
    pub min_record_ms: u64,

    /// Hard cap on a single capture (seconds)
    #[arg(long = "max-record-secs", default_value_t = 30)]
    pub max_record_secs: u64,

    /// HTTP timeout for a report request (seconds)
    #[arg(long = "timeout-secs", default_value_t = 120)]
    pub timeout_secs: u64,

    /// Capture one utterance, submit it, and exit
    #[arg(long = "listen", default_value_t = false)]
    pub listen: bool,

    /// Print a capability report and exit
    #[arg(long = "doctor", default_value_t = false)]
    pub doctor: bool,

    /// List audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Enable the debug log file
    #[arg(long = "logs", default_value_t = false)]
    pub logs: bool,

    /// Include prompt/transcript text in the debug log
    #[arg(long = "log-content", default_value_t = false)]
    pub log_content: bool,

    /// Log capture and submission timings (implies --logs)
    #[arg(long = "log-timings", default_value_t = false)]
    pub log_timings: bool,

    /// Disable all log files, overriding --logs
    #[arg(long = "no-logs", default_value_t = false)]
    pub no_logs: bool,

    /// Disable colored output
    #[arg(long = "no-color", default_value_t = false)]
    pub no_color: bool,
}

impl AppConfig {
    /// Fill unset options from the persistent user config. CLI values win.
    pub fn apply_user_config(&mut self, user: &UserConfig) {
        if self.server.is_none() {
            self.server = user.server.clone();
        }
        if self.output_dir.is_none() {
            self.output_dir = user.output_dir.clone();
        }
        if self.model.is_none() {
            self.model = user.model.clone();
        }
        if self.lang.is_none() {
            self.lang = user.lang.clone();
        }
    }

    #[must_use]
    pub fn resolved_server(&self) -> String {
        self.server
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SERVER)
            .to_string()
    }

    #[must_use]
    pub fn resolved_lang(&self) -> &str {
        self.lang
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_LANG)
    }

    /// Destination for saved reports: explicit dir, else the user's download
    /// directory, else the working directory.
    #[must_use]
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Cross-field checks that clap value parsers cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            bail!("--timeout-secs must be at least 1");
        }
        if !(5..=120).contains(&self.max_record_secs) {
            bail!("--max-record-secs must be between 5 and 120");
        }
        if self.min_record_ms >= self.max_record_secs * 1000 {
            bail!("--min-record-ms must be shorter than --max-record-secs");
        }
        if self.listen && self.prompt.is_some() {
            bail!("--listen cannot be combined with a prompt argument");
        }
        Ok(())
    }
}

fn parse_threshold_db(raw: &str) -> Result<f32, String> {
    let value: f32 = raw
        .parse()
        .map_err(|_| format!("invalid threshold '{raw}'"))?;
    if !(MIN_THRESHOLD_DB..=MAX_THRESHOLD_DB).contains(&value) {
        return Err(format!(
            "threshold must be between {MIN_THRESHOLD_DB} and {MAX_THRESHOLD_DB} dBFS"
        ));
    }
    Ok(value)
}

fn parse_silence_ms(raw: &str) -> Result<u64, String> {
    let value: u64 = raw
        .parse()
        .map_err(|_| format!("invalid silence duration '{raw}'"))?;
    if !(MIN_SILENCE_MS..=MAX_SILENCE_MS).contains(&value) {
        return Err(format!(
            "silence duration must be between {MIN_SILENCE_MS} and {MAX_SILENCE_MS} ms"
        ));
    }
    Ok(value)
}

/// Defaults stored in the user config file, all optional.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UserConfig {
    pub server: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub lang: Option<String>,
}

#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reporterm").join("config.toml"))
}

/// Load the persistent user config. A missing or malformed file degrades to
/// empty defaults; startup never fails on it.
#[must_use]
pub fn load_user_config() -> UserConfig {
    let Some(path) = user_config_path() else {
        return UserConfig::default();
    };
    let Ok(raw) = fs::read_to_string(&path) else {
        return UserConfig::default();
    };
    match toml::from_str(&raw) {
        Ok(user) => user,
        Err(err) => {
            log_debug(&format!(
                "ignoring malformed user config {}: {err}",
                path.display()
            ));
            UserConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        AppConfig::parse_from(std::iter::once("reporterm").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_are_safe() {
        let cfg = parse(&[]);
        assert!(cfg.prompt.is_none());
        assert!((cfg.vad_threshold_db - -40.0).abs() < f32::EPSILON);
        assert_eq!(cfg.silence_ms, 900);
        assert_eq!(cfg.max_record_secs, 30);
        assert_eq!(cfg.timeout_secs, 120);
        assert!(!cfg.listen);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn threshold_parser_rejects_out_of_range_values() {
        assert!(AppConfig::try_parse_from(["reporterm", "--vad-threshold-db", "-100"]).is_err());
        assert!(AppConfig::try_parse_from(["reporterm", "--vad-threshold-db", "0"]).is_err());
        assert!(AppConfig::try_parse_from(["reporterm", "--vad-threshold-db", "-55.5"]).is_ok());
    }

    #[test]
    fn silence_parser_enforces_bounds() {
        assert!(AppConfig::try_parse_from(["reporterm", "--silence-ms", "100"]).is_err());
        assert!(AppConfig::try_parse_from(["reporterm", "--silence-ms", "6000"]).is_err());
        assert!(AppConfig::try_parse_from(["reporterm", "--silence-ms", "500"]).is_ok());
    }

    #[test]
    fn validate_rejects_inconsistent_capture_window() {
        let mut cfg = parse(&[]);
        cfg.min_record_ms = 40_000;
        cfg.max_record_secs = 30;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_listen_with_prompt() {
        let cfg = parse(&["--listen", "reporte de ventas"]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn user_config_fills_only_unset_fields() {
        let mut cfg = parse(&["--server", "http://cli.example"]);
        let user = UserConfig {
            server: Some("http://file.example".to_string()),
            output_dir: Some(PathBuf::from("/tmp/reports")),
            model: Some(PathBuf::from("/models/ggml-small.bin")),
            lang: None,
        };
        cfg.apply_user_config(&user);
        assert_eq!(cfg.server.as_deref(), Some("http://cli.example"));
        assert_eq!(cfg.output_dir.as_deref(), Some(std::path::Path::new("/tmp/reports")));
        assert_eq!(
            cfg.model.as_deref(),
            Some(std::path::Path::new("/models/ggml-small.bin"))
        );
    }

    #[test]
    fn resolved_accessors_fall_back_to_defaults() {
        let cfg = parse(&[]);
        assert_eq!(cfg.resolved_server(), DEFAULT_SERVER);
        assert_eq!(cfg.resolved_lang(), DEFAULT_LANG);

        let cfg = parse(&["--server", "  ", "--lang", ""]);
        assert_eq!(cfg.resolved_server(), DEFAULT_SERVER);
        assert_eq!(cfg.resolved_lang(), DEFAULT_LANG);
    }

    #[test]
    fn resolved_output_dir_prefers_explicit_flag() {
        let cfg = parse(&["--output-dir", "/tmp/salida"]);
        assert_eq!(cfg.resolved_output_dir(), PathBuf::from("/tmp/salida"));
    }
}
