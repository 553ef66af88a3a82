//! Doctor-report assembly that surfaces runtime capabilities and config issues.

use std::time::Duration;
use std::{env, fmt::Display};

use crate::audio;
use crate::config::AppConfig;
use crate::log_file_path;
use crate::report::{HttpReportClient, REPORT_ROUTE};

/// Structured text report builder used by `--doctor`.
pub struct DoctorReport {
    lines: Vec<String>,
}

impl DoctorReport {
    /// Create a new report with the provided title line.
    #[must_use]
    pub fn new(title: &str) -> Self {
        Self {
            lines: vec![title.to_string()],
        }
    }

    /// Append a section heading preceded by a blank line.
    pub fn section(&mut self, title: &str) {
        self.lines.push(String::new());
        self.lines.push(format!("{title}:"));
    }

    /// Append a `key: value` line in doctor output format.
    pub fn push_kv(&mut self, key: &str, value: impl Display) {
        self.lines.push(format!("  {key}: {value}"));
    }

    /// Append a raw line without key/value formatting.
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Render the full report as newline-separated text.
    #[must_use]
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// Build the capability report for the current configuration.
#[must_use]
pub fn build_doctor_report(config: &AppConfig) -> DoctorReport {
    let mut report = DoctorReport::new("Reporterm Doctor");
    report.push_kv("version", env!("CARGO_PKG_VERSION"));
    report.push_kv("os", format!("{}/{}", env::consts::OS, env::consts::ARCH));

    report.section("Config");
    match config.validate() {
        Ok(()) => report.push_kv("validation", "ok"),
        Err(err) => report.push_kv("validation", format!("error: {err}")),
    }
    let logs_enabled = (config.logs || config.log_timings) && !config.no_logs;
    report.push_kv("logs", if logs_enabled { "enabled" } else { "disabled" });
    report.push_kv("log_file", log_file_path().display());

    report.section("Service");
    let client = HttpReportClient::new(
        &config.resolved_server(),
        Duration::from_secs(config.timeout_secs),
    );
    report.push_kv("server", config.resolved_server());
    report.push_kv("route", REPORT_ROUTE);
    report.push_kv("endpoint", client.endpoint());
    report.push_kv("timeout_secs", config.timeout_secs);
    report.push_kv("output_dir", config.resolved_output_dir().display());

    report.section("Voice");
    report.push_kv("lang", config.resolved_lang());
    match config.model.as_ref() {
        Some(model) => {
            report.push_kv("model", model.display());
            report.push_kv("model_present", model.exists());
        }
        None => report.push_kv("model", "unset"),
    }
    report.push_kv("vad_threshold_db", config.vad_threshold_db);
    report.push_kv(
        "input_device",
        config.input_device.as_deref().unwrap_or("default"),
    );

    report.section("Audio");
    match audio::list_input_devices() {
        Ok(devices) => {
            report.push_kv("device_count", devices.len());
            if devices.is_empty() {
                report.push_kv("devices", "none");
            } else {
                report.push_line("  devices:");
                for name in devices {
                    report.push_line(format!("    - {name}"));
                }
            }
        }
        Err(err) => report.push_kv("devices", format!("error: {err}")),
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_config(args: &[&str]) -> AppConfig {
        AppConfig::parse_from(std::iter::once("doctor-test").chain(args.iter().copied()))
    }

    #[test]
    fn report_builder_formats_sections_and_pairs() {
        let mut report = DoctorReport::new("Title");
        report.section("Alpha");
        report.push_kv("key", "value");
        report.push_line("raw line");
        assert_eq!(report.render(), "Title\n\nAlpha:\n  key: value\nraw line");
    }

    #[test]
    fn doctor_report_names_the_endpoint_and_version() {
        let config = test_config(&["--server", "http://example.test:9"]);
        let rendered = build_doctor_report(&config).render();
        assert!(rendered.contains("Reporterm Doctor"));
        assert!(rendered.contains(env!("CARGO_PKG_VERSION")));
        assert!(rendered.contains("http://example.test:9/api/reportes/generar_reporte/"));
        assert!(rendered.contains("validation: ok"));
    }

    #[test]
    fn doctor_report_reflects_model_configuration() {
        let unset = build_doctor_report(&test_config(&[])).render();
        assert!(unset.contains("model: unset"));

        let missing =
            build_doctor_report(&test_config(&["--model", "/no/such/model.bin"])).render();
        assert!(missing.contains("model: /no/such/model.bin"));
        assert!(missing.contains("model_present: false"));
    }

    #[test]
    fn doctor_report_flags_invalid_configuration() {
        let config = test_config(&["--listen", "reporte de ventas"]);
        let rendered = build_doctor_report(&config).render();
        assert!(rendered.contains("validation: error:"));
    }
}
