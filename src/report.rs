//! Report service client and outcome classification for binary report responses.
//!
//! The service answers a prompt with raw artifact bytes tagged by content type,
//! or fails in one of two distinguishable ways: a clean application-level
//! rejection carrying a JSON body, or a transport-level/corrupted failure with
//! no parseable body. Both paths are folded into [`ReportFailure`] here so the
//! controller only ever sees one of three outcomes.

use std::io::Read;
use std::time::Duration;

/// Fixed route for report generation on the service.
pub const REPORT_ROUTE: &str = "/api/reportes/generar_reporte/";

/// Content type the service declares for spreadsheet artifacts.
pub const SPREADSHEET_MIME: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Ceiling on artifact size read into memory.
const MAX_ARTIFACT_BYTES: u64 = 64 * 1024 * 1024;

/// Binary report payload plus the content type the service declared for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Classified failure outcome, consumed once by the notification layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFailure {
    /// The service rejected the request with a JSON-encoded reason.
    Api { message: String },
    /// Anything whose body could not be read as the expected JSON shape.
    Opaque { message: String },
}

impl ReportFailure {
    /// User-facing message; `Api` messages are the server's words verbatim.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Api { message } | Self::Opaque { message } => message,
        }
    }
}

/// Capability consumed by the controller: one prompt in, one outcome out.
pub trait ReportApi: Send + Sync {
    fn fetch(&self, prompt: &str) -> Result<ReportArtifact, ReportFailure>;
}

/// Extension for a declared content type. Only the exact spreadsheet signature
/// maps to `xlsx`; every other declared type saves as `pdf`, even when it is
/// neither, so a content-type mismatch from the server surfaces as a wrong
/// extension rather than an error.
#[must_use]
pub fn artifact_extension(content_type: &str) -> &'static str {
    if mime_essence(content_type) == SPREADSHEET_MIME {
        "xlsx"
    } else {
        "pdf"
    }
}

/// Media type with parameters stripped, normalized for comparison.
fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Generic failure wording carrying the low-level description.
#[must_use]
pub fn opaque_message(detail: impl std::fmt::Display) -> String {
    format!("Error al generar el reporte: {detail}")
}

/// Two-tier classification of a failure response body: a JSON object with a
/// string `error` field is surfaced verbatim; anything else degrades to the
/// generic message with the HTTP status as the detail.
#[must_use]
pub fn classify_failure_body(status: u16, body: &str) -> ReportFailure {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
            return ReportFailure::Api {
                message: message.to_string(),
            };
        }
    }
    ReportFailure::Opaque {
        message: opaque_message(format_args!("HTTP {status}")),
    }
}

/// Blocking HTTP client for the report endpoint.
pub struct HttpReportClient {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpReportClient {
    #[must_use]
    pub fn new(server: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        let endpoint = format!("{}{}", server.trim_end_matches('/'), REPORT_ROUTE);
        Self { agent, endpoint }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReportApi for HttpReportClient {
    fn fetch(&self, prompt: &str) -> Result<ReportArtifact, ReportFailure> {
        let response = self
            .agent
            .post(&self.endpoint)
            .send_json(serde_json::json!({ "prompt": prompt }))
            .map_err(|err| match err {
                ureq::Error::Status(code, response) => {
                    let body = response.into_string().unwrap_or_default();
                    classify_failure_body(code, &body)
                }
                other => ReportFailure::Opaque {
                    message: opaque_message(other),
                },
            })?;

        let content_type = response.content_type().to_string();
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_ARTIFACT_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|err| ReportFailure::Opaque {
                message: opaque_message(err),
            })?;

        Ok(ReportArtifact {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn spreadsheet_signature_maps_to_xlsx() {
        assert_eq!(artifact_extension(SPREADSHEET_MIME), "xlsx");
    }

    #[test]
    fn signature_match_ignores_parameters_and_case() {
        assert_eq!(
            artifact_extension(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet; charset=binary"
            ),
            "xlsx"
        );
        assert_eq!(
            artifact_extension(
                "Application/VND.openxmlformats-officedocument.spreadsheetml.SHEET"
            ),
            "xlsx"
        );
    }

    #[test]
    fn everything_else_falls_back_to_pdf() {
        assert_eq!(artifact_extension("application/pdf"), "pdf");
        assert_eq!(artifact_extension("text/html"), "pdf");
        assert_eq!(artifact_extension("application/json"), "pdf");
        assert_eq!(artifact_extension(""), "pdf");
    }

    #[test]
    fn json_error_field_is_surfaced_verbatim() {
        let failure = classify_failure_body(404, r#"{"error":"No se encontraron datos."}"#);
        assert_eq!(
            failure,
            ReportFailure::Api {
                message: "No se encontraron datos.".to_string()
            }
        );
        assert_eq!(failure.message(), "No se encontraron datos.");
    }

    #[test]
    fn unparseable_body_degrades_to_generic_message() {
        let failure = classify_failure_body(500, "%PDF-1.4 garbled");
        match failure {
            ReportFailure::Opaque { message } => {
                assert!(message.starts_with("Error al generar el reporte:"));
                assert!(message.contains("HTTP 500"));
            }
            ReportFailure::Api { .. } => panic!("garbled body must not classify as Api"),
        }
    }

    #[test]
    fn json_without_string_error_field_is_opaque() {
        for body in [r#"{}"#, r#"{"detail":"x"}"#, r#"{"error":42}"#, r#"[1,2]"#] {
            match classify_failure_body(400, body) {
                ReportFailure::Opaque { .. } => {}
                ReportFailure::Api { .. } => panic!("body {body:?} must not classify as Api"),
            }
        }
    }

    #[test]
    fn endpoint_join_tolerates_trailing_slash() {
        let with = HttpReportClient::new("http://host:9/", Duration::from_secs(1));
        let without = HttpReportClient::new("http://host:9", Duration::from_secs(1));
        assert_eq!(with.endpoint(), without.endpoint());
        assert_eq!(with.endpoint(), "http://host:9/api/reportes/generar_reporte/");
    }

    proptest! {
        #[test]
        fn non_spreadsheet_types_always_save_as_pdf(ct in "[a-z]{1,12}/[a-z0-9.+-]{1,24}") {
            prop_assume!(ct != SPREADSHEET_MIME);
            prop_assert_eq!(artifact_extension(&ct), "pdf");
        }

        #[test]
        fn json_error_round_trips_any_message(message in "[a-zA-Záéíóúñ .,¡!¿?0-9-]{0,60}") {
            let body = serde_json::json!({ "error": message }).to_string();
            let failure = classify_failure_body(404, &body);
            prop_assert_eq!(failure.message(), message.as_str());
        }
    }
}
