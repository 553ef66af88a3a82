//! Artifact persistence with scoped staging so partial downloads never survive.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::log_debug;
use crate::report::{artifact_extension, ReportArtifact};

/// Fixed stem for saved reports; the extension follows the declared type.
pub const ARTIFACT_STEM: &str = "reporte_dinamico";

/// Filename for an artifact with the given declared content type.
#[must_use]
pub fn artifact_filename(content_type: &str) -> String {
    format!("{ARTIFACT_STEM}.{}", artifact_extension(content_type))
}

/// Removes the staging file unless the save was promoted.
struct StageGuard {
    path: PathBuf,
    armed: bool,
}

impl StageGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = fs::remove_file(&self.path) {
                log_debug(&format!(
                    "failed to remove stage file {}: {err}",
                    self.path.display()
                ));
            }
        }
    }
}

/// Persist an artifact into `dir` as `reporte_dinamico.<ext>`.
///
/// The payload is staged to a `.part` sibling and promoted by rename; the
/// stage file is released unconditionally when promotion does not complete.
pub fn save_artifact(artifact: &ReportArtifact, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("no se pudo crear el directorio {}", dir.display()))?;

    let filename = artifact_filename(&artifact.content_type);
    let final_path = dir.join(&filename);
    let stage_path = dir.join(format!("{filename}.part"));

    let mut stage = StageGuard::new(stage_path.clone());
    fs::write(&stage_path, &artifact.bytes)
        .with_context(|| format!("no se pudo escribir {}", stage_path.display()))?;
    fs::rename(&stage_path, &final_path)
        .with_context(|| format!("no se pudo guardar {}", final_path.display()))?;
    stage.disarm();

    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SPREADSHEET_MIME;

    fn artifact(content_type: &str, bytes: &[u8]) -> ReportArtifact {
        ReportArtifact {
            bytes: bytes.to_vec(),
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn filename_follows_content_type_classification() {
        assert_eq!(artifact_filename(SPREADSHEET_MIME), "reporte_dinamico.xlsx");
        assert_eq!(artifact_filename("application/pdf"), "reporte_dinamico.pdf");
        assert_eq!(artifact_filename("text/plain"), "reporte_dinamico.pdf");
    }

    #[test]
    fn save_writes_bytes_and_leaves_no_stage_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let payload = artifact(SPREADSHEET_MIME, b"PK\x03\x04contenido");

        let path = save_artifact(&payload, dir.path()).expect("save should succeed");
        assert_eq!(path, dir.path().join("reporte_dinamico.xlsx"));
        assert_eq!(fs::read(&path).expect("read saved file"), payload.bytes);
        assert!(
            !dir.path().join("reporte_dinamico.xlsx.part").exists(),
            "stage file must be promoted away"
        );
    }

    #[test]
    fn save_creates_missing_output_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("salidas").join("2025");
        let payload = artifact("application/pdf", b"%PDF-1.7");

        let path = save_artifact(&payload, &nested).expect("save should succeed");
        assert!(path.starts_with(&nested));
        assert!(path.exists());
    }

    #[test]
    fn overwrites_a_previous_report_with_the_same_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = artifact("application/pdf", b"viejo");
        let second = artifact("application/pdf", b"nuevo");

        save_artifact(&first, dir.path()).expect("first save");
        let path = save_artifact(&second, dir.path()).expect("second save");
        assert_eq!(fs::read(path).expect("read"), b"nuevo");
    }

    #[test]
    fn failed_promotion_releases_the_stage_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Occupy the final path with a directory so the rename cannot land.
        fs::create_dir(dir.path().join("reporte_dinamico.pdf")).expect("blocker dir");
        let payload = artifact("application/pdf", b"%PDF-1.7");

        let result = save_artifact(&payload, dir.path());
        assert!(result.is_err());
        assert!(
            !dir.path().join("reporte_dinamico.pdf.part").exists(),
            "stage file must be released on failure"
        );
    }
}
