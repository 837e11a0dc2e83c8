use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use zip::write::FileOptions;

use crate::app::error::AppError;
use crate::app::models::InstallDiagnostics;

#[derive(Debug, Serialize)]
struct BundleManifest {
    tool_version: &'static str,
    os: &'static str,
    arch: &'static str,
    timestamp_utc: String,
    trace_id: String,
    artifact: String,
}

pub fn sanitize_filename_component(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Writes the install-failure record as a zip bundle the operator can pick up
/// from the report directory: a manifest plus the three captured text blobs.
pub fn export_install_failure_bundle(
    output_dir: &Path,
    artifact_name: &str,
    diagnostics: &InstallDiagnostics,
    trace_id: &str,
) -> Result<PathBuf, AppError> {
    fs::create_dir_all(output_dir).map_err(|err| {
        AppError::system(format!("Failed to create output dir: {err}"), trace_id)
    })?;

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let safe_name = sanitize_filename_component(artifact_name);
    let bundle_path = output_dir.join(format!("install_failure_{safe_name}_{timestamp}.zip"));

    let manifest = BundleManifest {
        tool_version: env!("CARGO_PKG_VERSION"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        timestamp_utc: Utc::now().to_rfc3339(),
        trace_id: trace_id.to_string(),
        artifact: artifact_name.to_string(),
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest).map_err(|err| {
        AppError::system(format!("Failed to serialize bundle manifest: {err}"), trace_id)
    })?;

    let file = fs::File::create(&bundle_path)
        .map_err(|err| AppError::system(format!("Failed to create bundle: {err}"), trace_id))?;
    let mut zip = zip::ZipWriter::new(file);
    let entries: [(&str, &[u8]); 4] = [
        ("manifest.json", &manifest_json),
        ("install_stdout.txt", diagnostics.install_stdout.as_bytes()),
        ("install_stderr.txt", diagnostics.install_stderr.as_bytes()),
        ("logcat_snapshot.txt", diagnostics.log_snapshot.as_bytes()),
    ];
    for (name, body) in entries {
        zip.start_file(name, FileOptions::<()>::default())
            .map_err(|err| {
                AppError::system(format!("Failed to write bundle entry {name}: {err}"), trace_id)
            })?;
        zip.write_all(body).map_err(|err| {
            AppError::system(format!("Failed to write bundle entry {name}: {err}"), trace_id)
        })?;
    }
    zip.finish()
        .map_err(|err| AppError::system(format!("Failed to finalize bundle: {err}"), trace_id))?;

    Ok(bundle_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn sanitizes_awkward_artifact_names() {
        assert_eq!(
            sanitize_filename_component("weird name/../x.apk"),
            "weird_name_.._x.apk"
        );
    }

    #[test]
    fn bundle_contains_all_captured_streams() {
        let dir = TempDir::new().expect("tmp");
        let diagnostics = InstallDiagnostics {
            install_stdout: "\tpkg: /data/local/tmp/Sample.apk\nFailure [INSTALL_FAILED_OLDER_SDK]\n"
                .to_string(),
            install_stderr: "".to_string(),
            log_snapshot: "W/PackageManager(59): requires newer sdk\n".to_string(),
        };

        let bundle = export_install_failure_bundle(
            dir.path(),
            "Sample.apk",
            &diagnostics,
            "trace-bundle",
        )
        .expect("bundle");

        let file = fs::File::open(&bundle).expect("open bundle");
        let mut archive = zip::ZipArchive::new(file).expect("zip");

        let mut manifest = String::new();
        archive
            .by_name("manifest.json")
            .expect("manifest entry")
            .read_to_string(&mut manifest)
            .expect("read manifest");
        assert!(manifest.contains("\"trace_id\": \"trace-bundle\""));
        assert!(manifest.contains("Sample.apk"));

        let mut stdout = String::new();
        archive
            .by_name("install_stdout.txt")
            .expect("stdout entry")
            .read_to_string(&mut stdout)
            .expect("read stdout");
        assert!(stdout.contains("INSTALL_FAILED_OLDER_SDK"));

        let mut snapshot = String::new();
        archive
            .by_name("logcat_snapshot.txt")
            .expect("snapshot entry")
            .read_to_string(&mut snapshot)
            .expect("read snapshot");
        assert!(snapshot.contains("requires newer sdk"));
    }
}
