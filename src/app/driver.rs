use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::app::apk::Apk;
use crate::app::config::RepackageSettings;
use crate::app::device::commands::DeviceCommands;
use crate::app::device::runner::run_command;
use crate::app::diagnostics::export_install_failure_bundle;
use crate::app::error::AppError;
use crate::app::known_failures::KnownFailures;
use crate::app::logging::SUMMARY_TARGET;
use crate::app::models::{ArtifactReport, RunSummary, TestOutcome, TestStage};
use crate::app::session::{DeviceSession, SessionVerdict};

/// The rebuild seam. The transformation pipeline is external; the driver only
/// needs a file it can install.
pub trait Repackager: Send + Sync {
    fn repackage(&self, apk: &Apk) -> Result<PathBuf, AppError>;
}

/// Runs the operator-configured rebuild command, substituting `{input}` and
/// `{output}` tokens. The command must leave a signed, aligned APK at
/// `{output}`.
#[derive(Debug)]
pub struct CommandRepackager {
    template: Vec<String>,
    output_dir: PathBuf,
    timeout: Duration,
    trace_id: String,
}

impl CommandRepackager {
    pub fn from_settings(
        settings: &RepackageSettings,
        trace_id: impl Into<String>,
    ) -> Result<Self, AppError> {
        let trace_id = trace_id.into();
        let template: Vec<String> = settings
            .command
            .split_whitespace()
            .map(|token| token.to_string())
            .collect();
        if template.is_empty() {
            return Err(AppError::validation(
                "repackage.command is not configured; set it or pass --original-only",
                trace_id,
            ));
        }
        let output_dir = if settings.output_dir.trim().is_empty() {
            std::env::temp_dir().join("apk_regress_rebuilt")
        } else {
            PathBuf::from(settings.output_dir.trim())
        };
        Ok(Self {
            template,
            output_dir,
            timeout: Duration::from_secs(settings.timeout_secs),
            trace_id,
        })
    }
}

fn render_command(template: &[String], input: &str, output: &str) -> Vec<String> {
    template
        .iter()
        .map(|token| token.replace("{input}", input).replace("{output}", output))
        .collect()
}

impl Repackager for CommandRepackager {
    fn repackage(&self, apk: &Apk) -> Result<PathBuf, AppError> {
        fs::create_dir_all(&self.output_dir).map_err(|err| {
            AppError::system(format!("Failed to create rebuild dir: {err}"), &self.trace_id)
        })?;
        let output_path = self.output_dir.join(apk.display_name());
        if output_path.exists() {
            // Stale output from an earlier run must not masquerade as a
            // fresh rebuild.
            fs::remove_file(&output_path).map_err(|err| {
                AppError::system(
                    format!("Failed to delete old rebuilt APK: {err}"),
                    &self.trace_id,
                )
            })?;
        }

        let argv = render_command(
            &self.template,
            &apk.path().to_string_lossy(),
            &output_path.to_string_lossy(),
        );
        info!(trace_id = %self.trace_id, command = ?argv, "rebuilding APK");
        let result = run_command(&argv[0], &argv[1..], self.timeout, &self.trace_id)?;
        if !result.succeeded() {
            return Err(AppError::system(
                format!(
                    "repackage command exited with {:?}: {}",
                    result.exit_code,
                    result.stderr.trim()
                ),
                &self.trace_id,
            ));
        }
        if !output_path.exists() {
            return Err(AppError::system(
                format!(
                    "repackage command produced no output at {}",
                    output_path.display()
                ),
                &self.trace_id,
            ));
        }
        Ok(output_path)
    }
}

pub fn collect_apks_from_dir(dir: &Path, trace_id: &str) -> Result<Vec<PathBuf>, AppError> {
    let entries = fs::read_dir(dir).map_err(|err| {
        AppError::system(
            format!("Failed to read APK directory {}: {err}", dir.display()),
            trace_id,
        )
    })?;
    let mut apks: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("apk"))
                .unwrap_or(false)
        })
        .collect();
    apks.sort();
    Ok(apks)
}

/// Tests each APK twice, original then rebuilt, through one device session
/// per pass. A fatal setup failure aborts the run; anything else is contained
/// per artifact.
pub struct TestDriver<'a> {
    device: Arc<dyn DeviceCommands>,
    repackager: Option<&'a dyn Repackager>,
    known_failures: &'a KnownFailures,
    watch_budget_secs: i64,
    report_dir: PathBuf,
    trace_id: String,
}

impl<'a> TestDriver<'a> {
    pub fn new(
        device: Arc<dyn DeviceCommands>,
        repackager: Option<&'a dyn Repackager>,
        known_failures: &'a KnownFailures,
        watch_budget_secs: i64,
        report_dir: PathBuf,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            device,
            repackager,
            known_failures,
            watch_budget_secs,
            report_dir,
            trace_id: trace_id.into(),
        }
    }

    pub fn run(&self, apk_paths: &[PathBuf]) -> Result<RunSummary, AppError> {
        info!(trace_id = %self.trace_id, "testing {} APK(s)", apk_paths.len());
        let mut reports = Vec::new();
        for (index, path) in apk_paths.iter().enumerate() {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            if self.known_failures.contains(&name) {
                info!(
                    target: SUMMARY_TARGET,
                    trace_id = %self.trace_id,
                    apk = %name,
                    "skipping APK due to known failures"
                );
                reports.push(self.report(&name, path, TestOutcome::Skipped, None, None, None));
                continue;
            }
            info!(
                trace_id = %self.trace_id,
                "testing APK {} of {}: {}",
                index + 1,
                apk_paths.len(),
                path.display()
            );
            let report = match self.test_artifact(path, &name) {
                Ok(report) => report,
                Err(err) if err.is_setup_failure() => return Err(err),
                Err(err) => {
                    warn!(
                        trace_id = %self.trace_id,
                        error = %err,
                        "error while testing APK"
                    );
                    self.report(
                        &name,
                        path,
                        TestOutcome::Inconclusive,
                        None,
                        Some(err.to_string()),
                        None,
                    )
                }
            };
            info!(
                target: SUMMARY_TARGET,
                trace_id = %self.trace_id,
                apk = %name,
                verdict = report.outcome.label(),
                stage = report.stage.map(|stage| stage.label()).unwrap_or("-"),
                "artifact verdict"
            );
            reports.push(report);
        }
        Ok(RunSummary::from_reports(self.trace_id.clone(), reports))
    }

    fn test_artifact(&self, path: &Path, name: &str) -> Result<ArtifactReport, AppError> {
        let session = DeviceSession::new(
            Arc::clone(&self.device),
            self.watch_budget_secs,
            self.trace_id.clone(),
        );
        info!(trace_id = %self.trace_id, "testing part 1/2: original APK");
        let original = Apk::from_path(path.to_path_buf(), self.device.as_ref(), &self.trace_id)?;
        if let Some(report) = self.run_stage(&session, &original, name, TestStage::Original)? {
            return Ok(report);
        }
        let Some(repackager) = self.repackager else {
            return Ok(self.report(
                name,
                path,
                TestOutcome::Passed,
                Some(TestStage::Original),
                None,
                None,
            ));
        };
        info!(trace_id = %self.trace_id, "testing part 2/2: repackaged APK");
        let rebuilt_path = repackager.repackage(&original)?;
        let rebuilt = original.with_path(rebuilt_path);
        if let Some(report) = self.run_stage(&session, &rebuilt, name, TestStage::Repackaged)? {
            return Ok(report);
        }
        Ok(self.report(
            name,
            path,
            TestOutcome::Passed,
            Some(TestStage::Repackaged),
            None,
            None,
        ))
    }

    /// Runs one install/launch pass. `None` means the pass succeeded and
    /// testing continues; a report ends the artifact.
    fn run_stage(
        &self,
        session: &DeviceSession,
        apk: &Apk,
        name: &str,
        stage: TestStage,
    ) -> Result<Option<ArtifactReport>, AppError> {
        match session.run(apk)? {
            SessionVerdict::Passed => Ok(None),
            SessionVerdict::InstallFailed { diagnostics } => {
                error!(
                    target: SUMMARY_TARGET,
                    trace_id = %self.trace_id,
                    apk = %name,
                    stage = stage.label(),
                    "installation of APK failed. output from install command was '{}', error output was '{}'. log output was '{}'",
                    diagnostics.install_stdout,
                    diagnostics.install_stderr,
                    diagnostics.log_snapshot
                );
                let bundle = match export_install_failure_bundle(
                    &self.report_dir,
                    name,
                    &diagnostics,
                    &self.trace_id,
                ) {
                    Ok(path) => Some(path.to_string_lossy().to_string()),
                    Err(err) => {
                        warn!(
                            trace_id = %self.trace_id,
                            error = %err,
                            "could not export install-failure bundle"
                        );
                        None
                    }
                };
                Ok(Some(self.report(
                    name,
                    apk.path(),
                    TestOutcome::Failed,
                    Some(stage),
                    Some("install failure".to_string()),
                    bundle,
                )))
            }
            SessionVerdict::RuntimeError { lines } => {
                error!(
                    target: SUMMARY_TARGET,
                    trace_id = %self.trace_id,
                    apk = %name,
                    stage = stage.label(),
                    "error log lines from launched process:\n{lines}"
                );
                Ok(Some(self.report(
                    name,
                    apk.path(),
                    TestOutcome::Failed,
                    Some(stage),
                    Some(lines),
                    None,
                )))
            }
            SessionVerdict::Undetermined => Ok(Some(self.report(
                name,
                apk.path(),
                TestOutcome::Inconclusive,
                Some(stage),
                Some("log watcher could not observe the launched process".to_string()),
                None,
            ))),
        }
    }

    fn report(
        &self,
        name: &str,
        path: &Path,
        outcome: TestOutcome,
        stage: Option<TestStage>,
        detail: Option<String>,
        diagnostics_bundle: Option<String>,
    ) -> ArtifactReport {
        ArtifactReport {
            name: name.to_string(),
            path: path.to_string_lossy().to_string(),
            outcome,
            stage,
            detail,
            diagnostics_bundle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn renders_command_template_tokens() {
        let template: Vec<String> = ["./rebuild.sh", "--in", "{input}", "--out", "{output}"]
            .iter()
            .map(|token| token.to_string())
            .collect();
        let argv = render_command(&template, "/apks/a.apk", "/out/a.apk");
        assert_eq!(
            argv,
            vec!["./rebuild.sh", "--in", "/apks/a.apk", "--out", "/out/a.apk"]
        );
    }

    #[test]
    fn empty_repackage_command_is_rejected() {
        let settings = RepackageSettings {
            command: "   ".to_string(),
            output_dir: String::new(),
            timeout_secs: 60,
        };
        let err = CommandRepackager::from_settings(&settings, "trace-rp")
            .expect_err("expected validation error");
        assert_eq!(err.code, "ERR_VALIDATION");
    }

    #[test]
    fn collects_only_apk_files_sorted() {
        let dir = TempDir::new().expect("tmp");
        for name in ["b.apk", "a.apk", "notes.txt", "c.APK"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        let apks = collect_apks_from_dir(dir.path(), "trace-dir").expect("collect");
        let names: Vec<String> = apks
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.apk", "b.apk", "c.APK"]);
    }

    #[test]
    fn missing_apk_dir_is_a_system_error() {
        let err = collect_apks_from_dir(Path::new("/does/not/exist"), "trace-dir")
            .expect_err("expected error");
        assert_eq!(err.code, "ERR_SYSTEM");
    }
}
