use std::sync::Arc;

use tracing::{info, warn};

use crate::app::apk::Apk;
use crate::app::device::commands::DeviceCommands;
use crate::app::device::parse::has_attached_device;
use crate::app::device::runner::CommandOutput;
use crate::app::error::AppError;
use crate::app::models::InstallDiagnostics;
use crate::app::watcher::{LogcatWatcher, WatchVerdict};

/// Install output marker that signals a failed install regardless of the
/// command's exit code.
const INSTALL_FAILURE_MARKER: &str = "Failure";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionVerdict {
    Passed,
    InstallFailed { diagnostics: InstallDiagnostics },
    RuntimeError { lines: String },
    /// The watcher could not observe the launched process at all.
    Undetermined,
}

/// Runs one APK through the device: verify a device is attached, clear the
/// log, install, and when the APK is launchable, start it and watch the log.
pub struct DeviceSession {
    device: Arc<dyn DeviceCommands>,
    watch_budget_secs: i64,
    trace_id: String,
}

impl DeviceSession {
    pub fn new(
        device: Arc<dyn DeviceCommands>,
        watch_budget_secs: i64,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            device,
            watch_budget_secs,
            trace_id: trace_id.into(),
        }
    }

    pub fn run(&self, apk: &Apk) -> Result<SessionVerdict, AppError> {
        info!(
            trace_id = %self.trace_id,
            apk = %apk.display_name(),
            "running APK on device"
        );
        self.verify_device()?;
        self.device.clear_log()?;
        let install_output = self.install(apk)?;
        if install_output.stdout.contains(INSTALL_FAILURE_MARKER) {
            return Ok(SessionVerdict::InstallFailed {
                diagnostics: self.capture_install_failure(&install_output),
            });
        }
        if apk.main_activity().is_empty() {
            info!(
                trace_id = %self.trace_id,
                "no launchable activity in APK, skipping start after installation"
            );
            return Ok(SessionVerdict::Passed);
        }
        self.launch_and_watch(apk)
    }

    /// Setup check, once per session: an empty or header-only device listing
    /// is a harness problem, not a test failure.
    fn verify_device(&self) -> Result<(), AppError> {
        let listing = self.device.list_devices()?;
        if !has_attached_device(&listing) {
            return Err(AppError::dependency(
                "no attached device or emulator found",
                &self.trace_id,
            ));
        }
        Ok(())
    }

    fn install(&self, apk: &Apk) -> Result<CommandOutput, AppError> {
        info!(trace_id = %self.trace_id, package = %apk.package(), "uninstalling old APK, if there");
        self.device.uninstall(apk.package());
        info!(trace_id = %self.trace_id, "installing APK");
        self.device.install(apk.path())
    }

    /// The log snapshot has to be grabbed immediately, before anything clears
    /// the buffer again. The installer's process id differs from the
    /// package manager's, so no pid filtering is possible here; the whole
    /// snapshot goes into the record.
    fn capture_install_failure(&self, install_output: &CommandOutput) -> InstallDiagnostics {
        let log_snapshot = match self.device.buffered_log() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    trace_id = %self.trace_id,
                    error = %err,
                    "could not snapshot device log after install failure"
                );
                String::new()
            }
        };
        InstallDiagnostics {
            install_stdout: install_output.stdout.clone(),
            install_stderr: install_output.stderr.clone(),
            log_snapshot,
        }
    }

    fn launch_and_watch(&self, apk: &Apk) -> Result<SessionVerdict, AppError> {
        info!(trace_id = %self.trace_id, "starting separate log watcher thread for APK");
        let handle = LogcatWatcher::new(
            Arc::clone(&self.device),
            apk.launch_target(),
            self.watch_budget_secs,
            self.trace_id.clone(),
        )
        .spawn();

        info!(
            trace_id = %self.trace_id,
            activity = %apk.main_activity(),
            "starting main activity in APK"
        );
        if let Err(err) = self.device.launch(apk.package(), apk.main_activity()) {
            // The watcher would spin through its budgets watching a launch
            // that never happened; stop it, then surface the launch error.
            warn!(
                trace_id = %self.trace_id,
                error = %err,
                "launch command failed, stopping log watcher"
            );
            let _ = handle.stop();
            return Err(err);
        }

        info!(trace_id = %self.trace_id, "waiting for log watcher thread to terminate");
        let verdict = handle.join();
        info!(trace_id = %self.trace_id, "log watcher thread for APK terminated");
        Ok(match verdict {
            WatchVerdict::ErrorFound { lines } => SessionVerdict::RuntimeError { lines },
            WatchVerdict::Clean => SessionVerdict::Passed,
            WatchVerdict::Undetermined => SessionVerdict::Undetermined,
        })
    }
}
