use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::app::device::locator::{resolve_aapt_program, resolve_adb_program};
use crate::app::device::parse::parse_epoch_seconds;
use crate::app::device::runner::{run_command, CommandOutput};
use crate::app::error::AppError;

/// The device boundary the harness talks through. Every operation is a
/// synchronous command against one attached device; implementations return
/// the captured text output the core interprets.
pub trait DeviceCommands: Send + Sync {
    /// Dumps the package metadata (`aapt dump badging`) for an APK file.
    fn package_dump(&self, apk_path: &Path) -> Result<String, AppError>;

    /// Lists attached devices; an empty or header-only response means none.
    fn list_devices(&self) -> Result<String, AppError>;

    /// Clears the device log buffer so later reads only contain this run.
    fn clear_log(&self) -> Result<(), AppError>;

    /// Installs an APK, replacing any previous install. Install failure is
    /// signalled through the captured output, not the return value.
    fn install(&self, apk_path: &Path) -> Result<CommandOutput, AppError>;

    /// Removes a package if present. Absence is normal; errors are ignored.
    fn uninstall(&self, package: &str);

    /// Starts the main launcher intent of `activity` within `package`.
    fn launch(&self, package: &str, activity: &str) -> Result<(), AppError>;

    /// The device's own clock, in epoch seconds.
    fn device_clock(&self) -> Result<i64, AppError>;

    /// ActivityManager log entries (process format), for pid resolution.
    fn activity_log(&self) -> Result<String, AppError>;

    /// The full buffered log in brief format.
    fn buffered_log(&self) -> Result<String, AppError>;
}

/// Production implementation shelling out to adb and aapt.
pub struct AdbCommands {
    adb: String,
    aapt: String,
    command_timeout: Duration,
    install_timeout: Duration,
    trace_id: String,
}

impl AdbCommands {
    pub fn new(
        adb_path: &str,
        aapt_path: &str,
        command_timeout: Duration,
        install_timeout: Duration,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            adb: resolve_adb_program(adb_path),
            aapt: resolve_aapt_program(aapt_path),
            command_timeout,
            install_timeout,
            trace_id: trace_id.into(),
        }
    }

    fn adb_output(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput, AppError> {
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        debug!(trace_id = %self.trace_id, program = %self.adb, ?args, "running device command");
        run_command(&self.adb, &args, timeout, &self.trace_id)
    }

    /// Runs an adb command and enforces a zero exit, returning stdout.
    fn adb_checked(&self, args: &[&str]) -> Result<String, AppError> {
        let output = self.adb_output(args, self.command_timeout)?;
        if !output.succeeded() {
            return Err(AppError::system(
                format!(
                    "adb {} exited with {:?}: {}",
                    args.first().copied().unwrap_or_default(),
                    output.exit_code,
                    output.stderr.trim()
                ),
                &self.trace_id,
            ));
        }
        Ok(output.stdout)
    }
}

impl DeviceCommands for AdbCommands {
    fn package_dump(&self, apk_path: &Path) -> Result<String, AppError> {
        let path = apk_path.to_string_lossy();
        let args: Vec<String> = ["dump", "badging", path.as_ref()]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        debug!(trace_id = %self.trace_id, program = %self.aapt, ?args, "dumping package metadata");
        let output = run_command(&self.aapt, &args, self.command_timeout, &self.trace_id)?;
        if !output.succeeded() {
            return Err(AppError::system(
                format!(
                    "aapt dump badging exited with {:?}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
                &self.trace_id,
            ));
        }
        Ok(output.stdout)
    }

    fn list_devices(&self) -> Result<String, AppError> {
        self.adb_checked(&["devices"])
    }

    fn clear_log(&self) -> Result<(), AppError> {
        self.adb_checked(&["logcat", "-c"]).map(|_| ())
    }

    fn install(&self, apk_path: &Path) -> Result<CommandOutput, AppError> {
        let path = apk_path.to_string_lossy();
        // Non-zero exits are not folded into an error here: the session scans
        // the captured output for the failure marker and wants both streams
        // for the diagnostic record.
        self.adb_output(&["install", "-r", path.as_ref()], self.install_timeout)
    }

    fn uninstall(&self, package: &str) {
        let _ = self.adb_output(&["uninstall", package], self.command_timeout);
    }

    fn launch(&self, package: &str, activity: &str) -> Result<(), AppError> {
        // The component rides the device-side shell, which is why `$` in
        // nested-class activity names arrives pre-escaped.
        let component = format!("{package}/{activity}");
        self.adb_checked(&[
            "shell",
            "am",
            "start",
            "-a",
            "android.intent.action.MAIN",
            "-c",
            "android.intent.category.LAUNCHER",
            "-n",
            &component,
        ])
        .map(|_| ())
    }

    fn device_clock(&self) -> Result<i64, AppError> {
        let output = self.adb_checked(&["shell", "date", "+%s"])?;
        parse_epoch_seconds(&output).ok_or_else(|| {
            AppError::system(
                format!("unexpected device clock response: {:?}", output.trim()),
                &self.trace_id,
            )
        })
    }

    fn activity_log(&self) -> Result<String, AppError> {
        self.adb_checked(&["logcat", "-v", "process", "-d", "ActivityManager:I", "*:S"])
    }

    fn buffered_log(&self) -> Result<String, AppError> {
        self.adb_checked(&["logcat", "-v", "brief", "-d"])
    }
}
