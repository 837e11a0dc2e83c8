use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use regex::Regex;
use tracing::{error, info, warn};

use crate::app::device::commands::DeviceCommands;
use crate::app::device::parse::{brief_log_pid, resolve_activity_pid};
use crate::app::error::AppError;

/// What the watcher saw before its time ran out. `Undetermined` covers the
/// cases where nothing could be observed at all: the process id never showed
/// up in the ActivityManager log, or a device command failed mid-watch. It is
/// not folded into `Clean`; a slow-starting process is not a passing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchVerdict {
    ErrorFound { lines: String },
    Clean,
    Undetermined,
}

/// Watches the device log for error-severity lines from a just-launched
/// activity. Runs on its own thread; the only shared state is the stop flag,
/// and the verdict travels back through the join.
pub struct LogcatWatcher {
    device: Arc<dyn DeviceCommands>,
    launch_target: String,
    budget_secs: i64,
    stop_flag: Arc<AtomicBool>,
    trace_id: String,
}

pub struct WatcherHandle {
    stop_flag: Arc<AtomicBool>,
    join: JoinHandle<WatchVerdict>,
}

impl WatcherHandle {
    /// Waits for the watcher to finish on its own. A watcher that panicked
    /// counts as an unobserved run.
    pub fn join(self) -> WatchVerdict {
        self.join.join().unwrap_or(WatchVerdict::Undetermined)
    }

    /// Signals the watcher to stop at its next poll and waits for it to end.
    pub fn stop(self) -> WatchVerdict {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.join()
    }
}

impl LogcatWatcher {
    pub fn new(
        device: Arc<dyn DeviceCommands>,
        launch_target: String,
        budget_secs: i64,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            device,
            launch_target,
            budget_secs,
            stop_flag: Arc::new(AtomicBool::new(false)),
            trace_id: trace_id.into(),
        }
    }

    pub fn spawn(self) -> WatcherHandle {
        let stop_flag = Arc::clone(&self.stop_flag);
        let join = thread::spawn(move || self.run());
        WatcherHandle { stop_flag, join }
    }

    fn run(&self) -> WatchVerdict {
        info!(
            trace_id = %self.trace_id,
            activity = %self.launch_target,
            "started watching activity"
        );
        let verdict = match self.watch() {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    trace_id = %self.trace_id,
                    error = %err,
                    "device command failed while watching log"
                );
                WatchVerdict::Undetermined
            }
        };
        match &verdict {
            WatchVerdict::ErrorFound { .. } => {
                info!(trace_id = %self.trace_id, "found error in log, stopping log watching");
            }
            WatchVerdict::Clean => {
                info!(trace_id = %self.trace_id, "no errors found, stopping log watching");
            }
            WatchVerdict::Undetermined => {}
        }
        verdict
    }

    fn watch(&self) -> Result<WatchVerdict, AppError> {
        let Some(pid) = self.resolve_pid_in_time()? else {
            error!(
                trace_id = %self.trace_id,
                activity = %self.launch_target,
                "could not resolve the activity process id in time"
            );
            return Ok(WatchVerdict::Undetermined);
        };
        info!(
            trace_id = %self.trace_id,
            pid = %pid,
            "watching for error messages from process"
        );
        self.watch_for_errors(&pid)
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Phase A: poll the ActivityManager log until it announces the launch of
    /// our target, or the device-clock budget runs out. Always polls at least
    /// once.
    fn resolve_pid_in_time(&self) -> Result<Option<String>, AppError> {
        let deadline = self.device.device_clock()? + self.budget_secs;
        loop {
            let log = self.device.activity_log()?;
            if let Some(pid) = resolve_activity_pid(&log, &self.launch_target) {
                return Ok(Some(pid));
            }
            if self.stopped() || self.device.device_clock()? >= deadline {
                return Ok(None);
            }
        }
    }

    /// Phase B: re-read the buffered log until a line from the watched process
    /// classifies as an error, or the budget runs out.
    fn watch_for_errors(&self, pid: &str) -> Result<WatchVerdict, AppError> {
        let deadline = self.device.device_clock()? + self.budget_secs;
        loop {
            if let Some(lines) = self.scan_for_errors(pid)? {
                error!(
                    trace_id = %self.trace_id,
                    "found error log lines:\n{lines}"
                );
                return Ok(WatchVerdict::ErrorFound { lines });
            }
            if self.stopped() || self.device.device_clock()? >= deadline {
                return Ok(WatchVerdict::Clean);
            }
        }
    }

    /// One pass over the buffered log. Lines from the watched process are
    /// accumulated so the triage record shows the error in context.
    fn scan_for_errors(&self, pid: &str) -> Result<Option<String>, AppError> {
        let log = self.device.buffered_log()?;
        if log.is_empty() {
            return Ok(None);
        }
        let mut matched = String::new();
        for line in log.lines() {
            if brief_log_pid(line) != pid {
                continue;
            }
            matched.push_str(line);
            matched.push('\n');
            if is_error_line(line) {
                return Ok(Some(matched));
            }
        }
        Ok(None)
    }
}

fn anr_trace_denied_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Unable to open stack trace file '[^']*': Permission denied$")
            .expect("ANR trace regex should compile")
    })
}

/// Benign warnings and errors that must not fail a run. Matching is by
/// substring only. When adding an entry, record what triggers it; an
/// unexplained suppression hides real bugs.
fn is_benign_line(line: &str) -> bool {
    // Stack trace files for ANRs intermittently fail to write on emulators;
    // the app itself is unaffected.
    if anr_trace_denied_regex().is_match(line) {
        return true;
    }
    // "W/Resources(17336): Converting to string: TypedValue{t=0x10/d=0x6 a=-1}",
    // emitted by the resource framework while rendering perfectly fine apps.
    if line.contains("Converting to string: TypedValue") {
        return true;
    }
    // Resource lookup warning for ids the framework resolves elsewhere.
    if line.contains("No known package when getting value for resource number") {
        return true;
    }
    false
}

/// A line is an error when it carries a warning/error/fatal severity prefix
/// and is not on the benign list.
pub fn is_error_line(line: &str) -> bool {
    if !line.starts_with("W/") && !line.starts_with("E/") && !line.starts_with("F/") {
        return false;
    }
    !is_benign_line(line)
}
