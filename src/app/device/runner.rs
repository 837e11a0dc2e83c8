use std::io::Read;
use std::process::{ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::app::error::AppError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

fn drain<R: Read + Send + 'static>(reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut reader = reader;
        let mut buffer = Vec::<u8>::new();
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => buffer.extend_from_slice(&chunk[..count]),
                Err(_) => break,
            }
        }
        buffer
    })
}

/// Runs a program to completion, capturing both output streams. stdout and
/// stderr are drained on their own threads; a chatty child would otherwise
/// block once the pipe buffer fills and falsely hit the timeout.
pub fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
    trace_id: &str,
) -> Result<CommandOutput, AppError> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            AppError::system(format!("Failed to spawn {program}: {err}"), trace_id)
        })?;

    let stdout: ChildStdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stdout", trace_id))?;
    let stderr: ChildStderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::system("Failed to capture stderr", trace_id))?;
    let stdout_handle = drain(stdout);
    let stderr_handle = drain(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(AppError::system(
                        format!("{program} timed out after {}s", timeout.as_secs()),
                        trace_id,
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(AppError::system(
                    format!("Failed to poll {program}: {err}"),
                    trace_id,
                ));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_both_streams_and_exit_code() {
        let output = run_command(
            "sh",
            &["-c".to_string(), "echo out; echo err >&2".to_string()],
            Duration::from_secs(5),
            "trace-streams",
        )
        .expect("command");
        assert_eq!(output.exit_code, Some(0));
        assert!(output.succeeded());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn does_not_deadlock_on_large_stdout() {
        // If stdout/stderr are piped but not drained, the child blocks once the
        // pipe buffer fills and an otherwise-fast command "hangs" into the
        // timeout.
        let output = run_command(
            "sh",
            &[
                "-c".to_string(),
                "i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done".to_string(),
            ],
            Duration::from_secs(10),
            "trace-large-output",
        )
        .expect("expected large-output command to complete without timing out");

        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[test]
    fn reports_timeout_as_system_error() {
        let err = run_command(
            "sh",
            &["-c".to_string(), "sleep 30".to_string()],
            Duration::from_millis(200),
            "trace-timeout",
        )
        .expect_err("expected timeout");
        assert_eq!(err.code, "ERR_SYSTEM");
        assert!(err.error.contains("timed out"));
    }
}
