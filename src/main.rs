use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use uuid::Uuid;

use apk_regress::app::config::{load_config, load_config_from_path, AppConfig};
use apk_regress::app::device::commands::{AdbCommands, DeviceCommands};
use apk_regress::app::device::locator::{resolve_aapt_program, resolve_adb_program, validate_program};
use apk_regress::app::driver::{collect_apks_from_dir, CommandRepackager, Repackager, TestDriver};
use apk_regress::app::error::AppError;
use apk_regress::app::known_failures::KnownFailures;
use apk_regress::app::logging::{init_logging, SUMMARY_TARGET};
use apk_regress::app::models::RunSummary;

#[derive(Debug, Clone)]
struct Args {
    config: Option<PathBuf>,
    apk_dir: Option<String>,
    out_dir: Option<PathBuf>,
    json: bool,
    original_only: bool,
    no_builtin_known_failures: bool,
    apks: Vec<PathBuf>,
}

const USAGE: &str = "Usage: apk-regress [--config PATH] [--apk-dir DIR] [--out DIR] [--json] \
[--original-only] [--no-builtin-known-failures] [APK...]\n\
Tests each APK on the attached device, then its repackaged rebuild, and \
reports pass/fail per artifact.\n";

fn parse_args() -> Result<Args, String> {
    let mut config = None;
    let mut apk_dir = None;
    let mut out_dir = None;
    let mut json = false;
    let mut original_only = false;
    let mut no_builtin_known_failures = false;
    let mut apks = Vec::new();

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            "--apk-dir" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--apk-dir requires a value".to_string())?;
                apk_dir = Some(value);
            }
            "--out" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--out requires a value".to_string())?;
                out_dir = Some(PathBuf::from(value));
            }
            "--json" => {
                json = true;
            }
            "--original-only" => {
                original_only = true;
            }
            "--no-builtin-known-failures" => {
                no_builtin_known_failures = true;
            }
            "-h" | "--help" => {
                return Err(USAGE.to_string());
            }
            other if other.starts_with('-') => return Err(format!("Unknown arg: {other}")),
            other => apks.push(PathBuf::from(other)),
        }
    }

    Ok(Args {
        config,
        apk_dir,
        out_dir,
        json,
        original_only,
        no_builtin_known_failures,
        apks,
    })
}

fn resolve_report_dir(args: &Args, config: &AppConfig, trace_id: &str) -> PathBuf {
    if let Some(dir) = &args.out_dir {
        return dir.clone();
    }
    let configured = config.report.output_dir.trim();
    if !configured.is_empty() {
        return PathBuf::from(configured);
    }
    std::env::temp_dir().join(format!("apk_regress_{trace_id}"))
}

fn build_known_failures(
    args: &Args,
    config: &AppConfig,
    trace_id: &str,
) -> Result<KnownFailures, AppError> {
    let base = if args.no_builtin_known_failures {
        KnownFailures::empty()
    } else {
        KnownFailures::builtin()
    };
    let extra = config.known_failures_file.trim();
    if extra.is_empty() {
        return Ok(base);
    }
    base.with_extra_file(&PathBuf::from(extra), trace_id)
}

fn run(args: Args, trace_id: &str) -> Result<RunSummary, AppError> {
    let config = match &args.config {
        Some(path) => load_config_from_path(path)?,
        None => load_config()?,
    };

    let adb = resolve_adb_program(&config.tools.adb_path);
    let aapt = resolve_aapt_program(&config.tools.aapt_path);
    for program in [&adb, &aapt] {
        validate_program(program).map_err(|message| AppError::dependency(message, trace_id))?;
    }

    let known_failures = build_known_failures(&args, &config, trace_id)?;
    info!(
        trace_id = %trace_id,
        known_failures = known_failures.len(),
        "known-failure set loaded"
    );

    let apk_paths = if args.apks.is_empty() {
        let dir = args.apk_dir.as_deref().unwrap_or(config.apk_dir.as_str());
        collect_apks_from_dir(&PathBuf::from(dir), trace_id)?
    } else {
        args.apks.clone()
    };
    if apk_paths.is_empty() {
        return Err(AppError::validation("no APKs to test", trace_id));
    }

    let report_dir = resolve_report_dir(&args, &config, trace_id);
    fs::create_dir_all(&report_dir).map_err(|err| {
        AppError::system(format!("Failed to create report dir: {err}"), trace_id)
    })?;

    let device: Arc<dyn DeviceCommands> = Arc::new(AdbCommands::new(
        &config.tools.adb_path,
        &config.tools.aapt_path,
        Duration::from_secs(config.tools.command_timeout_secs),
        Duration::from_secs(config.tools.install_timeout_secs),
        trace_id,
    ));

    let repackager: Option<CommandRepackager> = if args.original_only {
        None
    } else {
        Some(CommandRepackager::from_settings(&config.repackage, trace_id)?)
    };

    let driver = TestDriver::new(
        device,
        repackager.as_ref().map(|r| r as &dyn Repackager),
        &known_failures,
        config.watch.budget_secs,
        report_dir.clone(),
        trace_id,
    );
    let summary = driver.run(&apk_paths)?;

    let summary_path = report_dir.join("run_summary.json");
    let payload = serde_json::to_string_pretty(&summary)
        .map_err(|err| AppError::system(format!("Failed to serialize summary: {err}"), trace_id))?;
    fs::write(&summary_path, payload).map_err(|err| {
        AppError::system(format!("Failed to write run summary: {err}"), trace_id)
    })?;
    info!(
        trace_id = %trace_id,
        path = %summary_path.display(),
        "run summary written"
    );

    Ok(summary)
}

fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();

    // The summary log lives next to the reports; resolve the directory early
    // so logging can attach to it even before the config is validated.
    let config_for_dir = match &args.config {
        Some(path) => load_config_from_path(path).unwrap_or_default(),
        None => load_config().unwrap_or_default(),
    };
    let report_dir = resolve_report_dir(&args, &config_for_dir, &trace_id);
    let summary_log = fs::create_dir_all(&report_dir)
        .ok()
        .and_then(|_| fs::File::options()
            .create(true)
            .append(true)
            .open(report_dir.join("summary.log"))
            .ok());
    init_logging(summary_log);

    match run(args.clone(), &trace_id) {
        Ok(summary) => {
            let output = if args.json {
                serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
            } else {
                format!(
                    "tested: {} passed: {} failed: {} inconclusive: {} skipped: {}\ntrace_id: {}\n",
                    summary.total,
                    summary.passed,
                    summary.failed,
                    summary.inconclusive,
                    summary.skipped,
                    summary.trace_id
                )
            };
            println!("{output}");
            if !summary.all_clear() {
                std::process::exit(1);
            }
        }
        Err(err) => {
            // Log-and-exit is only acceptable at the very top.
            error!(
                target: SUMMARY_TARGET,
                trace_id = %trace_id,
                error = %err,
                code = %err.code,
                "top-level failure"
            );
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
