use std::fs::File;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Target for per-artifact verdict and failure lines. Events emitted with
/// `target: SUMMARY_TARGET` also land in the summary log file, so an operator
/// can scan verdicts without wading through trace output.
pub const SUMMARY_TARGET: &str = "summary";

pub fn init_logging(summary_log: Option<File>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = if cfg!(debug_assertions) {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_writer(io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    let summary_layer = summary_log.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
            .with_filter(filter_fn(|meta| meta.target() == SUMMARY_TARGET))
            .boxed()
    });

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(summary_layer)
        .try_init();
}
