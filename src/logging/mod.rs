//! Logging infrastructure.
//!
//! Grounded on `crates/vsg_core/src/logging/mod.rs`'s `init_tracing` /
//! `init_tracing_with_file` pair. This crate is a library with no GUI job
//! log viewer, so the teacher's `JobLogger`/GUI-callback/compact-mode/tail
//! buffer machinery is not carried over (`SPEC_FULL.md` §10.1); only the
//! file/stderr half of the teacher's dual sink applies here.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use voxlag_core::logging::{init_tracing_with_file, LogLevel};
//!
//! let _guard = init_tracing_with_file(LogLevel::Info, Path::new(".logs"));
//! tracing::info!("pipeline starting");
//! ```

mod types;

use std::path::Path;

pub use types::{FailCounts, LogLevel};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize a global tracing subscriber that logs to stderr only,
/// respecting `RUST_LOG` with `default_level` as fallback.
pub fn init_tracing(default_level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

/// Initialize a global tracing subscriber that logs to both stderr and
/// `{logs_dir}/voxlag.log`. Returns a guard that must be kept alive for
/// the duration of the program; dropping it flushes and stops the
/// non-blocking file writer.
pub fn init_tracing_with_file(default_level: LogLevel, logs_dir: &Path) -> WorkerGuard {
    if !logs_dir.exists() {
        let _ = std::fs::create_dir_all(logs_dir);
    }

    let file_appender = tracing_appender::rolling::never(logs_dir, "voxlag.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let stderr_layer = fmt::layer().with_target(true).with_thread_ids(false).with_ansi(true);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Log a one-line summary of a fit pass's failure tally at `info` level,
/// per `SPEC_FULL.md` §10.1's "aggregate failure counts, not per-voxel".
pub fn log_fit_summary(pass: usize, counts: &FailCounts) {
    tracing::info!(
        pass,
        total = counts.total_voxels,
        amplitude_too_low = counts.amplitude_too_low,
        lag_out_of_range = counts.lag_out_of_range,
        width_out_of_range = counts.width_out_of_range,
        edge_of_window = counts.edge_of_window,
        fit_did_not_converge = counts.fit_did_not_converge,
        "fit pass complete"
    );
}
