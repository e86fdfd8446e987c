//! KKM gateway
//!
//! Drives fiscal cash registers (KKM) through a driver seam: learns
//! connection descriptors, runs one device session per request, registers
//! receipts and cash documents, closes shifts and prints reports. Every
//! operation answers with a single merged JSON object.
//!
//! - [`kkm`]: device sessions, transactions, details parsing and results
//! - [`handler`]: request dispatch and the learned-device registry
//! - [`ports`]: serial port discovery
//! - [`diagnostics`]: build information and log housekeeping

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod diagnostics;
pub mod handler;
pub mod kkm;
pub mod ports;

pub use diagnostics::about_info;

const DEFAULT_FILTER: &str = "info,kkm_gateway=debug";

/// Install the global subscriber: a console layer on stderr plus a daily
/// rolling file under [`diagnostics::log_dir`].
///
/// `level` takes precedence over `RUST_LOG`. With `json` both layers emit
/// one JSON object per event.
pub fn init_logging(level: Option<&str>, json: bool) -> Result<(), String> {
    let env_filter = match level {
        Some(level) => EnvFilter::try_new(level).map_err(|e| format!("Invalid log filter: {e}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    diagnostics::prune_old_logs();

    let log_dir = diagnostics::log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender =
        tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // stdout is reserved for the JSON answer
    let (file_plain, file_json, console_plain, console_json) = if json {
        (
            None,
            Some(fmt::layer().json().with_writer(non_blocking).with_target(true)),
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr).with_target(true)),
        )
    } else {
        (
            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            ),
            None,
            Some(fmt::layer().with_writer(std::io::stderr).with_target(true)),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_plain)
        .with(console_json)
        .with(file_plain)
        .with(file_json)
        .try_init()
        .map_err(|e| format!("Failed to install log subscriber: {e}"))?;

    // Keep the writer alive for the process lifetime
    std::mem::forget(_guard);

    info!(
        "KKM gateway v{} logging to {}",
        env!("CARGO_PKG_VERSION"),
        log_dir.display()
    );
    Ok(())
}
