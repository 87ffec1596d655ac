use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

/// Initialize the daemon's diagnostic log: a stderr layer (picked up by cron
/// mail) plus a non-blocking file appender under the work dir. Distinct from
/// the combined/error transfer logs, which are domain artifacts written by
/// the sync layer.
///
/// Returns the appender guard; dropping it flushes buffered lines, so the
/// caller keeps it alive for the whole invocation. Failures degrade to
/// stderr-only logging instead of aborting startup.
pub fn init(workdir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let stderr_layer = fmt::layer().with_ansi(false).with_writer(std::io::stderr);

    let log_dir = workdir.join("logs");
    match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(&log_dir, "dxsync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);
            let subscriber =
                Registry::default().with(filter).with(stderr_layer).with(file_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        Err(e) => {
            let subscriber = Registry::default().with(filter).with(stderr_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            tracing::warn!(
                "cannot create log directory {}; file logging disabled: {}",
                log_dir.display(),
                e
            );
            None
        }
    }
}
