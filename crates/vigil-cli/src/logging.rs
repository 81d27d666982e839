use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vigil_infrastructure::VigilPaths;

const DEFAULT_FILTER: &str = "info";

/// Installs a stdout layer and a daily-rolling file layer under `logs/`.
///
/// The returned guard flushes the file writer on drop and must outlive the run.
pub fn init(paths: &VigilPaths) -> Result<WorkerGuard> {
    let log_dir = paths.logs_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "vigil.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}

/// `VIGIL_LOG`, then `RUST_LOG`, then [`DEFAULT_FILTER`].
fn filter() -> EnvFilter {
    let directives = std::env::var("VIGIL_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
