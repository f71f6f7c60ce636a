//! Tracing subscriber setup: console layer plus an optional JSON-lines file.

use std::path::Path;

use massdriver_config::Logging;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::cli::FILE_GUARD;

fn filter(level: &str) -> EnvFilter {
    // RUST_LOG wins over the configured level
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn rolling(file: &Path, rotation: Option<&str>) -> tracing_appender::rolling::RollingFileAppender {
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = file
        .file_name()
        .map_or_else(|| "massdriver.log".into(), |n| n.to_string_lossy().into_owned());
    match rotation {
        Some("daily") => tracing_appender::rolling::daily(dir, name),
        Some("hourly") => tracing_appender::rolling::hourly(dir, name),
        _ => tracing_appender::rolling::never(dir, name),
    }
}

/// Install the global subscriber. Console output goes to stderr so command
/// results on stdout stay machine-readable.
pub fn init(json: bool, console_level: &str, cfg: Option<&Logging>) {
    let console_filter = filter(console_level);
    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };

    let file_layer = cfg.and_then(|c| {
        let path = c.file.as_deref()?;
        let appender = rolling(Path::new(path), c.rotation.as_deref());
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let level = c.level.as_deref().unwrap_or("info");
        Some(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(filter(level))
                .boxed(),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
}
