use crate::app::config::{FileRotation, LogType, LoggingConfig};
use anyhow::{Context, Result, anyhow};
use std::path::Path;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::{FmtSpan, Writer};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

type DynLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync + 'static>;

struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber, one layer per configured sink.
/// `RUST_LOG` directives are honored on top of the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    config.validate()?;

    let crate_name = env!("CARGO_PKG_NAME");
    let filter = EnvFilter::from_default_env()
        .add_directive("warn".parse()?)
        .add_directive(format!("{}={}", crate_name, config.level).parse()?);

    let mut layers: Vec<DynLayer> = Vec::with_capacity(config.sinks.len());

    for sink in &config.sinks {
        let layer = match &sink.dest {
            LogType::Stdout { color, json, spans } => {
                let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
                // flushed on process exit, guards live for the program lifetime
                std::mem::forget(guard);
                build_layer(writer, *json, *color, *spans)
            }
            LogType::File {
                path,
                json,
                rotation,
                max_files,
                spans,
            } => {
                let writer = create_file_writer(path, rotation, *max_files)?;
                build_layer(writer, *json, false, *spans)
            }
        };

        layers.push(layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    Ok(())
}

fn build_layer<W>(writer: W, json: bool, color: bool, spans: bool) -> DynLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if json {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_span_events(span_events)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_timer(CompactTime)
            .with_ansi(color)
            .with_writer(writer)
            .with_span_events(span_events)
            .boxed()
    }
}

fn create_file_writer(
    path: &Path,
    rotation: &FileRotation,
    max_files: usize,
) -> Result<tracing_appender::non_blocking::NonBlocking> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid file name in path: {}", path.display()))?;

    let directory = path
        .parent()
        .ok_or_else(|| anyhow!("Invalid directory in path: {}", path.display()))?;

    if !directory.as_os_str().is_empty() {
        std::fs::create_dir_all(directory)
            .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    }

    let appender = match rotation {
        FileRotation::Daily => tracing_appender::rolling::daily(directory, file_name),
        FileRotation::Hourly => tracing_appender::rolling::hourly(directory, file_name),
        FileRotation::Never => tracing_appender::rolling::never(directory, file_name),
    };

    cleanup_old_files(directory, file_name, max_files)?;

    let (writer, guard) = tracing_appender::non_blocking(appender);
    std::mem::forget(guard);

    Ok(writer)
}

/// Keeps the newest `max_files` logs sharing the prefix, zero keeps all
fn cleanup_old_files(directory: &Path, prefix: &str, max_files: usize) -> Result<usize> {
    if max_files == 0 {
        return Ok(0);
    }

    let dir = if directory.as_os_str().is_empty() {
        Path::new(".")
    } else {
        directory
    };

    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(prefix))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    if files.len() <= max_files {
        return Ok(0);
    }

    files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in files.iter().skip(max_files) {
        if std::fs::remove_file(path).is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}

/// Flushes stdout ahead of exit, the non blocking writers drain on their own
pub fn shutdown() {
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = std::env::temp_dir().join(format!("shelf-logs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        for i in 0..4 {
            std::fs::write(dir.join(format!("shelf.log.{i}")), b"x").unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        std::fs::write(dir.join("other.log"), b"x").unwrap();

        let removed = cleanup_old_files(&dir, "shelf.log", 2).unwrap();

        assert_eq!(removed, 2);
        assert!(dir.join("shelf.log.3").exists());
        assert!(dir.join("shelf.log.2").exists());
        assert!(!dir.join("shelf.log.0").exists());
        assert!(dir.join("other.log").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cleanup_disabled() {
        let dir = std::env::temp_dir();
        assert_eq!(cleanup_old_files(&dir, "shelf-none", 0).unwrap(), 0);
    }
}
