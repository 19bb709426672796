//! Logging to stderr and to a daily rolling file
//!
//! Files are named `todogram.YYYY-MM-DD.log`; at most seven are kept.

use anyhow::Result;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const LOG_PREFIX: &str = "todogram";
const LOG_SUFFIX: &str = "log";
const MAX_LOG_FILES: usize = 7;

pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Rotates at midnight UTC and prunes files beyond the retention count.
fn file_appender(log_dir: &Path) -> Result<RollingFileAppender> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix(LOG_SUFFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)?;
    Ok(appender)
}

pub fn init_logging(log_dir: &Path, log_level: &str) -> Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(env_filter(log_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_filter(env_filter(log_level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    tracing::debug!(dir = %log_dir.display(), "Logging initialized");

    Ok(LoggingGuard { _guard: guard })
}

#[cfg(test)]
mod tests {
    use super::file_appender;
    use std::fs;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    fn temp_log_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("todogram-logs-{}-{}", name, nanos));
        fs::create_dir_all(&dir).expect("create log dir");
        dir
    }

    fn log_names(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .expect("read log dir")
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn appender_writes_dated_file() {
        let dir = temp_log_dir("dated");
        let mut appender = file_appender(&dir).expect("appender");
        appender.write_all(b"hello\n").expect("write");
        appender.flush().expect("flush");

        let names = log_names(&dir);
        assert_eq!(names.len(), 1);
        let name = &names[0];
        assert!(name.starts_with("todogram."), "unexpected name {}", name);
        assert!(name.ends_with(".log"), "unexpected name {}", name);
        assert_eq!(name.len(), "todogram.YYYY-MM-DD.log".len());

        let _ = fs::remove_dir_all(dir);
    }
}
