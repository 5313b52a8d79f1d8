//! Logging initialization.
//!
//! Every process writes structured JSONL to `~/.bazaar/logs/session.jsonl`
//! and, optionally, a compact human-readable stream to stderr. `RUST_LOG`
//! overrides the configured level.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Append-only JSONL writer; flushes after each line so several processes
/// can share one log file.
#[derive(Clone)]
struct JsonlWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl JsonlWriter {
    fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl Write for JsonlWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for JsonlWriter {
    type Writer = JsonlWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install the global subscriber: JSONL to `log_path` when given, plus a
/// compact stderr stream when `also_stderr` is set. Calling this more than
/// once is harmless.
pub fn init_logging_with_path(level: &str, log_path: Option<&Path>, also_stderr: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut open_error = None;
    let file_layer = log_path.and_then(|path| match JsonlWriter::open(path) {
        Ok(writer) => Some(
            fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true)
                .with_writer(writer),
        ),
        Err(e) => {
            open_error = Some(e);
            None
        }
    });

    let stderr_layer = also_stderr.then(|| {
        fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(io::stderr)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        if let Some(e) = open_error {
            tracing::warn!(error = %e, "Log file unavailable, logging to stderr only");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn jsonl_writer_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("session.jsonl");

        let mut writer = JsonlWriter::open(&path).unwrap();
        writer.write_all(b"{\"a\":1}\n").unwrap();
        let mut second = writer.make_writer();
        second.write_all(b"{\"b\":2}\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
