//! Logging setup for crtscan binaries.
//!
//! Two layers are installed: a size-rotated log file under
//! `$CRTSCAN_HOME/logs` and a human readable stderr layer. Scans run for
//! hours, so the file layer always records at the `RUST_LOG` level while the
//! console can be quieter.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "crtscan=info,crtscan_logging=info";
const VERBOSE_LOG_FILTER: &str = "crtscan=debug,crtscan_logging=debug";
const KEEP_LOG_FILES: usize = 5;
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;

/// Logging options for a binary.
pub struct LogConfig<'a> {
    /// Base name of the log file (`<app_name>.log`).
    pub app_name: &'a str,
    /// Raise the console filter to debug.
    pub verbose: bool,
    /// Override the log directory. Defaults to [`logs_dir`].
    pub log_dir: Option<PathBuf>,
}

/// Install the global tracing subscriber.
///
/// If the log directory cannot be created the subscriber falls back to
/// stderr only and a warning is emitted once the subscriber is live.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let base_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    let console_filter = if config.verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        base_filter()
    };

    let dir = config.log_dir.unwrap_or_else(logs_dir);
    let (file_layer, file_error) = match SharedLogWriter::open(&dir, config.app_name) {
        Ok(writer) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(base_filter()),
            ),
            None,
        ),
        Err(err) => (None, Some(err)),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(err) = file_error {
        tracing::warn!(dir = %dir.display(), error = %err, "File logging disabled");
    }
    Ok(())
}

/// Root directory for crtscan state: `$CRTSCAN_HOME` or `~/.crtscan`.
pub fn crtscan_home() -> PathBuf {
    if let Ok(path) = std::env::var("CRTSCAN_HOME") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".crtscan")
}

/// Default log directory: `<crtscan_home>/logs`.
pub fn logs_dir() -> PathBuf {
    crtscan_home().join("logs")
}

/// Size-rotated append-only log file.
///
/// `<name>.log` is the live file; on rotation it becomes `<name>.log.1`,
/// older generations shift up and anything past `keep` is deleted.
struct RotatingFile {
    dir: PathBuf,
    name: String,
    keep: usize,
    rotate_at: u64,
    file: Option<File>,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, app_name: &str, keep: usize, rotate_at: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut log = Self {
            dir: dir.to_path_buf(),
            name: file_stem(app_name),
            keep: keep.max(1),
            rotate_at,
            file: None,
            written: 0,
        };
        log.reopen()?;
        if log.written >= log.rotate_at {
            log.rotate()?;
        }
        Ok(log)
    }

    fn live_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.name))
    }

    fn generation_path(&self, generation: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.name, generation))
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.live_path())?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let oldest = self.keep - 1;
        if oldest > 0 {
            let expired = self.generation_path(oldest);
            if expired.exists() {
                fs::remove_file(expired)?;
            }
            for generation in (1..oldest).rev() {
                let from = self.generation_path(generation);
                if from.exists() {
                    fs::rename(from, self.generation_path(generation + 1))?;
                }
            }
            let live = self.live_path();
            if live.exists() {
                fs::rename(live, self.generation_path(1))?;
            }
        } else {
            // keep == 1: truncate in place
            File::create(self.live_path())?;
        }

        self.reopen()
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.rotate_at {
            self.rotate()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing out guards over one shared [`RotatingFile`].
#[derive(Clone)]
struct SharedLogWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl SharedLogWriter {
    fn open(dir: &Path, app_name: &str) -> Result<Self> {
        let file = RotatingFile::open(dir, app_name, KEEP_LOG_FILES, ROTATE_AT_BYTES)
            .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedLogWriter {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?
            .flush()
    }
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => ch,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_replaces_separators() {
        assert_eq!(file_stem("crtscan"), "crtscan");
        assert_eq!(file_stem("../evil name"), "___evil_name");
    }

    #[test]
    fn test_rotation_shifts_generations() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = RotatingFile::open(tmp.path(), "scan", 3, 16).unwrap();

        log.write_all(b"0123456789").unwrap();
        log.write_all(b"abcdefghij").unwrap();
        log.write_all(b"KLMNOPQRST").unwrap();
        log.flush().unwrap();

        let live = fs::read_to_string(tmp.path().join("scan.log")).unwrap();
        let first = fs::read_to_string(tmp.path().join("scan.log.1")).unwrap();
        let second = fs::read_to_string(tmp.path().join("scan.log.2")).unwrap();
        assert_eq!(live, "KLMNOPQRST");
        assert_eq!(first, "abcdefghij");
        assert_eq!(second, "0123456789");
        assert!(!tmp.path().join("scan.log.3").exists());
    }

    #[test]
    fn test_reopen_appends_to_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut log = RotatingFile::open(tmp.path(), "scan", 2, 1024).unwrap();
            log.write_all(b"first\n").unwrap();
        }
        let mut log = RotatingFile::open(tmp.path(), "scan", 2, 1024).unwrap();
        log.write_all(b"second\n").unwrap();
        log.flush().unwrap();

        let live = fs::read_to_string(tmp.path().join("scan.log")).unwrap();
        assert_eq!(live, "first\nsecond\n");
    }

    #[test]
    fn test_single_generation_truncates() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = RotatingFile::open(tmp.path(), "scan", 1, 8).unwrap();
        log.write_all(b"12345678").unwrap();
        log.write_all(b"abc").unwrap();
        log.flush().unwrap();

        let live = fs::read_to_string(tmp.path().join("scan.log")).unwrap();
        assert_eq!(live, "abc");
    }
}
