//! Status log for scan sessions.
//!
//! Human-readable, append-only text file in the user directory. Every line
//! is `"<timestamp>: <message>\n"` and is echoed to stdout unless the echo
//! is switched off. The file is reopened in append mode if it was closed
//! before a write.

use bnp_common::pv::backend::PvError;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Local-time format of the line prefix.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time formatted with [`TIMESTAMP_FORMAT`].
pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Format one log line.
pub fn format_line(timestamp: &str, msg: &str) -> String {
    format!("{timestamp}: {msg}\n")
}

/// Append-only status log.
pub struct StatusLog {
    /// Path of the log file
    path: PathBuf,
    /// Open handle, `None` when closed
    file: Option<File>,
    /// Echo every write to stdout
    echo: bool,
}

impl StatusLog {
    /// Open (or create) the log file in append mode.
    ///
    /// Missing parent directories are created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PvError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    PvError::Log(format!("Failed to create log directory {:?}: {}", parent, e))
                })?;
            }
        }
        let file = open_append(&path)?;
        info!("Status log opened at {:?}", path);
        Ok(Self {
            path,
            file: Some(file),
            echo: true,
        })
    }

    /// Enable or disable the stdout echo.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Whether writes are echoed to stdout.
    pub fn echoes(&self) -> bool {
        self.echo
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file handle is currently open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Write `msg` verbatim: echo to stdout, append to the file, flush.
    pub fn write(&mut self, msg: &str) -> Result<(), PvError> {
        if self.echo {
            let mut stdout = std::io::stdout().lock();
            // stdout failures (closed pipe) must not stop the scan log
            let _ = stdout.write_all(msg.as_bytes());
            let _ = stdout.flush();
        }

        if self.file.is_none() {
            debug!("Status log was closed, reopening {:?}", self.path);
            self.file = Some(open_append(&self.path)?);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(PvError::Log(format!("{:?} is not open", self.path)));
        };
        file.write_all(msg.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| PvError::Log(format!("Failed to write {:?}: {}", self.path, e)))
    }

    /// Write a timestamped line.
    pub fn line(&mut self, msg: &str) -> Result<(), PvError> {
        self.write(&format_line(&timestamp(), msg))
    }

    /// Close the file handle. The next write reopens it.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Status log {:?} closed", self.path);
        }
    }
}

fn open_append(path: &Path) -> Result<File, PvError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PvError::Log(format!("Failed to open {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn line_has_timestamp_and_message() {
        let line = format_line("2026-10-19 08:15:00", "Centering piezoX and piezoY.");
        assert_eq!(line, "2026-10-19 08:15:00: Centering piezoX and piezoY.\n");
    }

    #[test]
    fn timestamp_matches_format() {
        let ts = timestamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn appends_to_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, "earlier session\n").unwrap();

        let mut log = StatusLog::open(&path).unwrap().with_echo(false);
        log.line("new session").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("earlier session\n"));
        assert!(content.ends_with(": new session\n"));
    }

    #[test]
    fn reopens_after_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.txt");
        let mut log = StatusLog::open(&path).unwrap().with_echo(false);

        log.write("first\n").unwrap();
        log.close();
        assert!(!log.is_open());
        log.write("second\n").unwrap();
        assert!(log.is_open());

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("2026-3").join("user").join("log.txt");
        let mut log = StatusLog::open(&path).unwrap().with_echo(false);
        log.write("x\n").unwrap();
        assert!(path.exists());
    }
}
