//! Append-only log of asynchronous task failures

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::error;

/// One `TaskFailed` notice as written to the failure log
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub timestamp: DateTime<Local>,
    pub status_code: i32,
    pub session_id: String,
    pub error_message: String,
}

impl FailureRecord {
    pub fn new(status_code: i32, session_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            status_code,
            session_id: session_id.into(),
            error_message: error_message.into(),
        }
    }

    /// `<timestamp> status_code:<int> task_id:<id> error_message:<msg>`
    pub fn to_line(&self) -> String {
        format!(
            "{} status_code:{} task_id:{} error_message:{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
            self.status_code,
            self.session_id,
            // Keep one record per line
            self.error_message.replace(['\r', '\n'], " ")
        )
    }
}

pub struct FailureLog {
    path: PathBuf,
    writer: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line; the file is created on first use
    pub fn append(&self, record: &FailureRecord) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open failure log: {}", self.path.display()))?;
        writeln!(file, "{}", record.to_line())
            .with_context(|| format!("Failed to write failure log: {}", self.path.display()))?;

        error!(
            "Task failed: status_code={} task_id={} error_message={}",
            record.status_code, record.session_id, record.error_message
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_line_format() {
        let record = FailureRecord {
            timestamp: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            status_code: 40_000_001,
            session_id: "w000-i0001-abc".to_string(),
            error_message: "bad\nrequest".to_string(),
        };

        assert_eq!(
            record.to_line(),
            "2024-03-09 14:05:07.000000 status_code:40000001 task_id:w000-i0001-abc error_message:bad request"
        );
    }

    #[test]
    fn test_append_keeps_existing_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("failures.log");
        std::fs::write(&path, "earlier line\n").unwrap();

        let log = FailureLog::new(&path);
        log.append(&FailureRecord::new(41_010_101, "a", "first")).unwrap();
        log.append(&FailureRecord::new(41_010_102, "b", "second")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "earlier line");
        assert!(lines[1].ends_with("status_code:41010101 task_id:a error_message:first"));
        assert!(lines[2].ends_with("status_code:41010102 task_id:b error_message:second"));
    }
}
