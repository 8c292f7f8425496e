//! Audit trail of operator commands and lifecycle events.
//!
//! One JSON object per line, appended to the configured file.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Types of events that are logged in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Command executed (including no-op notices)
    CommandApplied,
    /// Command rejected or failed
    CommandFailed,
    /// Line that could not be parsed as a command
    MalformedInput,
    /// Real backend unavailable; running on the simulated bench
    BackendFallback,
    SystemStart,
    SystemShutdown,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic timestamp in microseconds
    pub timestamp_us: u64,
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub event_type: AuditEventType,
    pub details: serde_json::Value,
}

/// Thread-safe audit logger that writes to a JSONL file
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLogger {
    /// Open in append mode, creating parent directories as needed.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
        })
    }

    pub fn log(&self, entry: AuditEntry) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        serde_json::to_writer(&mut *writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn log_event(
        &self,
        timestamp_us: u64,
        unix_us: u64,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> std::io::Result<()> {
        self.log(AuditEntry {
            timestamp_us,
            unix_us,
            event_type,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_audit_logger_appends_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");

        {
            let logger = AuditLogger::new(&path).unwrap();
            logger
                .log_event(
                    1000,
                    1704067200000000,
                    AuditEventType::SystemStart,
                    serde_json::json!({"backend": "simulated"}),
                )
                .unwrap();
        }

        let logger = AuditLogger::new(&path).unwrap();
        logger
            .log_event(
                2000,
                1704067201000000,
                AuditEventType::CommandFailed,
                serde_json::json!({"command": "start_regulation", "kind": "not_ready"}),
            )
            .unwrap();

        let mut content = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();

        let lines: Vec<&str> = content.trim().split('\n').collect();
        assert_eq!(lines.len(), 2);

        let entry1: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry1.timestamp_us, 1000);
        assert_eq!(entry1.event_type, AuditEventType::SystemStart);

        let entry2: AuditEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(entry2.event_type, AuditEventType::CommandFailed);
        assert_eq!(entry2.details["kind"], "not_ready");
    }
}
