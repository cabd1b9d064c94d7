//! ==============================================================================
//! persistence.rs - master log rotation
//! ==============================================================================
//!
//! purpose:
//!     every reset writes the duration totals and raw per-sender logs that
//!     were live before the reset into the current log file, then starts a
//!     new timestamped file for the next session.
//!
//! file layout:
//!
//!     Log File Created: <time>
//!
//!     Masters Summary:
//!     Swarm ID: A, Total Master Duration: 12 seconds
//!
//!     Raw Data Logs:
//!
//!     IP: 192.168.1.20
//!     Time: <time>, Swarm ID: A, Reading: 512
//!
//! ==============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// one accepted datagram, as recorded for its sender address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub value: u16,
}

/// state captured for the log file before a reset clears it
#[derive(Debug, Clone, Default)]
pub struct RotationArchive {
    pub taken_at: DateTime<Utc>,
    /// (node id, master seconds) in first-seen order
    pub durations: Vec<(String, u64)>,
    pub sender_logs: BTreeMap<IpAddr, Vec<LogEntry>>,
}

impl RotationArchive {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let created = self.taken_at.with_timezone(&Local);
        let _ = writeln!(out, "Log File Created: {}\n", created.format("%Y-%m-%d %H:%M:%S%.6f"));

        out.push_str("Masters Summary:\n");
        for (id, seconds) in &self.durations {
            let _ = writeln!(out, "Swarm ID: {}, Total Master Duration: {} seconds", id, seconds);
        }

        out.push_str("\nRaw Data Logs:\n");
        for (ip, entries) in &self.sender_logs {
            let _ = writeln!(out, "\nIP: {}", ip);
            for e in entries {
                let _ = writeln!(
                    out,
                    "Time: {}, Swarm ID: {}, Reading: {}",
                    e.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S%.6f"),
                    e.node_id,
                    e.value
                );
            }
        }
        out
    }
}

/// owns the path of the log file for the current session
#[derive(Debug)]
pub struct LogRotator {
    directory: PathBuf,
    current: PathBuf,
}

impl LogRotator {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .with_context(|| format!("failed to create log directory {}", directory.display()))?;
        let current = next_path(&directory, Local::now());
        tracing::info!("[LOG] New log file: {}", current.display());
        Ok(Self { directory, current })
    }

    #[cfg(test)]
    pub fn current(&self) -> &Path {
        &self.current
    }

    /// write the archive to the current file
    pub fn save(&self, archive: &RotationArchive) -> Result<()> {
        std::fs::write(&self.current, archive.render())
            .with_context(|| format!("failed to write {}", self.current.display()))?;
        tracing::info!("[LOG] Logs saved to {}", self.current.display());
        Ok(())
    }

    /// save into the current file, then move on to a fresh one.
    /// returns the path that was written.
    pub fn rotate(&mut self, archive: &RotationArchive) -> Result<PathBuf> {
        self.save(archive)?;
        let written = std::mem::replace(&mut self.current, next_path(&self.directory, Local::now()));
        tracing::info!("[LOG] New log file: {}", self.current.display());
        Ok(written)
    }
}

/// `master_log_<timestamp>.txt`, suffixed when two rotations share a second
fn next_path(directory: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = format!("master_log_{}", now.format("%Y-%m-%d_%H-%M-%S"));
    let mut path = directory.join(format!("{stem}.txt"));
    let mut n = 1;
    while path.exists() {
        path = directory.join(format!("{stem}_{n}.txt"));
        n += 1;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn archive() -> RotationArchive {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        let now = Utc::now();
        RotationArchive {
            taken_at: now,
            durations: vec![("A".into(), 2), ("B".into(), 1)],
            sender_logs: BTreeMap::from([(
                ip,
                vec![
                    LogEntry { timestamp: now, node_id: "A".into(), value: 100 },
                    LogEntry { timestamp: now, node_id: "B".into(), value: 900 },
                ],
            )]),
        }
    }

    #[test]
    fn test_render_layout() {
        let text = archive().render();
        assert!(text.starts_with("Log File Created: "));
        assert!(text.contains("Masters Summary:\nSwarm ID: A, Total Master Duration: 2 seconds\n"));
        assert!(text.contains("Swarm ID: B, Total Master Duration: 1 seconds"));
        assert!(text.contains("\nIP: 10.0.0.7\n"));
        assert!(text.contains("Swarm ID: B, Reading: 900"));
    }

    #[test]
    fn test_rotate_writes_then_advances() {
        let dir = tempfile::tempdir().unwrap();
        let mut rotator = LogRotator::new(dir.path().join("logs")).unwrap();
        let first = rotator.current().to_path_buf();

        let written = rotator.rotate(&archive()).unwrap();
        assert_eq!(written, first);
        assert!(first.exists());
        assert_ne!(rotator.current(), first.as_path());
        assert!(!rotator.current().exists(), "next file is opened lazily");

        let content = std::fs::read_to_string(&first).unwrap();
        assert!(content.contains("Total Master Duration: 2 seconds"));
    }

    #[test]
    fn test_same_second_rotations_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let mut rotator = LogRotator::new(dir.path()).unwrap();
        let a = rotator.rotate(&archive()).unwrap();
        let b = rotator.rotate(&RotationArchive::default()).unwrap();
        assert_ne!(a, b);
        assert!(a.exists() && b.exists());
        let names: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(names.len(), 2);
    }
}
