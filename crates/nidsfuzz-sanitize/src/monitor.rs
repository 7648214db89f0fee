//! Tails a NIDS log file, parsing new lines into alerts and appending them
//! to a per-file FIFO. One tailer per configured platform.

use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use nidsfuzz_core::error::Result;

use crate::bundle::Alert;

/// Polling interval between re-stats of the log file, used to detect
/// rotation (inode change or truncate-and-regrow).
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A cloneable remote control for a spawned [`AlertMonitor::run`] task,
/// obtained before the monitor itself is moved into the task.
#[derive(Clone)]
pub struct MonitorHandle {
    paused: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Stops the monitor from enqueueing newly-tailed alerts, so the aligner
    /// can drain its in-flight queue without new arrivals racing the drain.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

pub struct AlertMonitor {
    path: PathBuf,
    pattern: Regex,
    fifo: Arc<Mutex<VecDeque<Alert>>>,
    paused: Arc<AtomicBool>,
}

impl AlertMonitor {
    pub fn new(path: PathBuf, pattern: Regex) -> AlertMonitor {
        AlertMonitor {
            path,
            pattern,
            fifo: Arc::new(Mutex::new(VecDeque::new())),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fifo(&self) -> Arc<Mutex<VecDeque<Alert>>> {
        self.fifo.clone()
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle { paused: self.paused.clone() }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Runs forever, following the file across rotations. Intended to be
    /// spawned as its own task; cancel by dropping the `JoinHandle`.
    pub async fn run(self) -> Result<()> {
        let mut file = std::fs::File::open(&self.path)?;
        let mut offset = file.seek(SeekFrom::End(0))?;
        let mut inode = file_identity(&self.path)?;
        let mut pending = String::new();

        loop {
            sleep(POLL_INTERVAL).await;

            let current_identity = match file_identity(&self.path) {
                Ok(id) => id,
                Err(_) => continue,
            };

            if current_identity != inode {
                file = std::fs::File::open(&self.path)?;
                offset = 0;
                inode = current_identity;
            }

            let metadata = file.metadata()?;
            if metadata.len() < offset {
                // Truncated-and-regrown: restart from the top.
                offset = 0;
            }

            file.seek(SeekFrom::Start(offset))?;
            let mut chunk = String::new();
            let read = file.read_to_string(&mut chunk).unwrap_or(0);
            offset += read as u64;

            pending.push_str(&chunk);

            while let Some(newline_at) = pending.find('\n') {
                let line = pending[..newline_at].to_string();
                pending.drain(..=newline_at);

                if let Some(alert) = self.parse_line(&line) {
                    if self.paused.load(Ordering::SeqCst) {
                        // Still read to keep the offset moving, but do not
                        // enqueue: the aligner needs a quiescent FIFO.
                        continue;
                    }
                    self.fifo.lock().await.push_back(alert);
                }
            }
        }
    }

    fn parse_line(&self, line: &str) -> Option<Alert> {
        let caps = self.pattern.captures(line)?;
        Some(Alert {
            rule_id: caps.name("rule_id")?.as_str().to_string(),
            src_ip: caps.name("src_ip")?.as_str().parse::<IpAddr>().ok()?,
            src_port: caps.name("src_port")?.as_str().parse().ok()?,
            dst_ip: caps.name("dst_ip")?.as_str().parse::<IpAddr>().ok()?,
            dst_port: caps.name("dst_port")?.as_str().parse().ok()?,
        })
    }
}

fn file_identity(path: &std::path::Path) -> Result<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    let metadata = std::fs::metadata(path)?;
    Ok((metadata.dev(), metadata.ino()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> Regex {
        Regex::new(
            r"rule_id=(?P<rule_id>\S+) src=(?P<src_ip>[0-9.]+):(?P<src_port>\d+) dst=(?P<dst_ip>[0-9.]+):(?P<dst_port>\d+)",
        )
        .unwrap()
    }

    #[test]
    fn parses_a_well_formed_line() {
        let monitor = AlertMonitor::new(PathBuf::from("/dev/null"), pattern());
        let alert = monitor
            .parse_line("rule_id=1:1001:1 src=10.0.0.1:4444 dst=10.0.0.2:80")
            .unwrap();
        assert_eq!(alert.rule_id, "1:1001:1");
        assert_eq!(alert.src_port, 4444);
        assert_eq!(alert.dst_port, 80);
    }

    #[test]
    fn drops_unparseable_lines_silently() {
        let monitor = AlertMonitor::new(PathBuf::from("/dev/null"), pattern());
        assert!(monitor.parse_line("not a log line").is_none());
    }
}
