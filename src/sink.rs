use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::Error;

pub const TOPIC_CAPACITY: usize = 16;

/// Destination of the per-cycle JSON lines.
pub trait Sink: Send + Sync {
    /// Publishes one line; `line` carries no trailing newline.
    fn publish(&self, line: &str) -> Result<(), Error>;
}

/// Appends lines to a file or named pipe.
///
/// Each line and its newline go out in one write under the lock, so lines
/// from concurrent cycles never interleave.
#[derive(Debug)]
pub struct PipeSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl PipeSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("publishing detections to {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for PipeSink {
    fn publish(&self, line: &str) -> Result<(), Error> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(buf.as_bytes())?;
        file.flush()?;

        Ok(())
    }
}

/// In-process publish/subscribe topic.
#[derive(Debug, Clone)]
pub struct TopicSink {
    tx: broadcast::Sender<String>,
}

impl Default for TopicSink {
    fn default() -> Self {
        Self::new(TOPIC_CAPACITY)
    }
}

impl TopicSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Sink for TopicSink {
    fn publish(&self, line: &str) -> Result<(), Error> {
        // no subscriber is not an error
        if self.tx.send(line.to_string()).is_err() {
            debug!("no subscriber for {}", line);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pipe_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detection.fifo");
        std::fs::write(&path, "[]\n").unwrap();

        let sink = PipeSink::open(&path).unwrap();
        sink.publish(r#"[{"class":0}]"#).unwrap();
        sink.publish("[]").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "[]\n[{\"class\":0}]\n[]\n");
    }

    #[test]
    fn concurrent_lines_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let sink = Arc::new(PipeSink::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    let line = i.to_string().repeat(512);
                    for _ in 0..20 {
                        sink.publish(&line).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 80);
        for line in lines {
            assert_eq!(line.len(), 512);
            assert!(line.chars().all(|c| c == line.chars().next().unwrap()));
        }
    }

    #[test]
    fn pipe_sink_fails_on_missing_dir() {
        assert!(PipeSink::open("/nonexistent/dir/detection.fifo").is_err());
    }

    #[test]
    fn topic_sink_without_subscriber() {
        let sink = TopicSink::default();
        assert!(sink.publish("[]").is_ok());

        let mut rx = sink.subscribe();
        sink.publish("[1]").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "[1]");
    }
}
