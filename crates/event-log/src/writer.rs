use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::event::RelayEvent;

#[derive(Debug, thiserror::Error)]
pub enum EventWriteError {
    #[error("failed to create event log directory: {0}")]
    CreateDir(std::io::Error),

    #[error("failed to open event log file: {0}")]
    Open(std::io::Error),

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write event log: {0}")]
    Write(std::io::Error),

    #[error("failed to flush event log: {0}")]
    Flush(std::io::Error),
}

/// Buffered append-only writer producing one JSON object per line.
pub struct EventWriter {
    out: BufWriter<File>,
}

impl EventWriter {
    /// Open (or create) the log file at `path` for appending, creating
    /// missing parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EventWriteError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(EventWriteError::CreateDir)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(EventWriteError::Open)?;

        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Append one event as a newline-terminated JSON line.
    pub async fn append(&mut self, event: &RelayEvent) -> Result<(), EventWriteError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.out
            .write_all(&line)
            .await
            .map_err(EventWriteError::Write)
    }

    /// Push buffered lines down to the file.
    pub async fn flush(&mut self) -> Result<(), EventWriteError> {
        self.out.flush().await.map_err(EventWriteError::Flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("event-log-test-{}-{name}.jsonl", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn writes_one_line_per_event() {
        let path = scratch_path("lines");
        let mut writer = EventWriter::open(&path).await.unwrap();

        for i in 0..3 {
            let event =
                RelayEvent::new(EventKind::ConnectionOpened, serde_json::json!({"seq": i}));
            writer.append(&event).await.unwrap();
        }
        writer.flush().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        for (i, line) in lines.iter().enumerate() {
            let event: RelayEvent = serde_json::from_str(line).unwrap();
            assert_eq!(event.details["seq"], i);
        }

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn reopening_appends_rather_than_truncates() {
        let path = scratch_path("append");

        let mut writer = EventWriter::open(&path).await.unwrap();
        writer
            .append(&RelayEvent::new(EventKind::ProcessStarted, serde_json::json!({})))
            .await
            .unwrap();
        writer.flush().await.unwrap();
        drop(writer);

        let mut writer = EventWriter::open(&path).await.unwrap();
        writer
            .append(&RelayEvent::new(EventKind::ProcessStopped, serde_json::json!({})))
            .await
            .unwrap();
        writer.flush().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
