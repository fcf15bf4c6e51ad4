use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::RelayEvent;
use crate::writer::{EventWriteError, EventWriter};

/// Events buffered between producers and the background writer.
const CHANNEL_BUFFER: usize = 512;

/// Largest batch drained from the channel per write pass.
const BATCH: usize = 64;

/// Idle time after which buffered lines are flushed to disk.
const IDLE_FLUSH: tokio::time::Duration = tokio::time::Duration::from_secs(1);

/// Cheap cloneable handle for submitting [`RelayEvent`]s to the background
/// writer task. Safe to share across every connection pair.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<RelayEvent>,
}

impl EventSink {
    /// Open the log file and spawn the background writer.
    ///
    /// The writer drains events in batches, flushes after ~1s of quiet, and
    /// performs a final flush when the last sink clone is dropped. I/O
    /// errors are logged and the offending event skipped; they never
    /// propagate to producers.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), EventWriteError> {
        let writer = EventWriter::open(path).await?;
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);

        let handle = tokio::spawn(drain_events(writer, rx));

        Ok((Self { tx }, handle))
    }

    /// Submit an event. Waits for channel space; if the writer task has died
    /// the event is dropped with a warning.
    pub async fn emit(&self, event: RelayEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::warn!("event log writer is gone; event dropped");
        }
    }
}

/// Background loop: batch-drain the channel, append, flush on idle and on
/// shutdown.
async fn drain_events(mut writer: EventWriter, mut rx: mpsc::Receiver<RelayEvent>) {
    let mut batch = Vec::with_capacity(BATCH);
    let mut dirty = false;

    loop {
        batch.clear();
        match tokio::time::timeout(IDLE_FLUSH, rx.recv_many(&mut batch, BATCH)).await {
            // Channel closed: flush what we have and exit.
            Ok(0) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "final event log flush failed");
                    }
                }
                tracing::debug!("event log writer shutting down");
                return;
            }
            Ok(_) => {
                for event in &batch {
                    match writer.append(event).await {
                        Ok(()) => dirty = true,
                        Err(err) => tracing::error!(%err, "failed to append event"),
                    }
                }
            }
            // Quiet channel: opportunistic flush.
            Err(_) => {
                if dirty {
                    match writer.flush().await {
                        Ok(()) => dirty = false,
                        Err(err) => tracing::error!(%err, "periodic event log flush failed"),
                    }
                }
            }
        }
    }
}
