use std::net::IpAddr;

use async_trait::async_trait;
use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use uuid::Uuid;

use crate::message::RelayMessage;
use crate::queue::PendingQueue;
use crate::session::SessionChannels;

/// Frames buffered per transport writer before senders are backpressured.
const WRITER_BUFFER: usize = 64;

/// Lifecycle of a connection pair.
///
/// Transitions only move forward: `Connecting` → `Active` → `Closing` →
/// `Closed`, where `Active` may be skipped when a leg dies before the
/// upstream dial completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PairState {
    /// Client accepted, upstream dial in flight.
    Connecting,
    /// Upstream connected and the pending queue flushed; both directions live.
    Active,
    /// One leg closed or errored; the other is being actively closed.
    Closing,
    /// Both legs released.
    Closed,
}

impl PairState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairState::Connecting => "connecting",
            PairState::Active => "active",
            PairState::Closing => "closing",
            PairState::Closed => "closed",
        }
    }
}

/// Errors surfaced by the upstream link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The link (or its writer task) is gone; the frame was not delivered.
    #[error("upstream link is closed")]
    Closed,

    /// A socket was attached to a link that already has one.
    #[error("upstream link already has an attached socket")]
    AlreadyAttached,
}

/// Where a frame handed to [`UpstreamLink::send`] ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Buffered in the pending queue; the dial is still in flight.
    Queued,
    /// Handed to the live writer task.
    Sent,
}

/// Write half of the client leg.
///
/// All writes to the client socket funnel through a single writer task fed
/// by this channel, so concurrent producers (the upstream relay loop, command
/// handlers, rule actions) never interleave partial writes.
#[derive(Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<Message>,
}

impl ClientHandle {
    /// Spawn the writer task over the client's sink half.
    pub fn spawn<S>(sink: S) -> Self
    where
        S: SinkExt<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(WRITER_BUFFER);
        tokio::spawn(run_writer(sink, rx));
        Self { tx }
    }

    /// Queue a frame for the client. Fails once the leg has closed.
    pub async fn send(&self, frame: Message) -> Result<(), LinkError> {
        self.tx.send(frame).await.map_err(|_| LinkError::Closed)
    }

    /// Actively close the client leg. The writer task sends the close frame,
    /// completes the close handshake, and exits.
    pub async fn close(&self) {
        let _ = self.tx.send(Message::Close(None)).await;
    }
}

enum UpstreamState {
    Connecting { queue: PendingQueue },
    Open { tx: mpsc::Sender<Message> },
    Closed,
}

/// Write half of the upstream leg.
///
/// Created in the `Connecting` state before the dial has finished: frames
/// sent in that window are buffered in the pending queue. Attaching the
/// dialed socket drains the queue into the writer channel while holding the
/// state lock, so every buffered frame precedes every post-attach frame in
/// wire order.
pub struct UpstreamLink {
    state: tokio::sync::Mutex<UpstreamState>,
}

impl UpstreamLink {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(UpstreamState::Connecting {
                queue: PendingQueue::new(),
            }),
        }
    }

    /// Send a frame upstream, buffering it while the dial is in flight.
    pub async fn send(&self, frame: Message) -> Result<SendOutcome, LinkError> {
        let mut state = self.state.lock().await;
        match &mut *state {
            UpstreamState::Connecting { queue } => {
                queue.push(frame);
                Ok(SendOutcome::Queued)
            }
            UpstreamState::Open { tx } => {
                if tx.send(frame).await.is_err() {
                    *state = UpstreamState::Closed;
                    return Err(LinkError::Closed);
                }
                Ok(SendOutcome::Sent)
            }
            UpstreamState::Closed => Err(LinkError::Closed),
        }
    }

    /// Attach the dialed upstream socket and flush the pending queue.
    ///
    /// Returns the number of flushed frames. If the link was already torn
    /// down while the dial was in flight, the sink is closed immediately and
    /// `LinkError::Closed` is returned.
    pub async fn attach<S>(&self, sink: S) -> Result<usize, LinkError>
    where
        S: SinkExt<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
    {
        let mut state = self.state.lock().await;
        match &mut *state {
            UpstreamState::Connecting { queue } => {
                let (tx, rx) = mpsc::channel(WRITER_BUFFER);
                tokio::spawn(run_writer(sink, rx));

                let buffered = queue.drain();
                let flushed = buffered.len();
                for frame in buffered {
                    if tx.send(frame).await.is_err() {
                        *state = UpstreamState::Closed;
                        return Err(LinkError::Closed);
                    }
                }

                *state = UpstreamState::Open { tx };
                Ok(flushed)
            }
            UpstreamState::Open { .. } => Err(LinkError::AlreadyAttached),
            UpstreamState::Closed => {
                // Teardown won the race against the dial. Close the fresh
                // socket instead of leaking it half-open.
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(run_writer(sink, rx));
                drop(tx);
                Err(LinkError::Closed)
            }
        }
    }

    /// Actively close the upstream leg. Undelivered queued frames are dropped.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, UpstreamState::Closed) {
            UpstreamState::Connecting { queue } => {
                if !queue.is_empty() {
                    tracing::warn!(
                        dropped = queue.len(),
                        "upstream link closed before dial completed; buffered frames dropped"
                    );
                }
            }
            UpstreamState::Open { tx } => {
                let _ = tx.send(Message::Close(None)).await;
            }
            UpstreamState::Closed => {}
        }
    }

    /// Current state name, for logs and tests.
    pub async fn state_name(&self) -> &'static str {
        match &*self.state.lock().await {
            UpstreamState::Connecting { .. } => "connecting",
            UpstreamState::Open { .. } => "open",
            UpstreamState::Closed => "closed",
        }
    }
}

impl Default for UpstreamLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Single writer loop for one transport. Exits after relaying a close frame
/// or when every sender is gone, then completes the close handshake.
async fn run_writer<S>(mut sink: S, mut rx: mpsc::Receiver<Message>)
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let closing = matches!(frame, Message::Close(_));
        if sink.send(frame).await.is_err() {
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// One proxied session: a client leg coupled to an upstream leg, with the
/// pending-send buffer and the joint lifecycle.
///
/// There is exactly one upstream link per client channel for the pair's
/// lifetime; tearing down either leg closes the other.
pub struct ConnectionPair {
    id: Uuid,
    client_ip: IpAddr,
    client: ClientHandle,
    upstream: UpstreamLink,
    state: parking_lot::Mutex<PairState>,
}

impl ConnectionPair {
    pub fn new(client: ClientHandle, client_ip: IpAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_ip,
            client,
            upstream: UpstreamLink::new(),
            state: parking_lot::Mutex::new(PairState::Connecting),
        }
    }

    pub fn pair_id(&self) -> Uuid {
        self.id
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn upstream(&self) -> &UpstreamLink {
        &self.upstream
    }

    pub fn state(&self) -> PairState {
        *self.state.lock()
    }

    /// Advance the lifecycle. Backward transitions are refused, which makes
    /// teardown races (e.g. a late `Active` after `Closing`) harmless.
    pub fn transition(&self, next: PairState) -> bool {
        let mut state = self.state.lock();
        if next <= *state {
            tracing::debug!(
                pair = %self.id,
                from = state.as_str(),
                to = next.as_str(),
                "ignoring backward pair state transition"
            );
            return false;
        }
        tracing::debug!(pair = %self.id, from = state.as_str(), to = next.as_str(), "pair state");
        *state = next;
        true
    }
}

#[async_trait]
impl SessionChannels for ConnectionPair {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn send_client(&self, msg: &RelayMessage) -> anyhow::Result<()> {
        let text = msg.to_text()?;
        self.client
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| anyhow::anyhow!("client leg of pair {}: {e}", self.id))
    }

    async fn send_upstream(&self, msg: &RelayMessage) -> anyhow::Result<()> {
        let text = msg.to_text()?;
        match self.upstream.send(Message::Text(text.into())).await {
            Ok(SendOutcome::Queued) => {
                tracing::debug!(pair = %self.id, "upstream not ready, buffering message");
                Ok(())
            }
            Ok(SendOutcome::Sent) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("upstream leg of pair {}: {e}", self.id)),
        }
    }
}
