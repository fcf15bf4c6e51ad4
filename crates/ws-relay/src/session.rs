use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::message::RelayMessage;

/// Shared reference to the send surface of one proxied session.
pub type SessionRef = Arc<dyn SessionChannels>;

/// The send surface handed to command handlers and interceptor rules.
///
/// A [`ConnectionPair`](crate::pair::ConnectionPair) implements this with a
/// real client leg and upstream leg; a server that answers commands itself
/// (no upstream) implements `send_upstream` as an error.
#[async_trait]
pub trait SessionChannels: Send + Sync {
    /// Identifier of the session, for log correlation.
    fn id(&self) -> Uuid;

    /// Send a message to the downstream client.
    async fn send_client(&self, msg: &RelayMessage) -> anyhow::Result<()>;

    /// Send a message toward the upstream server. Buffers if the upstream
    /// leg is still connecting; fails if it is closed or absent.
    async fn send_upstream(&self, msg: &RelayMessage) -> anyhow::Result<()>;
}
