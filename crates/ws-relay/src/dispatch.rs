use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::message::RelayMessage;
use crate::session::SessionRef;

/// A locally implemented command.
///
/// Handlers run on the client→upstream direction and may perform I/O. A
/// returned message is sent to the client by the engine; `Ok(None)` means
/// the handler produced no direct reply (it may still have sent traffic
/// itself, e.g. forwarded a rewritten request upstream). Either way the
/// original message is never forwarded upstream verbatim.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        session: &SessionRef,
        msg: &RelayMessage,
    ) -> anyhow::Result<Option<RelayMessage>>;
}

/// Immutable command-name → handler table.
///
/// Built once at startup by explicit registration and read-only afterwards;
/// lookup is a single map read. Registering the same name twice is a
/// misconfiguration: it is logged loudly and the later handler wins.
#[derive(Default)]
pub struct CommandDispatcher {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, consuming and returning `self` so the
    /// full table reads as one chained expression at startup.
    pub fn register(mut self, name: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(command = %name, "duplicate command registration; last handler wins");
        } else {
            tracing::info!(command = %name, "registered command handler");
        }
        self
    }

    /// Whether `name` is handled locally.
    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for the message's command.
    ///
    /// Returns the handler's direct reply, if any. A message without a
    /// command, or with an unregistered one, yields `Ok(None)`; callers are
    /// expected to gate on [`has`](Self::has) first, so that case is logged
    /// as unexpected.
    pub async fn dispatch(
        &self,
        session: &SessionRef,
        msg: &RelayMessage,
    ) -> anyhow::Result<Option<RelayMessage>> {
        let Some(name) = msg.command.as_deref() else {
            tracing::warn!("dispatch called for a message without a command");
            return Ok(None);
        };

        let Some(handler) = self.handlers.get(name) else {
            tracing::warn!(command = %name, "dispatch called for unregistered command");
            return Ok(None);
        };

        handler.handle(session, msg).await
    }
}
