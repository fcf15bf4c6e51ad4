use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use ws_relay::RelayMessage;

/// In-flight request table correlating responses to waiting callers by `rid`.
///
/// Every request owns an explicit completion token: [`register`] hands the
/// caller the receiving end, and the matching response resolves it exactly
/// once, removing the entry. Nothing is shared beyond this table and nothing
/// survives its owner.
///
/// [`register`]: PendingRequests::register
#[derive(Default)]
pub struct PendingRequests {
    waiting: Mutex<HashMap<String, oneshot::Sender<RelayMessage>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a completion token for `rid`.
    ///
    /// Registering a `rid` that is already pending replaces the old token;
    /// its waiter observes a dropped channel.
    pub fn register(&self, rid: impl Into<String>) -> oneshot::Receiver<RelayMessage> {
        let rid = rid.into();
        let (tx, rx) = oneshot::channel();
        if self.waiting.lock().insert(rid.clone(), tx).is_some() {
            tracing::warn!(%rid, "replaced pending request with a duplicate rid");
        }
        rx
    }

    /// Resolve the caller waiting on `rid` with `msg`.
    ///
    /// Returns `false` when no caller is waiting (or the waiter gave up).
    pub fn complete(&self, rid: &str, msg: RelayMessage) -> bool {
        match self.waiting.lock().remove(rid) {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(rid: &str) -> RelayMessage {
        RelayMessage {
            rid: Some(rid.to_string()),
            code: Some(0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn completion_resolves_the_registered_waiter() {
        let pending = PendingRequests::new();
        let rx = pending.register("r-1");

        assert!(pending.complete("r-1", response("r-1")));
        let msg = rx.await.unwrap();
        assert_eq!(msg.rid.as_deref(), Some("r-1"));
    }

    #[test]
    fn completing_an_unknown_rid_is_a_no_op() {
        let pending = PendingRequests::new();
        assert!(!pending.complete("ghost", response("ghost")));
    }

    #[test]
    fn entries_are_removed_on_completion() {
        let pending = PendingRequests::new();
        let _rx = pending.register("r-2");
        assert_eq!(pending.len(), 1);

        pending.complete("r-2", response("r-2"));
        assert!(pending.is_empty());
        assert!(!pending.complete("r-2", response("r-2")));
    }

    #[tokio::test]
    async fn duplicate_registration_replaces_the_old_token() {
        let pending = PendingRequests::new();
        let old_rx = pending.register("r-3");
        let new_rx = pending.register("r-3");
        assert_eq!(pending.len(), 1);

        pending.complete("r-3", response("r-3"));
        assert!(old_rx.await.is_err(), "old waiter sees a dropped channel");
        assert!(new_rx.await.is_ok());
    }

    #[test]
    fn dropped_waiter_makes_completion_report_false() {
        let pending = PendingRequests::new();
        let rx = pending.register("r-4");
        drop(rx);
        assert!(!pending.complete("r-4", response("r-4")));
    }
}
