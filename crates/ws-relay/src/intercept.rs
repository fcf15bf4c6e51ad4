use std::sync::Arc;

use async_trait::async_trait;

use crate::message::RelayMessage;
use crate::session::SessionRef;

/// One interception rule on the upstream→client direction.
///
/// `matches` is a cheap predicate over the parsed message; `apply` runs only
/// for the first matching rule and owns all forwarding for that message: it
/// may mutate, drop, duplicate, or delay the response, and the engine will
/// not send anything on its behalf.
#[async_trait]
pub trait InterceptRule: Send + Sync {
    /// Rule name, for registration and diagnostics.
    fn name(&self) -> &'static str;

    fn matches(&self, msg: &RelayMessage) -> bool;

    async fn apply(&self, msg: &RelayMessage, session: &SessionRef) -> anyhow::Result<()>;
}

/// Ordered first-match-wins rule chain for upstream responses.
///
/// Rules are registered once at startup and immutable afterwards; evaluation
/// order is registration order, and at most one rule's action runs per
/// message.
#[derive(Default)]
pub struct UpstreamInterceptor {
    rules: Vec<Arc<dyn InterceptRule>>,
}

impl UpstreamInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule behind every rule registered so far.
    pub fn register(mut self, rule: Arc<dyn InterceptRule>) -> Self {
        tracing::info!(rule = rule.name(), "registered interceptor rule");
        self.rules.push(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Offer `msg` to the chain.
    ///
    /// Returns `true` if some rule matched (its action ran, successfully or
    /// not; an action error is logged and does not fall through to later
    /// rules); `false` means no rule matched and the caller must forward the
    /// message verbatim.
    pub async fn handle(&self, msg: &RelayMessage, session: &SessionRef) -> bool {
        for rule in &self.rules {
            if !rule.matches(msg) {
                continue;
            }

            if let Err(err) = rule.apply(msg, session).await {
                tracing::error!(rule = rule.name(), %err, "interceptor rule action failed");
            }
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    use crate::session::SessionChannels;

    #[derive(Default)]
    struct RecordingSession {
        to_client: Mutex<Vec<RelayMessage>>,
    }

    #[async_trait]
    impl SessionChannels for RecordingSession {
        fn id(&self) -> Uuid {
            Uuid::nil()
        }

        async fn send_client(&self, msg: &RelayMessage) -> anyhow::Result<()> {
            self.to_client.lock().unwrap().push(msg.clone());
            Ok(())
        }

        async fn send_upstream(&self, _msg: &RelayMessage) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Matches messages whose code equals the configured value and counts
    /// how many times its action ran.
    struct CodeRule {
        name: &'static str,
        code: i64,
        fired: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl InterceptRule for CodeRule {
        fn name(&self) -> &'static str {
            self.name
        }

        fn matches(&self, msg: &RelayMessage) -> bool {
            msg.code == Some(self.code)
        }

        async fn apply(&self, msg: &RelayMessage, session: &SessionRef) -> anyhow::Result<()> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            let mut modified = msg.clone();
            modified
                .extra
                .insert("handled_by".to_string(), self.name.into());
            session.send_client(&modified).await
        }
    }

    struct FailingRule;

    #[async_trait]
    impl InterceptRule for FailingRule {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn matches(&self, _msg: &RelayMessage) -> bool {
            true
        }

        async fn apply(&self, _msg: &RelayMessage, _session: &SessionRef) -> anyhow::Result<()> {
            anyhow::bail!("action exploded")
        }
    }

    fn rule(name: &'static str, code: i64) -> (Arc<CodeRule>, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(CodeRule {
                name,
                code,
                fired: Arc::clone(&fired),
            }),
            fired,
        )
    }

    fn response(code: i64) -> RelayMessage {
        RelayMessage {
            rid: Some("r".to_string()),
            code: Some(code),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unmatched_message_is_not_handled() {
        let (r, fired) = rule("a", 12);
        let interceptor = UpstreamInterceptor::new().register(r);
        let session: SessionRef = Arc::new(RecordingSession::default());

        assert!(!interceptor.handle(&response(0), &session).await);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_match_wins_in_registration_order() {
        let (first, first_fired) = rule("first", 12);
        let (second, second_fired) = rule("second", 12);
        let interceptor = UpstreamInterceptor::new().register(first).register(second);

        let session = Arc::new(RecordingSession::default());
        let session_ref: SessionRef = Arc::clone(&session) as SessionRef;

        assert!(interceptor.handle(&response(12), &session_ref).await);
        assert_eq!(first_fired.load(Ordering::SeqCst), 1);
        assert_eq!(second_fired.load(Ordering::SeqCst), 0);

        let sent = session.to_client.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].extra.get("handled_by").unwrap(), "first");
    }

    #[tokio::test]
    async fn later_rule_matches_when_earlier_does_not() {
        let (first, _) = rule("first", 12);
        let (second, second_fired) = rule("second", 27);
        let interceptor = UpstreamInterceptor::new().register(first).register(second);
        let session: SessionRef = Arc::new(RecordingSession::default());

        assert!(interceptor.handle(&response(27), &session).await);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_action_still_counts_as_handled() {
        let (fallback, fallback_fired) = rule("fallback", 12);
        let interceptor = UpstreamInterceptor::new()
            .register(Arc::new(FailingRule))
            .register(fallback);
        let session: SessionRef = Arc::new(RecordingSession::default());

        // The failing rule matched first: the message counts as handled and
        // must not fall through to the later rule.
        assert!(interceptor.handle(&response(12), &session).await);
        assert_eq!(fallback_fired.load(Ordering::SeqCst), 0);
    }
}
