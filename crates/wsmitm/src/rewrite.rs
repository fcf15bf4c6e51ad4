//! The relay-side injection leaves: the command handler and interceptor
//! rule registered by the wsmitm binary.

use async_trait::async_trait;
use serde_json::Value;

use ws_relay::{CommandHandler, InterceptRule, RelayMessage, SessionChannels, SessionRef};

use crate::ids::generate_sid;

/// Rewrites `request_session` requests before they reach upstream.
///
/// The client's own session id (if any) is replaced with a freshly generated
/// one, and the rewritten request is forwarded upstream by the handler
/// itself; there is no direct reply, so the engine sends nothing to the
/// client and the upstream's answer flows back through the normal path.
pub struct StampSessionId;

#[async_trait]
impl CommandHandler for StampSessionId {
    async fn handle(
        &self,
        session: &SessionRef,
        msg: &RelayMessage,
    ) -> anyhow::Result<Option<RelayMessage>> {
        let sid = generate_sid();
        let mut rewritten = msg.clone();

        match rewritten.params.as_mut() {
            Some(Value::Object(params)) => {
                params.insert("sid".to_string(), Value::String(sid));
            }
            _ => {
                rewritten.params = Some(serde_json::json!({ "sid": sid }));
            }
        }

        tracing::info!(rid = ?msg.rid, "stamped fresh session id into request_session");

        session.send_upstream(&rewritten).await?;
        Ok(None)
    }
}

/// Marks upstream login-failure responses before the client sees them.
///
/// Matches responses whose `data.details.Key` is `InvalidUsernamePassword`,
/// sets `data.intercepted = true`, and delivers the modified message to the
/// client in place of the raw upstream payload.
pub struct InvalidCredentialsRule;

#[async_trait]
impl InterceptRule for InvalidCredentialsRule {
    fn name(&self) -> &'static str {
        "invalid_credentials"
    }

    fn matches(&self, msg: &RelayMessage) -> bool {
        msg.data_path(&["details", "Key"]).and_then(Value::as_str)
            == Some("InvalidUsernamePassword")
    }

    async fn apply(&self, msg: &RelayMessage, session: &SessionRef) -> anyhow::Result<()> {
        let mut modified = msg.clone();
        if let Some(Value::Object(data)) = modified.data.as_mut() {
            data.insert("intercepted".to_string(), Value::Bool(true));
        }

        tracing::info!(rid = ?msg.rid, "marked invalid-credentials response");

        session.send_client(&modified).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    use ws_relay::SessionChannels;

    #[derive(Default)]
    struct RecordingSession {
        to_client: Mutex<Vec<RelayMessage>>,
        to_upstream: Mutex<Vec<RelayMessage>>,
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

        async fn send_upstream(&self, msg: &RelayMessage) -> anyhow::Result<()> {
            self.to_upstream.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn stamp_session_id_forwards_rewritten_request_upstream() {
        let session = Arc::new(RecordingSession::default());
        let session_ref: SessionRef = Arc::clone(&session) as SessionRef;

        let msg = RelayMessage::parse(
            r#"{"command":"request_session","rid":"r-1","params":{"language":"en","sid":"stale"}}"#,
        )
        .unwrap();

        let reply = StampSessionId.handle(&session_ref, &msg).await.unwrap();
        assert!(reply.is_none(), "handler forwards itself, no direct reply");

        let forwarded = session.to_upstream.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        let params = forwarded[0].params.as_ref().unwrap();
        let sid = params["sid"].as_str().unwrap();
        assert_eq!(sid.len(), 32);
        assert_ne!(sid, "stale");
        // Other params survive the rewrite.
        assert_eq!(params["language"], "en");
        assert!(session.to_client.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stamp_session_id_creates_params_when_missing() {
        let session = Arc::new(RecordingSession::default());
        let session_ref: SessionRef = Arc::clone(&session) as SessionRef;

        let msg = RelayMessage::parse(r#"{"command":"request_session","rid":"r-2"}"#).unwrap();
        StampSessionId.handle(&session_ref, &msg).await.unwrap();

        let forwarded = session.to_upstream.lock().unwrap();
        assert!(forwarded[0].params.as_ref().unwrap()["sid"].is_string());
    }

    #[tokio::test]
    async fn rule_matches_only_the_invalid_credentials_key() {
        let matching = RelayMessage::parse(
            r#"{"rid":"r","code":12,"data":{"details":{"Key":"InvalidUsernamePassword"}}}"#,
        )
        .unwrap();
        let other_key = RelayMessage::parse(
            r#"{"rid":"r","code":12,"data":{"details":{"Key":"AccountLocked"}}}"#,
        )
        .unwrap();
        let no_data = RelayMessage::parse(r#"{"rid":"r","code":0}"#).unwrap();

        assert!(InvalidCredentialsRule.matches(&matching));
        assert!(!InvalidCredentialsRule.matches(&other_key));
        assert!(!InvalidCredentialsRule.matches(&no_data));
    }

    #[tokio::test]
    async fn rule_sends_marked_copy_to_the_client() {
        let session = Arc::new(RecordingSession::default());
        let session_ref: SessionRef = Arc::clone(&session) as SessionRef;

        let msg = RelayMessage::parse(
            r#"{"rid":"r","code":12,"data":{"status":1002,"details":{"Key":"InvalidUsernamePassword"}}}"#,
        )
        .unwrap();

        InvalidCredentialsRule.apply(&msg, &session_ref).await.unwrap();

        let sent = session.to_client.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let data = sent[0].data.as_ref().unwrap();
        assert_eq!(data["intercepted"], true);
        assert_eq!(data["status"], 1002);
        assert_eq!(data["details"]["Key"], "InvalidUsernamePassword");
    }
}
