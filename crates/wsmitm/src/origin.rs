//! Origin-side command handlers for the mock upstream server.
//!
//! These answer the reference conversation (`request_session`, `login`,
//! `get_rates`) directly, exercising the same dispatcher machinery as the
//! relay but without an upstream leg of their own.

use async_trait::async_trait;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use ws_relay::{
    ClientHandle, CommandDispatcher, CommandHandler, RelayMessage, SessionChannels, SessionRef,
};

use crate::ids::generate_sid;

/// Credentials the mock origin accepts.
pub const DEMO_USERNAME: &str = "demo";
pub const DEMO_PASSWORD: &str = "demo-pass-123";

/// Response code for a rejected login.
const CODE_INVALID_CREDENTIALS: i64 = 12;

/// A server-side connection: one client leg, no upstream.
pub struct OriginSession {
    id: Uuid,
    client: ClientHandle,
}

impl OriginSession {
    pub fn new(client: ClientHandle) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
        }
    }

    pub fn client_handle(&self) -> &ClientHandle {
        &self.client
    }
}

#[async_trait]
impl SessionChannels for OriginSession {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn send_client(&self, msg: &RelayMessage) -> anyhow::Result<()> {
        let text = msg.to_text()?;
        self.client
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| anyhow::anyhow!("client leg of session {}: {e}", self.id))
    }

    async fn send_upstream(&self, _msg: &RelayMessage) -> anyhow::Result<()> {
        anyhow::bail!("origin server has no upstream leg")
    }
}

/// The full origin command table.
pub fn dispatcher() -> CommandDispatcher {
    CommandDispatcher::new()
        .register("request_session", std::sync::Arc::new(RequestSession))
        .register("login", std::sync::Arc::new(Login))
        .register("get_rates", std::sync::Arc::new(GetRates))
}

/// Issues a fresh session id with the gateway context the client expects.
pub struct RequestSession;

#[async_trait]
impl CommandHandler for RequestSession {
    async fn handle(
        &self,
        _session: &SessionRef,
        msg: &RelayMessage,
    ) -> anyhow::Result<Option<RelayMessage>> {
        let sid = generate_sid();
        Ok(Some(RelayMessage {
            rid: msg.rid.clone(),
            code: Some(0),
            data: Some(serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "sid": sid,
                "recaptcha_enabled": false,
            })),
            ..Default::default()
        }))
    }
}

/// Validates the demo credentials.
///
/// A rejected login carries the `InvalidUsernamePassword` detail key that
/// the relay's interceptor rule keys on.
pub struct Login;

#[async_trait]
impl CommandHandler for Login {
    async fn handle(
        &self,
        _session: &SessionRef,
        msg: &RelayMessage,
    ) -> anyhow::Result<Option<RelayMessage>> {
        let username = msg
            .params
            .as_ref()
            .and_then(|p| p.get("username"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let password = msg
            .params
            .as_ref()
            .and_then(|p| p.get("password"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let response = if username == DEMO_USERNAME && password == DEMO_PASSWORD {
            let mut extra = serde_json::Map::new();
            extra.insert("msg".to_string(), "Login successful".into());
            RelayMessage {
                rid: msg.rid.clone(),
                code: Some(0),
                data: Some(serde_json::json!({"status": "authenticated"})),
                extra,
                ..Default::default()
            }
        } else {
            tracing::info!(%username, "rejecting login with invalid credentials");
            let mut extra = serde_json::Map::new();
            extra.insert("msg".to_string(), "Invalid credentials".into());
            RelayMessage {
                rid: msg.rid.clone(),
                code: Some(CODE_INVALID_CREDENTIALS),
                data: Some(serde_json::json!({
                    "status": 1002,
                    "details": {
                        "Key": "InvalidUsernamePassword",
                        "Message": "Invalid username and/or password",
                    },
                })),
                extra,
                ..Default::default()
            }
        };

        Ok(Some(response))
    }
}

/// Returns the static demo rate table.
pub struct GetRates;

#[async_trait]
impl CommandHandler for GetRates {
    async fn handle(
        &self,
        _session: &SessionRef,
        msg: &RelayMessage,
    ) -> anyhow::Result<Option<RelayMessage>> {
        let rates = [("USD", 1.0, true), ("EUR", 0.92, true), ("BTC", 0.000016, false)];
        let currencies: Vec<serde_json::Value> = rates
            .iter()
            .map(|(currency, amount, fiat)| {
                serde_json::json!({
                    "currency": currency,
                    "amount": amount,
                    "fiat": fiat,
                })
            })
            .collect();

        Ok(Some(RelayMessage {
            rid: msg.rid.clone(),
            code: Some(0),
            data: Some(serde_json::json!({
                "result": 0,
                "details": { "currencies": currencies },
            })),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct NullSession {
        to_client: Mutex<Vec<RelayMessage>>,
    }

    #[async_trait]
    impl SessionChannels for NullSession {
        fn id(&self) -> Uuid {
            Uuid::nil()
        }

        async fn send_client(&self, msg: &RelayMessage) -> anyhow::Result<()> {
            self.to_client.lock().unwrap().push(msg.clone());
            Ok(())
        }

        async fn send_upstream(&self, _msg: &RelayMessage) -> anyhow::Result<()> {
            anyhow::bail!("no upstream")
        }
    }

    fn session() -> SessionRef {
        Arc::new(NullSession::default())
    }

    fn request(command: &str, params: serde_json::Value) -> RelayMessage {
        RelayMessage {
            command: Some(command.to_string()),
            rid: Some("rid-1".to_string()),
            params: Some(params),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn request_session_issues_a_fresh_sid() {
        let reply = RequestSession
            .handle(&session(), &request("request_session", serde_json::json!({})))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.rid.as_deref(), Some("rid-1"));
        assert_eq!(reply.code, Some(0));
        let sid = reply.data.unwrap()["sid"].as_str().unwrap().to_string();
        assert_eq!(sid.len(), 32);
    }

    #[tokio::test]
    async fn login_accepts_the_demo_credentials() {
        let params = serde_json::json!({
            "username": DEMO_USERNAME,
            "password": DEMO_PASSWORD,
        });
        let reply = Login
            .handle(&session(), &request("login", params))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.code, Some(0));
        assert_eq!(reply.data.unwrap()["status"], "authenticated");
    }

    #[tokio::test]
    async fn login_rejects_wrong_credentials_with_the_interceptable_key() {
        let params = serde_json::json!({
            "username": DEMO_USERNAME,
            "password": "nope",
        });
        let reply = Login
            .handle(&session(), &request("login", params))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.code, Some(CODE_INVALID_CREDENTIALS));
        assert_eq!(
            reply.data_path(&["details", "Key"]).unwrap(),
            "InvalidUsernamePassword"
        );
    }

    #[tokio::test]
    async fn login_without_params_is_rejected() {
        let msg = RelayMessage {
            command: Some("login".to_string()),
            rid: Some("rid-2".to_string()),
            ..Default::default()
        };
        let reply = Login.handle(&session(), &msg).await.unwrap().unwrap();
        assert_eq!(reply.code, Some(CODE_INVALID_CREDENTIALS));
    }

    #[tokio::test]
    async fn get_rates_lists_the_demo_currencies() {
        let reply = GetRates
            .handle(&session(), &request("get_rates", serde_json::json!({})))
            .await
            .unwrap()
            .unwrap();

        let data = reply.data.unwrap();
        let currencies = data["details"]["currencies"].as_array().unwrap();
        assert_eq!(currencies.len(), 3);
        assert_eq!(currencies[0]["currency"], "USD");
        assert_eq!(currencies[2]["fiat"], false);
    }

    #[test]
    fn dispatcher_registers_the_full_conversation() {
        let dispatcher = dispatcher();
        assert!(dispatcher.has("request_session"));
        assert!(dispatcher.has("login"));
        assert!(dispatcher.has("get_rates"));
        assert_eq!(dispatcher.len(), 3);
    }
}
