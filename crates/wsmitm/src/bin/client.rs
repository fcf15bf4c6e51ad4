//! Demo client driving the reference conversation through the relay:
//! `request_session` → `login` with the received sid → `get_rates`.
//!
//! The default password is deliberately wrong so that a full
//! relay+origin stack demonstrates the invalid-credentials interception;
//! pass the demo credentials to see a clean login instead.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{info, warn};

use ws_relay::RelayMessage;
use wsmitm::correlate::PendingRequests;
use wsmitm::ids::{generate_client_tag, generate_rid};
use wsmitm::origin::DEMO_USERNAME;

#[derive(Parser, Debug)]
#[command(
    name = "wsmitm-client",
    version,
    about = "Demo client for the wsmitm relay"
)]
struct Cli {
    /// WebSocket endpoint to connect to (the relay, or an origin directly)
    #[arg(long, default_value = "ws://127.0.0.1:8080", env = "WSMITM_CLIENT_URL")]
    url: String,

    /// Username sent in the login request
    #[arg(long, default_value = DEMO_USERNAME)]
    username: String,

    /// Password sent in the login request
    #[arg(long, default_value = "let-me-in")]
    password: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(url = %cli.url, "connecting");
    let (ws, _) = tokio_tungstenite::connect_async(cli.url.as_str())
        .await
        .context("failed to connect")?;
    let (mut write, mut read) = ws.split();

    // Responses are matched to requests through per-request completion
    // tokens; the reader task resolves them as frames arrive.
    let pending = Arc::new(PendingRequests::new());
    let reader_pending = Arc::clone(&pending);

    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match RelayMessage::parse(&text) {
                    Ok(msg) => match msg.rid.clone() {
                        Some(rid) => {
                            if !reader_pending.complete(&rid, msg) {
                                warn!(%rid, "no pending request for response");
                            }
                        }
                        None => info!(frame = %text, "unsolicited server message"),
                    },
                    Err(err) => warn!(%err, "unparseable server frame"),
                },
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        info!("server connection closed");
    });

    // Step 1: request a session.
    let session_resp = request(
        &mut write,
        &pending,
        RelayMessage {
            command: Some("request_session".to_string()),
            rid: Some(generate_rid()),
            params: Some(serde_json::json!({
                "language": "en",
                "site_id": 0,
                "afec": generate_client_tag(),
            })),
            ..Default::default()
        },
    )
    .await?;

    let sid = session_resp
        .data
        .as_ref()
        .and_then(|d| d.get("sid"))
        .and_then(|v| v.as_str())
        .context("session response carried no sid")?
        .to_string();
    info!(%sid, "session established");

    // Step 2: fetch the rate table.
    let rates_resp = request(
        &mut write,
        &pending,
        RelayMessage {
            command: Some("get_rates".to_string()),
            rid: Some(generate_rid()),
            params: Some(serde_json::json!({ "currencies": ["USD", "EUR"] })),
            ..Default::default()
        },
    )
    .await?;

    if let Some(currencies) = rates_resp.data_path(&["details", "currencies"]) {
        info!(%currencies, "rates received");
    } else {
        warn!("rates response had an unexpected shape");
    }

    // Step 3: log in with the received sid.
    let mut extra = serde_json::Map::new();
    extra.insert("sid".to_string(), sid.into());
    let login_resp = request(
        &mut write,
        &pending,
        RelayMessage {
            command: Some("login".to_string()),
            rid: Some(generate_rid()),
            params: Some(serde_json::json!({
                "username": cli.username,
                "password": cli.password,
                "encrypted_token": true,
            })),
            extra,
            ..Default::default()
        },
    )
    .await?;

    match login_resp.code {
        Some(0) => info!("login successful"),
        Some(12) => {
            let intercepted = login_resp
                .data_path(&["intercepted"])
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            warn!(intercepted, "login rejected: invalid credentials");
        }
        other => warn!(code = ?other, "login failed"),
    }

    write.close().await.ok();
    Ok(())
}

/// Send one request and wait for its correlated response.
async fn request<S>(
    write: &mut S,
    pending: &PendingRequests,
    msg: RelayMessage,
) -> Result<RelayMessage>
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let rid = msg.rid.clone().context("request requires a rid")?;
    let rx = pending.register(&rid);

    write
        .send(Message::Text(msg.to_text()?.into()))
        .await
        .context("failed to send request")?;

    let reply = tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .context("timed out waiting for response")?
        .context("connection closed before the response arrived")?;

    Ok(reply)
}
