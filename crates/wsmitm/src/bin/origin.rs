//! Mock origin server: answers the reference conversation directly, using
//! the same dispatcher and admission machinery as the relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HsRequest, Response as HsResponse,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use rate_guard::RateLimiter;
use ws_relay::client_ip::resolve_client_ip;
use ws_relay::{ClientHandle, CommandDispatcher, RelayMessage, SessionChannels, SessionRef};
use wsmitm::origin::{self, OriginSession};

#[derive(Parser, Debug)]
#[command(
    name = "wsmitm-origin",
    version,
    about = "Mock origin WebSocket server for the wsmitm demo"
)]
struct Cli {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:9000", env = "WSMITM_ORIGIN_LISTEN")]
    listen: String,

    /// Log level filter
    #[arg(long, default_value = "info", env = "WSMITM_ORIGIN_LOG")]
    log_level: String,
}

struct ServerState {
    dispatcher: CommandDispatcher,
    connections: RateLimiter,
    messages: RateLimiter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let listen_addr: SocketAddr = cli.listen.parse().context("invalid listen address")?;

    let state = Arc::new(ServerState {
        dispatcher: origin::dispatcher(),
        connections: RateLimiter::new(20, Duration::from_secs(5)),
        messages: RateLimiter::new(100, Duration::from_secs(5)),
    });

    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "origin server listening");

    loop {
        let (stream, remote_addr) = listener.accept().await?;
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, remote_addr, state).await {
                debug!(%remote_addr, %err, "connection handler ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<()> {
    let captured_headers: Arc<std::sync::Mutex<Option<http::HeaderMap>>> =
        Arc::new(std::sync::Mutex::new(None));
    let captured = Arc::clone(&captured_headers);

    let callback = move |req: &HsRequest, response: HsResponse| -> Result<HsResponse, ErrorResponse> {
        if let Ok(mut guard) = captured.lock() {
            *guard = Some(req.headers().clone());
        }
        Ok(response)
    };

    let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;

    let headers = captured_headers
        .lock()
        .ok()
        .and_then(|mut guard| guard.take())
        .unwrap_or_default();
    let ip = resolve_client_ip(&headers, remote_addr);

    if !state.connections.consume(ip) {
        warn!(%ip, "connection budget exhausted; closing connection");
        let _ = ws.close(None).await;
        return Ok(());
    }

    let (write, mut read) = ws.split();
    let session = Arc::new(OriginSession::new(ClientHandle::spawn(write)));
    let session_ref: SessionRef = Arc::clone(&session) as SessionRef;

    info!(session = %session.id(), %ip, "client connected");

    while let Some(frame) = read.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(session = %session.id(), %err, "read error");
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        if !state.messages.consume(ip) {
            debug!(session = %session.id(), %ip, "message budget exhausted; dropping");
            continue;
        }

        let msg = match RelayMessage::parse(&text) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(session = %session.id(), %err, "malformed frame dropped");
                continue;
            }
        };

        let Some(command) = msg.command.clone() else {
            warn!(session = %session.id(), "frame without a command ignored");
            continue;
        };

        if !state.dispatcher.has(&command) {
            warn!(session = %session.id(), %command, "unknown command");
            continue;
        }

        match state.dispatcher.dispatch(&session_ref, &msg).await {
            Ok(Some(reply)) => {
                if let Err(err) = session.send_client(&reply).await {
                    debug!(session = %session.id(), %err, "failed to send reply");
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(session = %session.id(), %command, %err, "command handler failed");
            }
        }
    }

    session.client_handle().close().await;
    info!(session = %session.id(), "client disconnected");

    Ok(())
}
