use std::net::SocketAddr;
use std::sync::Arc;

use event_log::{EventKind, EventSink, RelayEvent};
use futures_util::StreamExt;
use rate_guard::RateLimiter;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HsRequest, Response as HsResponse,
};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client_ip::resolve_client_ip;
use crate::dispatch::CommandDispatcher;
use crate::intercept::UpstreamInterceptor;
use crate::message::RelayMessage;
use crate::pair::{ClientHandle, ConnectionPair, PairState, SendOutcome};
use crate::session::{SessionChannels, SessionRef};
use crate::upstream;

/// Configuration for the relay engine.
pub struct RelayConfig {
    /// Address to bind the listening socket to.
    pub listen_addr: SocketAddr,
    /// Upstream WebSocket endpoint (`ws://` or `wss://`).
    pub upstream_url: String,
    /// Optional HTTP CONNECT forward proxy for the upstream dial.
    pub forward_proxy: Option<String>,
    /// Commands answered locally instead of being forwarded upstream.
    pub dispatcher: CommandDispatcher,
    /// Rewrite rules applied to upstream responses.
    pub interceptor: UpstreamInterceptor,
    /// Admission budget for new connections, keyed by client address.
    pub connections: Arc<RateLimiter>,
    /// Admission budget for inbound client messages, keyed by client address.
    pub messages: Arc<RateLimiter>,
    /// Durable record of routing decisions.
    pub events: EventSink,
}

/// The MITM relay server.
///
/// Accepts client WebSocket connections, pairs each with an asynchronously
/// dialed upstream connection, and routes every inbound message through the
/// admission gate, the command dispatcher (client→upstream) or the
/// interceptor chain (upstream→client), falling back to verbatim forwarding.
pub struct Relay {
    config: Arc<RelayConfig>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Bind the configured listen address and serve forever.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    ///
    /// Each accepted connection runs in its own task; a stalled or failing
    /// pair never affects the accept loop or other pairs.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, upstream = %self.config.upstream_url, "relay listening");
        self.config
            .events
            .emit(RelayEvent::new(
                EventKind::ListenerStarted,
                serde_json::json!({"addr": addr.to_string()}),
            ))
            .await;

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, remote_addr, config).await {
                    tracing::debug!(%remote_addr, %err, "connection handler ended with error");
                }
            });
        }
    }
}

/// Drive one client connection from handshake through relay and teardown.
async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    config: Arc<RelayConfig>,
) -> anyhow::Result<()> {
    // ------------------------------------------------------------------
    // 1. Complete the WebSocket handshake, capturing the request headers
    //    so the real client address can be resolved behind proxies.
    // ------------------------------------------------------------------
    let captured_headers: Arc<std::sync::Mutex<Option<http::HeaderMap>>> =
        Arc::new(std::sync::Mutex::new(None));
    let captured = Arc::clone(&captured_headers);

    let callback = move |req: &HsRequest, response: HsResponse| -> Result<HsResponse, ErrorResponse> {
        if let Ok(mut guard) = captured.lock() {
            *guard = Some(req.headers().clone());
        }
        Ok(response)
    };

    let mut client_ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;

    let headers = captured_headers
        .lock()
        .ok()
        .and_then(|mut guard| guard.take())
        .unwrap_or_default();
    let ip = resolve_client_ip(&headers, remote_addr);

    // ------------------------------------------------------------------
    // 2. Admission gate. A denied attempt is always actively closed; no
    //    upstream leg is ever opened for it.
    // ------------------------------------------------------------------
    if !config.connections.consume(ip) {
        tracing::warn!(%ip, %remote_addr, "connection budget exhausted; closing connection");
        config
            .events
            .emit(
                RelayEvent::new(
                    EventKind::ConnectionDenied,
                    serde_json::json!({"reason": "connection_rate_limit"}),
                )
                .from_ip(ip),
            )
            .await;
        let _ = client_ws.close(None).await;
        return Ok(());
    }

    // ------------------------------------------------------------------
    // 3. Create the pair and start the upstream dial immediately. Client
    //    traffic that arrives before the dial completes is buffered by the
    //    pair's pending queue.
    // ------------------------------------------------------------------
    let (client_write, client_read) = client_ws.split();
    let pair = Arc::new(ConnectionPair::new(ClientHandle::spawn(client_write), ip));

    tracing::info!(pair = %pair.pair_id(), %ip, %remote_addr, "client connected");
    config
        .events
        .emit(
            RelayEvent::new(
                EventKind::ConnectionOpened,
                serde_json::json!({"remote_addr": remote_addr.to_string()}),
            )
            .for_pair(pair.pair_id())
            .from_ip(ip),
        )
        .await;

    let mut client_task = tokio::spawn(run_client_leg(
        client_read,
        Arc::clone(&pair),
        Arc::clone(&config),
    ));
    let mut upstream_task = tokio::spawn(run_upstream_leg(
        Arc::clone(&pair),
        Arc::clone(&config),
    ));

    // ------------------------------------------------------------------
    // 4. Joint lifecycle: the first leg to finish tears the other down.
    // ------------------------------------------------------------------
    tokio::select! {
        result = &mut client_task => {
            if let Err(err) = result {
                tracing::debug!(pair = %pair.pair_id(), %err, "client leg task ended abnormally");
            }
        }
        result = &mut upstream_task => {
            if let Err(err) = result {
                tracing::debug!(pair = %pair.pair_id(), %err, "upstream leg task ended abnormally");
            }
        }
    }

    pair.transition(PairState::Closing);
    pair.upstream().close().await;
    pair.client().close().await;
    client_task.abort();
    upstream_task.abort();
    pair.transition(PairState::Closed);

    tracing::info!(pair = %pair.pair_id(), %ip, "pair closed");
    config
        .events
        .emit(
            RelayEvent::new(EventKind::PairClosed, serde_json::json!({}))
                .for_pair(pair.pair_id())
                .from_ip(ip),
        )
        .await;

    Ok(())
}

/// Dial upstream, attach the socket to the pair (flushing the pending
/// queue), then relay upstream messages to the client until the leg ends.
async fn run_upstream_leg(pair: Arc<ConnectionPair>, config: Arc<RelayConfig>) {
    let socket =
        match upstream::connect(&config.upstream_url, config.forward_proxy.as_deref()).await {
            Ok(socket) => socket,
            Err(err) => {
                tracing::error!(pair = %pair.pair_id(), %err, "upstream dial failed");
                return;
            }
        };

    let (upstream_write, upstream_read) = socket.split();

    let flushed = match pair.upstream().attach(upstream_write).await {
        Ok(flushed) => flushed,
        Err(err) => {
            // The pair was torn down while the dial was in flight; the
            // freshly dialed socket has already been closed by the link.
            tracing::debug!(pair = %pair.pair_id(), %err, "discarding dialed upstream socket");
            return;
        }
    };

    pair.transition(PairState::Active);
    tracing::info!(pair = %pair.pair_id(), flushed, "upstream connected, pending queue flushed");
    config
        .events
        .emit(
            RelayEvent::new(
                EventKind::UpstreamConnected,
                serde_json::json!({"flushed": flushed}),
            )
            .for_pair(pair.pair_id())
            .from_ip(pair.client_ip()),
        )
        .await;

    relay_upstream_to_client(upstream_read, pair, config).await;
}

/// client→upstream direction: admission, local dispatch, fallback forward.
async fn run_client_leg<R>(mut reader: R, pair: Arc<ConnectionPair>, config: Arc<RelayConfig>)
where
    R: StreamExt<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let ip = pair.client_ip();
    let session: SessionRef = pair.clone();

    while let Some(frame) = reader.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(pair = %pair.pair_id(), %err, "client read error");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                // Message admission gate: a denied message is dropped, the
                // connection stays open, nothing else changes.
                if !config.messages.consume(ip) {
                    tracing::debug!(pair = %pair.pair_id(), %ip, "message budget exhausted; dropping");
                    config
                        .events
                        .emit(
                            RelayEvent::new(
                                EventKind::MessageDropped,
                                serde_json::json!({"reason": "message_rate_limit"}),
                            )
                            .for_pair(pair.pair_id())
                            .from_ip(ip),
                        )
                        .await;
                    continue;
                }

                let msg = match RelayMessage::parse(&text) {
                    Ok(msg) => msg,
                    Err(err) => {
                        tracing::warn!(pair = %pair.pair_id(), %err, "malformed client frame dropped");
                        config
                            .events
                            .emit(
                                RelayEvent::new(
                                    EventKind::MalformedFrame,
                                    serde_json::json!({"direction": "client"}),
                                )
                                .for_pair(pair.pair_id())
                                .from_ip(ip),
                            )
                            .await;
                        continue;
                    }
                };

                // Locally handled command: the original is never forwarded.
                if let Some(command) = msg.command.as_deref() {
                    if config.dispatcher.has(command) {
                        tracing::debug!(pair = %pair.pair_id(), command, "dispatching command locally");

                        match config.dispatcher.dispatch(&session, &msg).await {
                            Ok(Some(reply)) => {
                                if let Err(err) = session.send_client(&reply).await {
                                    tracing::debug!(pair = %pair.pair_id(), %err, "failed to send dispatch reply");
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(err) => {
                                tracing::error!(pair = %pair.pair_id(), command, %err, "command handler failed");
                            }
                        }

                        config
                            .events
                            .emit(
                                RelayEvent::new(
                                    EventKind::CommandDispatched,
                                    serde_json::json!({"command": command}),
                                )
                                .for_pair(pair.pair_id())
                                .from_ip(ip),
                            )
                            .await;
                        continue;
                    }
                }

                // Fallback: forward the original text verbatim, buffering
                // while the upstream dial is still in flight.
                match pair.upstream().send(Message::Text(text)).await {
                    Ok(SendOutcome::Queued) => {
                        tracing::debug!(pair = %pair.pair_id(), "upstream not ready, buffering message");
                    }
                    Ok(SendOutcome::Sent) => {}
                    Err(err) => {
                        tracing::debug!(pair = %pair.pair_id(), %err, "upstream send failed");
                        break;
                    }
                }
            }
            Message::Close(_) => break,
            // Binary, Ping and Pong frames relay without inspection.
            other => {
                if pair.upstream().send(other).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// upstream→client direction: interception, fallback verbatim forward.
async fn relay_upstream_to_client<R>(
    mut reader: R,
    pair: Arc<ConnectionPair>,
    config: Arc<RelayConfig>,
) where
    R: StreamExt<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let session: SessionRef = pair.clone();

    while let Some(frame) = reader.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(pair = %pair.pair_id(), %err, "upstream read error");
                break;
            }
        };

        match frame {
            Message::Text(text) => {
                let msg = match RelayMessage::parse(&text) {
                    Ok(msg) => msg,
                    Err(err) => {
                        tracing::warn!(pair = %pair.pair_id(), %err, "malformed upstream frame dropped");
                        config
                            .events
                            .emit(
                                RelayEvent::new(
                                    EventKind::MalformedFrame,
                                    serde_json::json!({"direction": "upstream"}),
                                )
                                .for_pair(pair.pair_id())
                                .from_ip(pair.client_ip()),
                            )
                            .await;
                        continue;
                    }
                };

                if config.interceptor.handle(&msg, &session).await {
                    config
                        .events
                        .emit(
                            RelayEvent::new(
                                EventKind::ResponseIntercepted,
                                serde_json::json!({"rid": msg.rid}),
                            )
                            .for_pair(pair.pair_id())
                            .from_ip(pair.client_ip()),
                        )
                        .await;
                    continue;
                }

                // No rule matched: the client receives the upstream bytes
                // untouched.
                if pair.client().send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            other => {
                if pair.client().send(other).await.is_err() {
                    break;
                }
            }
        }
    }
}
