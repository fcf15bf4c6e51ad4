use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use event_log::{EventKind, EventSink, RelayEvent};
use rate_guard::RateLimiter;
use ws_relay::{CommandDispatcher, Relay, RelayConfig, UpstreamInterceptor};
use wsmitm::cli::Cli;
use wsmitm::config;
use wsmitm::rewrite::{InvalidCredentialsRule, StampSessionId};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;

    if let Some(ref listen) = cli.listen {
        cfg.network.listen_addr = listen.clone();
    }
    if let Some(ref upstream) = cli.upstream {
        cfg.network.upstream_url = upstream.clone();
    }
    if let Some(ref proxy) = cli.proxy {
        cfg.network.proxy_enabled = true;
        cfg.network.proxy_url = Some(proxy.clone());
    }
    if let Some(ref path) = cli.event_log {
        cfg.logging.event_log_path = path.clone();
    }

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let forward_proxy = cfg.network.forward_proxy()?;

    info!(
        config_file = %cli.config.display(),
        listen = %cfg.network.listen_addr,
        upstream = %cfg.network.upstream_url,
        proxy = forward_proxy.as_deref().unwrap_or("<disabled>"),
        "wsmitm starting"
    );

    // 4. Start the event log.
    let (events, _events_handle) = EventSink::start(&cfg.logging.event_log_path)
        .await
        .context("failed to start event log")?;

    events
        .emit(RelayEvent::new(
            EventKind::ProcessStarted,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "config_file": cli.config.display().to_string(),
            }),
        ))
        .await;

    // 5. Build the admission budgets. Connections and messages are gated
    //    independently; neither shares points with the other.
    let connections = Arc::new(RateLimiter::new(
        cfg.limits.connection_points,
        cfg.limits.connection_window(),
    ));
    let messages = Arc::new(RateLimiter::new(
        cfg.limits.message_points,
        cfg.limits.message_window(),
    ));

    info!(
        connection_points = cfg.limits.connection_points,
        connection_window_secs = cfg.limits.connection_window_secs,
        message_points = cfg.limits.message_points,
        message_window_secs = cfg.limits.message_window_secs,
        "rate limits configured"
    );

    // 6. Register the locally handled commands.
    let dispatcher = CommandDispatcher::new().register("request_session", Arc::new(StampSessionId));

    // 7. Register the upstream response rules.
    let interceptor = UpstreamInterceptor::new().register(Arc::new(InvalidCredentialsRule));

    info!(
        commands = dispatcher.len(),
        rules = interceptor.len(),
        "injection points registered"
    );

    // 8. Set up shutdown signal (ctrl_c + SIGTERM).
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    let shutdown_tx_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (ctrl-c)");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT (ctrl-c)");
        }

        let _ = shutdown_tx_signal.send(());
    });

    // 9. Build and run the relay.
    let listen_addr = cfg
        .network
        .listen_addr
        .parse()
        .context("invalid listen address")?;

    let relay = Relay::new(RelayConfig {
        listen_addr,
        upstream_url: cfg.network.upstream_url.clone(),
        forward_proxy,
        dispatcher,
        interceptor,
        connections,
        messages,
        events: events.clone(),
    });

    let relay_result;
    tokio::select! {
        r = relay.run() => {
            relay_result = r;
            info!("relay exited");
        }
        _ = shutdown_rx.recv() => {
            relay_result = Ok(());
            info!("shutting down");
        }
    }

    // 10. Log shutdown.
    events
        .emit(RelayEvent::new(
            EventKind::ProcessStopped,
            serde_json::json!({
                "relay_result": format!("{:?}", relay_result),
            }),
        ))
        .await;

    relay_result
}
