use http::Uri;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{client_async_tls_with_config, connect_async, MaybeTlsStream, WebSocketStream};

/// Upper bound on the proxy's CONNECT response head.
const MAX_PROXY_RESPONSE: usize = 8 * 1024;

/// The dialed upstream socket type, identical for direct and proxied dials.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("invalid upstream url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid forward proxy url '{url}': {reason}")]
    InvalidProxy { url: String, reason: String },

    #[error("forward proxy i/o failed: {0}")]
    ProxyIo(#[from] std::io::Error),

    #[error("forward proxy refused the tunnel: {0}")]
    ProxyRefused(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
}

/// Dial the upstream WebSocket endpoint, optionally tunneling through an
/// HTTP CONNECT forward proxy.
pub async fn connect(url: &str, proxy: Option<&str>) -> Result<UpstreamSocket, DialError> {
    match proxy {
        None => {
            let (socket, _) = connect_async(url).await?;
            Ok(socket)
        }
        Some(proxy_url) => connect_via_proxy(url, proxy_url).await,
    }
}

/// Open a TCP connection to the proxy, establish a CONNECT tunnel to the
/// upstream host, then run the WebSocket client handshake over the tunnel.
async fn connect_via_proxy(url: &str, proxy_url: &str) -> Result<UpstreamSocket, DialError> {
    let (host, port) = upstream_host_port(url)?;
    let proxy_addr = proxy_authority(proxy_url)?;

    tracing::debug!(%proxy_addr, tunnel = %format!("{host}:{port}"), "opening CONNECT tunnel");

    let mut stream = TcpStream::connect(&proxy_addr).await?;

    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: keep-alive\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let head = read_response_head(&mut stream).await?;
    check_connect_response(&head)?;

    let (socket, _) = client_async_tls_with_config(url, stream, None, None).await?;
    Ok(socket)
}

/// Extract the `host:port` CONNECT target from the upstream url, defaulting
/// the port from the scheme (`ws` 80, `wss` 443).
fn upstream_host_port(url: &str) -> Result<(String, u16), DialError> {
    let invalid = |reason: &str| DialError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = url.parse().map_err(|_| invalid("not a valid uri"))?;
    let host = uri.host().ok_or_else(|| invalid("missing host"))?.to_string();

    let port = match uri.port_u16() {
        Some(p) => p,
        None => match uri.scheme_str() {
            Some("ws") => 80,
            Some("wss") => 443,
            _ => return Err(invalid("scheme must be ws or wss")),
        },
    };

    Ok((host, port))
}

/// Reduce a proxy url (`http://host:port`, or bare `host:port`) to the
/// authority we dial.
fn proxy_authority(proxy_url: &str) -> Result<String, DialError> {
    let invalid = |reason: &str| DialError::InvalidProxy {
        url: proxy_url.to_string(),
        reason: reason.to_string(),
    };

    if let Some(scheme_end) = proxy_url.find("://") {
        let scheme = &proxy_url[..scheme_end];
        if scheme != "http" {
            return Err(invalid("only http proxies are supported"));
        }
    }

    let uri: Uri = proxy_url.parse().map_err(|_| invalid("not a valid uri"))?;
    let host = uri.host().ok_or_else(|| invalid("missing host"))?;
    let port = uri.port_u16().unwrap_or(3128);

    Ok(format!("{host}:{port}"))
}

/// Read the proxy's response up to the blank line terminating the head.
async fn read_response_head(stream: &mut TcpStream) -> Result<String, DialError> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_PROXY_RESPONSE {
            return Err(DialError::ProxyRefused(
                "response head exceeded size limit".to_string(),
            ));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(DialError::ProxyRefused(
                "connection closed before tunnel was established".to_string(),
            ));
        }
        head.push(byte[0]);
    }

    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Accept any `2xx` status line as an established tunnel.
fn check_connect_response(head: &str) -> Result<(), DialError> {
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();

    let version = parts.next().unwrap_or_default();
    let status = parts.next().unwrap_or_default();

    if !version.starts_with("HTTP/") {
        return Err(DialError::ProxyRefused(format!(
            "unexpected response line '{status_line}'"
        )));
    }

    if status.len() == 3 && status.starts_with('2') {
        Ok(())
    } else {
        Err(DialError::ProxyRefused(status_line.to_string()))
    }
}
