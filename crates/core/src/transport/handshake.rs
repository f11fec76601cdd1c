use hiddenlink_common::config::protocol::VIRTUAL_PORT;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// SOCKS4 protocol constants
const SOCKS_VERSION: u8 = 0x04;
const CONNECT_COMMAND: u8 = 0x01;

/// 0.0.0.x marks the request as SOCKS4a, the proxy resolves the hostname itself
const INVALID_IP: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Reply status for a granted request
pub const REQUEST_GRANTED: u8 = 90;

/// Tunnel handshake errors
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Failed to connect to proxy {proxy}: {source}")]
    Connect {
        proxy: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to proxy {0}")]
    ConnectTimeout(String),

    #[error("Proxy handshake timed out")]
    IoTimeout,

    #[error("Proxy rejected tunnel with status {status}")]
    Rejected { status: u8 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Connect to the proxy and open a tunnel to `address`
///
/// The returned stream is ready to carry application bytes.
pub async fn open_tunnel(
    proxy: &str,
    address: &str,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<TcpStream, TunnelError> {
    debug!("Connecting to proxy {} for {}", proxy, address);

    let mut stream = timeout(connect_timeout, TcpStream::connect(proxy))
        .await
        .map_err(|_| TunnelError::ConnectTimeout(proxy.to_string()))?
        .map_err(|source| TunnelError::Connect {
            proxy: proxy.to_string(),
            source,
        })?;

    timeout(io_timeout, perform_handshake(&mut stream, address))
        .await
        .map_err(|_| TunnelError::IoTimeout)??;

    Ok(stream)
}

/// Run the client side of the SOCKS4a connect handshake on `stream`
pub async fn perform_handshake<S>(stream: &mut S, address: &str) -> Result<(), TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = Vec::with_capacity(10 + address.len());
    request.push(SOCKS_VERSION);
    request.push(CONNECT_COMMAND);
    request.extend_from_slice(&VIRTUAL_PORT.to_be_bytes());
    request.extend_from_slice(&INVALID_IP);
    request.push(0x00); // empty user id
    request.extend_from_slice(address.as_bytes());
    request.push(0x00);

    stream.write_all(&request).await?;
    stream.flush().await?;

    // Reply: version, status, then port and address we don't need
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;

    let status = reply[1];
    if status != REQUEST_GRANTED {
        return Err(TunnelError::Rejected { status });
    }

    let mut reserved = [0u8; 2 + 4];
    stream.read_exact(&mut reserved).await?;

    debug!("Tunnel to {} established", address);
    Ok(())
}
