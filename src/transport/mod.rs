//! TCP transport for the NetDDE session.
//!
//! A thin wrapper over [`tokio::net::TcpStream`]: connect, best-effort
//! keepalive tuning, and a split into the read half consumed by the
//! session's read loop and the write half handed to the endpoint. The
//! protocol engine itself never touches socket specifics.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::Result;

/// A connected TCP transport.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to the remote NetDDE server.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self { stream })
    }

    /// Tune TCP keepalive probing on the connected socket.
    ///
    /// Best-effort: failing to set keepalives must never fail the
    /// connection, so errors are logged and swallowed.
    pub fn tune_keepalive(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }

        let mut keepalive = TcpKeepalive::new()
            .with_time(interval)
            .with_interval(interval);
        #[cfg(not(windows))]
        {
            keepalive = keepalive.with_retries(3);
        }

        if let Err(e) = SockRef::from(&self.stream).set_tcp_keepalive(&keepalive) {
            tracing::debug!("failed to tune TCP keepalive: {e}");
        }
    }

    /// Split into the read half and the write half.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_and_tunes_keepalive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::connect(&addr.ip().to_string(), addr.port())
            .await
            .unwrap();

        // tuning must be silent even with odd values
        transport.tune_keepalive(Duration::from_millis(10_000));
        transport.tune_keepalive(Duration::ZERO);

        let (_read, _write) = transport.into_split();
    }

    #[tokio::test]
    async fn connect_failure_surfaces_io_error() {
        // port 1 on localhost is practically never listening
        let result = TcpTransport::connect("127.0.0.1", 1).await;
        assert!(result.is_err());
    }
}
