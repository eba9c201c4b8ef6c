//! TCP stream used by the WiFi transport once the vehicle network is joined

use crate::transport::traits::{LinkError, TransportStream};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// TCP stream wrapper implementing TransportStream
pub struct TcpTransportStream {
    inner: TcpStream,
}

impl TcpTransportStream {
    pub fn new(stream: TcpStream) -> Self {
        Self { inner: stream }
    }

    /// Open the control socket, bounded by `connect_timeout`
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self, LinkError> {
        let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(LinkError::Tcp {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(LinkError::Tcp {
                    addr,
                    reason: format!("no answer within {}s", connect_timeout.as_secs()),
                })
            }
        };
        // Commands are tiny and latency-sensitive
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl AsyncRead for TcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl TransportStream for TcpTransportStream {
    fn peer(&self) -> String {
        self.inner
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown peer".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_reports_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let stream = TcpTransportStream::connect(addr, Duration::from_secs(1))
            .await
            .expect("connect");
        assert_eq!(stream.peer(), addr.to_string());
    }

    #[tokio::test]
    async fn test_refused_is_tcp_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = TcpTransportStream::connect(addr, Duration::from_secs(1))
            .await
            .err()
            .expect("refused");
        assert!(matches!(err, LinkError::Tcp { addr: a, .. } if a == addr));
    }
}
