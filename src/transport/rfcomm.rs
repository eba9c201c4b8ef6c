//! RFCOMM stream for Classic Bluetooth serial links

use crate::transport::traits::{LinkError, TransportStream};
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::Address;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::timeout;
use tracing::info;

/// Serial port profile channel used by common vehicle modules (HC-05 and similar)
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// RFCOMM stream wrapper implementing TransportStream
pub struct RfcommTransportStream {
    inner: RfcommStream,
    peer_addr: Address,
}

impl RfcommTransportStream {
    pub fn new(stream: RfcommStream, peer_addr: Address) -> Self {
        Self {
            inner: stream,
            peer_addr,
        }
    }

    /// Open an RFCOMM channel to `address`
    pub async fn connect(address: Address, channel: u8, connect_timeout: Duration) -> Result<Self, LinkError> {
        let socket_addr = RfcommAddr::new(address, channel);
        info!("[BT] Connecting to {} channel {}", address, channel);

        let stream = timeout(connect_timeout, RfcommStream::connect(socket_addr))
            .await
            .map_err(|_| LinkError::Timeout(format!("RFCOMM connect to {address}")))?
            .map_err(|e| LinkError::Rfcomm(e.to_string()))?;

        info!("[BT] RFCOMM channel open to {}", address);
        Ok(Self::new(stream, address))
    }
}

impl AsyncRead for RfcommTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommTransportStream {
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

impl TransportStream for RfcommTransportStream {
    fn peer(&self) -> String {
        self.peer_addr.to_string()
    }
}
