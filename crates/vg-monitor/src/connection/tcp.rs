//! TCP reachability descriptor
//!
//! Opens a plain TCP connection to the socket a service URL points at. The
//! connection counts as lost when the peer closes the socket or the socket
//! errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use vg_core::traits::{ConnectEnv, RawConnection, TargetDescriptor};
use vg_core::{ConnectError, TargetAddress};

/// Reaches targets over TCP with a connect timeout
#[derive(Debug, Clone)]
pub struct TcpDescriptor {
    timeout: Duration,
}

impl TcpDescriptor {
    /// Create a descriptor with the given connect timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl TargetDescriptor for TcpDescriptor {
    async fn open_connection(
        &self,
        address: &TargetAddress,
        _env: &ConnectEnv,
    ) -> Result<Arc<dyn RawConnection>, ConnectError> {
        let socket = address.socket_address().ok_or_else(|| {
            ConnectError::transport(format!("{} does not name a host and port", address))
        })?;

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&socket))
            .await
            .map_err(|_| ConnectError::transport(format!("Timed out connecting to {}", socket)))?
            .map_err(|e| ConnectError::transport(format!("{}: {}", socket, e)))?;

        tracing::trace!("TCP connection to {} established", socket);

        Ok(Arc::new(TcpConnection::new(stream)))
    }
}

/// An open TCP socket
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    cancel: CancellationToken,
}

impl TcpConnection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            cancel: CancellationToken::new(),
        }
    }

    /// Drain the socket until EOF or an error
    async fn wait_for_eof(&self) {
        let mut buf = [0u8; 1024];
        loop {
            if self.stream.readable().await.is_err() {
                return;
            }
            match self.stream.try_read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(_) => return,
            }
        }
    }
}

#[async_trait]
impl RawConnection for TcpConnection {
    async fn closed(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.wait_for_eof() => {}
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
    }
}
