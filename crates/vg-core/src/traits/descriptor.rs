//! Transport traits

use async_trait::async_trait;
use std::sync::Arc;

use crate::address::TargetAddress;
use crate::error::ConnectError;
use crate::types::Credentials;

/// Everything a descriptor needs to open one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectEnv {
    /// Credentials collected so far, if any
    pub credentials: Option<Credentials>,
    /// Skip the transport trust check
    pub insecure: bool,
    /// Environment/credential provider identity
    pub env_provider: Option<String>,
}

/// Knows how to reach one kind of target
#[async_trait]
pub trait TargetDescriptor: Send + Sync {
    /// Open a raw transport connection.
    ///
    /// Implementations are expected to enforce their own connect timeout.
    async fn open_connection(
        &self,
        address: &TargetAddress,
        env: &ConnectEnv,
    ) -> Result<Arc<dyn RawConnection>, ConnectError>;

    /// Whether the target currently answers at all.
    ///
    /// A security failure still counts as reachable: something answered.
    async fn is_reachable(&self, address: &TargetAddress) -> bool {
        match self.open_connection(address, &ConnectEnv::default()).await {
            Ok(conn) => {
                conn.close().await;
                true
            }
            Err(ConnectError::Security { .. }) => true,
            Err(ConnectError::Transport(_)) => false,
        }
    }
}

/// An open transport connection
#[async_trait]
pub trait RawConnection: Send + Sync {
    /// Resolves once the transport reports the connection failed or closed
    async fn closed(&self);

    /// Close the transport
    async fn close(&self);

    /// Process id of the remote endpoint, if the transport can tell
    async fn process_id(&self) -> Option<u32> {
        None
    }
}
