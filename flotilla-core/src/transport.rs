//! Hub transport interface.
//!
//! The wire protocol is an external collaborator. Flotilla only decides
//! which physical connection a logical session rides on (the pool key) and
//! invokes send through it; handshakes, framing, and authentication live
//! behind these traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::registry::DeviceIdentity;

/// Identifies one physical hub connection within the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(pub u32);

impl PoolKey {
    /// Returns the underlying key as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors reported by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection {key} to {host} failed: {reason}")]
    ConnectionFailed {
        host: String,
        key: PoolKey,
        reason: String,
    },

    #[error("Session setup failed for {device_id}: {reason}")]
    SessionSetupFailed { device_id: String, reason: String },

    #[error("Send failed for {device_id}: {reason}")]
    SendFailed { device_id: String, reason: String },
}

/// Factory for physical hub connections.
///
/// Connections are created lazily by the pool on the first session that
/// needs a given key; the transport performs whatever handshake connection
/// establishment requires, nothing more.
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Opens a physical connection to the hub for the given pool key.
    ///
    /// # Errors
    /// - `TransportError::ConnectionFailed` - Connection establishment failed
    async fn connect(
        &self,
        host: &str,
        key: PoolKey,
    ) -> Result<Arc<dyn HubConnection>, TransportError>;

    /// Binds a device session onto an established connection.
    ///
    /// Validates the credential; actual network activity begins with the
    /// first send.
    ///
    /// # Errors
    /// - `TransportError::SessionSetupFailed` - Malformed credential or setup error
    async fn attach_session(
        &self,
        connection: &Arc<dyn HubConnection>,
        identity: &DeviceIdentity,
    ) -> Result<(), TransportError>;
}

/// One physical hub connection, shareable by multiple logical sessions.
#[async_trait]
pub trait HubConnection: Send + Sync {
    /// Sends a device-to-hub message on behalf of `device_id`.
    ///
    /// # Errors
    /// - `TransportError::SendFailed` - The message could not be delivered
    async fn send(&self, device_id: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Pool key this connection was opened under.
    fn pool_key(&self) -> PoolKey;
}
