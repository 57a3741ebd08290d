//! Simulated hub transport.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use flotilla_core::registry::DeviceIdentity;
use flotilla_core::transport::{HubConnection, HubTransport, PoolKey, TransportError};
use parking_lot::Mutex;
use tracing::debug;

/// Records of everything the simulated transport has been asked to do.
#[derive(Default)]
struct TransportState {
    /// Pool keys in the order connections were opened
    connections_opened: Vec<PoolKey>,
    /// Messages delivered per device id
    messages_per_device: HashMap<String, usize>,
    /// Total payload bytes delivered
    delivered_payload_bytes: usize,
}

/// Network-free hub transport that records connections and messages.
///
/// Send failures can be injected per device id and connection failures per
/// pool key; an optional per-send latency models hub round trips.
pub struct SimulatedTransport {
    state: Arc<Mutex<TransportState>>,
    send_latency: Duration,
    fail_send_for: Arc<HashSet<String>>,
    fail_connect_keys: HashSet<u32>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// Creates a transport that accepts everything with zero latency.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns builder for customizing transport behavior.
    pub fn builder() -> SimulatedTransportBuilder {
        SimulatedTransportBuilder::new()
    }

    /// Number of physical connections opened so far.
    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections_opened.len()
    }

    /// Pool keys of opened connections, in open order.
    pub fn opened_keys(&self) -> Vec<PoolKey> {
        self.state.lock().connections_opened.clone()
    }

    /// Messages delivered for `device_id` (failed sends are not counted).
    pub fn messages_for(&self, device_id: &str) -> usize {
        self.state
            .lock()
            .messages_per_device
            .get(device_id)
            .copied()
            .unwrap_or(0)
    }

    /// Total messages delivered across all devices.
    pub fn total_messages(&self) -> usize {
        self.state.lock().messages_per_device.values().sum()
    }

    /// Total payload bytes delivered.
    pub fn delivered_payload_bytes(&self) -> usize {
        self.state.lock().delivered_payload_bytes
    }
}

#[async_trait]
impl HubTransport for SimulatedTransport {
    async fn connect(
        &self,
        host: &str,
        key: PoolKey,
    ) -> Result<Arc<dyn HubConnection>, TransportError> {
        if self.fail_connect_keys.contains(&key.as_u32()) {
            return Err(TransportError::ConnectionFailed {
                host: host.to_string(),
                key,
                reason: "simulated connection failure".to_string(),
            });
        }

        self.state.lock().connections_opened.push(key);
        debug!(pool_key = %key, %host, "simulated connection opened");
        Ok(Arc::new(SimulatedConnection {
            key,
            state: self.state.clone(),
            send_latency: self.send_latency,
            fail_send_for: self.fail_send_for.clone(),
        }))
    }

    async fn attach_session(
        &self,
        _connection: &Arc<dyn HubConnection>,
        identity: &DeviceIdentity,
    ) -> Result<(), TransportError> {
        // The one handshake-time validation a real transport would do.
        if identity.primary_key.is_empty() {
            return Err(TransportError::SessionSetupFailed {
                device_id: identity.id.clone(),
                reason: "malformed credential: empty symmetric key".to_string(),
            });
        }
        Ok(())
    }
}

/// One simulated physical connection; shared by pooled sessions.
pub struct SimulatedConnection {
    key: PoolKey,
    state: Arc<Mutex<TransportState>>,
    send_latency: Duration,
    fail_send_for: Arc<HashSet<String>>,
}

#[async_trait]
impl HubConnection for SimulatedConnection {
    async fn send(&self, device_id: &str, payload: Bytes) -> Result<(), TransportError> {
        if !self.send_latency.is_zero() {
            tokio::time::sleep(self.send_latency).await;
        }
        if self.fail_send_for.contains(device_id) {
            return Err(TransportError::SendFailed {
                device_id: device_id.to_string(),
                reason: "simulated send failure".to_string(),
            });
        }

        let mut state = self.state.lock();
        *state
            .messages_per_device
            .entry(device_id.to_string())
            .or_insert(0) += 1;
        state.delivered_payload_bytes += payload.len();
        Ok(())
    }

    fn pool_key(&self) -> PoolKey {
        self.key
    }
}

/// Builder for [`SimulatedTransport`].
#[derive(Default)]
pub struct SimulatedTransportBuilder {
    send_latency: Duration,
    fail_send_for: HashSet<String>,
    fail_connect_keys: HashSet<u32>,
}

impl SimulatedTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-send latency, modelling the hub round trip.
    pub fn with_send_latency(mut self, latency: Duration) -> Self {
        self.send_latency = latency;
        self
    }

    /// Makes every send for `device_id` fail.
    pub fn fail_send_for(mut self, device_id: &str) -> Self {
        self.fail_send_for.insert(device_id.to_string());
        self
    }

    /// Makes connection establishment for pool key `key` fail.
    pub fn fail_connect_key(mut self, key: u32) -> Self {
        self.fail_connect_keys.insert(key);
        self
    }

    pub fn build(self) -> SimulatedTransport {
        SimulatedTransport {
            state: Arc::new(Mutex::new(TransportState::default())),
            send_latency: self.send_latency,
            fail_send_for: Arc::new(self.fail_send_for),
            fail_connect_keys: self.fail_connect_keys,
        }
    }
}

#[cfg(test)]
mod transport_tests {
    use super::*;

    fn identity(id: &str) -> DeviceIdentity {
        DeviceIdentity {
            id: id.to_string(),
            primary_key: "key".to_string(),
            etag: "etag".to_string(),
        }
    }

    #[tokio::test]
    async fn test_connect_and_send_are_recorded() {
        let transport = SimulatedTransport::new();
        let connection = transport.connect("hub.local", PoolKey(3)).await.unwrap();
        assert_eq!(connection.pool_key(), PoolKey(3));
        assert_eq!(transport.opened_keys(), vec![PoolKey(3)]);

        connection
            .send("dev0", Bytes::from_static(b"dev0"))
            .await
            .unwrap();
        assert_eq!(transport.messages_for("dev0"), 1);
        assert_eq!(transport.delivered_payload_bytes(), 4);
    }

    #[tokio::test]
    async fn test_injected_send_failure_not_counted_as_delivered() {
        let transport = SimulatedTransport::builder().fail_send_for("dev1").build();
        let connection = transport.connect("hub.local", PoolKey(0)).await.unwrap();

        let result = connection.send("dev1", Bytes::from_static(b"dev1")).await;
        assert!(matches!(
            result,
            Err(TransportError::SendFailed { device_id, .. }) if device_id == "dev1"
        ));
        assert_eq!(transport.total_messages(), 0);
    }

    #[tokio::test]
    async fn test_injected_connect_failure() {
        let transport = SimulatedTransport::builder().fail_connect_key(1).build();
        assert!(transport.connect("hub.local", PoolKey(0)).await.is_ok());
        assert!(matches!(
            transport.connect("hub.local", PoolKey(1)).await,
            Err(TransportError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_credential_rejected_at_attach() {
        let transport = SimulatedTransport::new();
        let connection = transport.connect("hub.local", PoolKey(0)).await.unwrap();

        let mut bad = identity("dev0");
        bad.primary_key.clear();
        let result = transport.attach_session(&connection, &bad).await;
        assert!(matches!(
            result,
            Err(TransportError::SessionSetupFailed { .. })
        ));

        assert!(
            transport
                .attach_session(&connection, &identity("dev1"))
                .await
                .is_ok()
        );
    }
}
