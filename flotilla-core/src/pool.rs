//! Connection pool management.
//!
//! Maps each provisioned fleet member onto a shared physical hub
//! connection according to the pooling policy and hands back a logical
//! [`Session`] per usable member. Connections are created lazily on the
//! first session that needs them and are owned exclusively by the pool;
//! dispatch only ever touches them through a `Session` handle, so the send
//! hot path needs no locking.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PoolingPolicy;
use crate::provision::FleetMember;
use crate::transport::{HubConnection, HubTransport, PoolKey, TransportError};

/// Upper bound on distinct physical connections when pooling is enabled.
///
/// Key assignment wraps past this bound, so arbitrarily large fleets still
/// ride a bounded connection set.
pub const MAX_POOL_CONNECTIONS: u32 = 1024;

/// Logical per-member session bound to exactly one pooled connection.
///
/// Cheap to clone; dispatch tasks each hold their own handle.
#[derive(Clone)]
pub struct Session {
    device_id: String,
    connection: Arc<dyn HubConnection>,
}

impl Session {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Pool key of the physical connection this session rides on.
    pub fn pool_key(&self) -> PoolKey {
        self.connection.pool_key()
    }

    /// Sends a device-to-hub message through the shared connection.
    ///
    /// # Errors
    /// - `TransportError::SendFailed` - The message could not be delivered
    pub async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        self.connection.send(&self.device_id, payload).await
    }
}

/// A member that could not be given a session, with the cause.
#[derive(Debug, Clone, Serialize)]
pub struct SessionFailure {
    pub device_id: String,
    pub reason: String,
}

/// Assigns members to pooled connections and opens their sessions.
pub struct ConnectionPool {
    transport: Arc<dyn HubTransport>,
    host: String,
    policy: PoolingPolicy,
    connections: HashMap<PoolKey, Arc<dyn HubConnection>>,
    sessions_per_connection: HashMap<PoolKey, usize>,
}

impl ConnectionPool {
    pub fn new(transport: Arc<dyn HubTransport>, host: String, policy: PoolingPolicy) -> Self {
        Self {
            transport,
            host,
            policy,
            connections: HashMap::new(),
            sessions_per_connection: HashMap::new(),
        }
    }

    /// Pool key for the member at `index` in the fleet.
    ///
    /// Pooling enabled: consecutive members group in runs of
    /// `max_pool_size` per connection, wrapping at
    /// [`MAX_POOL_CONNECTIONS`]. Disabled: dedicated connection per member.
    pub fn pool_key_for(&self, index: usize) -> PoolKey {
        if self.policy.enabled {
            PoolKey((index as u32 / self.policy.effective_pool_size()) % MAX_POOL_CONNECTIONS)
        } else {
            PoolKey(index as u32)
        }
    }

    /// Opens a session for every usable member.
    ///
    /// Per-member setup failures (connection establishment, malformed
    /// credential) are reported and excluded; they never abort session
    /// creation for the remaining members. Members that failed
    /// provisioning are skipped without being reported again.
    pub async fn open_sessions(
        &mut self,
        members: &[FleetMember],
    ) -> (Vec<Session>, Vec<SessionFailure>) {
        let mut sessions = Vec::new();
        let mut failures = Vec::new();

        for (index, member) in members.iter().enumerate() {
            let Some(identity) = &member.identity else {
                continue;
            };

            let key = self.pool_key_for(index);
            let connection = match self.connection_for(key).await {
                Ok(connection) => connection,
                Err(error) => {
                    warn!(device_id = %member.id, %error, "session creation failed");
                    failures.push(SessionFailure {
                        device_id: member.id.clone(),
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            if let Err(error) = self.transport.attach_session(&connection, identity).await {
                warn!(device_id = %member.id, %error, "session creation failed");
                failures.push(SessionFailure {
                    device_id: member.id.clone(),
                    reason: error.to_string(),
                });
                continue;
            }

            *self.sessions_per_connection.entry(key).or_insert(0) += 1;
            debug!(device_id = %member.id, pool_key = %key, "session opened");
            sessions.push(Session {
                device_id: member.id.clone(),
                connection,
            });
        }

        (sessions, failures)
    }

    /// Number of distinct physical connections created so far.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sessions currently bound to the connection under `key`.
    pub fn sessions_on(&self, key: PoolKey) -> usize {
        self.sessions_per_connection.get(&key).copied().unwrap_or(0)
    }

    async fn connection_for(
        &mut self,
        key: PoolKey,
    ) -> Result<Arc<dyn HubConnection>, TransportError> {
        if let Some(connection) = self.connections.get(&key) {
            return Ok(connection.clone());
        }

        let connection = self.transport.connect(&self.host, key).await?;
        debug!(pool_key = %key, host = %self.host, "physical connection opened");
        self.connections.insert(key, connection.clone());
        Ok(connection)
    }
}

#[cfg(test)]
mod pool_tests {
    use async_trait::async_trait;

    use super::*;
    use crate::provision::ProvisionOutcome;
    use crate::registry::DeviceIdentity;

    struct StubConnection {
        key: PoolKey,
    }

    #[async_trait]
    impl HubConnection for StubConnection {
        async fn send(&self, _device_id: &str, _payload: Bytes) -> Result<(), TransportError> {
            Ok(())
        }

        fn pool_key(&self) -> PoolKey {
            self.key
        }
    }

    struct StubTransport {
        reject_empty_keys: bool,
    }

    #[async_trait]
    impl HubTransport for StubTransport {
        async fn connect(
            &self,
            _host: &str,
            key: PoolKey,
        ) -> Result<Arc<dyn HubConnection>, TransportError> {
            Ok(Arc::new(StubConnection { key }))
        }

        async fn attach_session(
            &self,
            _connection: &Arc<dyn HubConnection>,
            identity: &DeviceIdentity,
        ) -> Result<(), TransportError> {
            if self.reject_empty_keys && identity.primary_key.is_empty() {
                return Err(TransportError::SessionSetupFailed {
                    device_id: identity.id.clone(),
                    reason: "malformed credential".to_string(),
                });
            }
            Ok(())
        }
    }

    fn member(index: usize, key: &str) -> FleetMember {
        let id = format!("dev{index}");
        FleetMember {
            id: id.clone(),
            identity: Some(DeviceIdentity {
                id,
                primary_key: key.to_string(),
                etag: "etag".to_string(),
            }),
            outcome: ProvisionOutcome::Created,
        }
    }

    fn fleet(count: usize) -> Vec<FleetMember> {
        (0..count).map(|i| member(i, "key")).collect()
    }

    fn pool(enabled: bool, max_pool_size: u32) -> ConnectionPool {
        ConnectionPool::new(
            Arc::new(StubTransport {
                reject_empty_keys: false,
            }),
            "hub.local".to_string(),
            PoolingPolicy {
                enabled,
                max_pool_size,
            },
        )
    }

    #[tokio::test]
    async fn test_three_members_pool_of_two_share_two_connections() {
        let mut pool = pool(true, 2);
        let (sessions, failures) = pool.open_sessions(&fleet(3)).await;

        assert!(failures.is_empty());
        assert_eq!(sessions.len(), 3);
        assert_eq!(pool.connection_count(), 2);
        assert_eq!(sessions[0].pool_key(), sessions[1].pool_key());
        assert_ne!(sessions[1].pool_key(), sessions[2].pool_key());
        assert_eq!(pool.sessions_on(PoolKey(0)), 2);
        assert_eq!(pool.sessions_on(PoolKey(1)), 1);
    }

    #[tokio::test]
    async fn test_pool_size_bound_respected() {
        let mut pool = pool(true, 4);
        let (sessions, _) = pool.open_sessions(&fleet(10)).await;

        assert_eq!(sessions.len(), 10);
        assert_eq!(pool.connection_count(), 3); // 4 + 4 + 2
        for key in 0..3 {
            assert!(pool.sessions_on(PoolKey(key)) <= 4);
        }
    }

    #[tokio::test]
    async fn test_pooling_disabled_gives_dedicated_connections() {
        let mut pool = pool(false, 2);
        let (sessions, _) = pool.open_sessions(&fleet(5)).await;

        assert_eq!(sessions.len(), 5);
        assert_eq!(pool.connection_count(), 5);
        for key in 0..5 {
            assert_eq!(pool.sessions_on(PoolKey(key)), 1);
        }
    }

    #[tokio::test]
    async fn test_unusable_members_skipped() {
        let mut members = fleet(3);
        members[1].identity = None;
        members[1].outcome = ProvisionOutcome::Failed {
            reason: "provisioning failed".to_string(),
        };

        let mut pool = pool(true, 2);
        let (sessions, failures) = pool.open_sessions(&members).await;

        assert_eq!(sessions.len(), 2);
        assert!(failures.is_empty(), "provisioning failures are not re-reported");
    }

    #[tokio::test]
    async fn test_bad_credential_excludes_only_that_member() {
        let mut members = fleet(3);
        members[2] = member(2, "");

        let mut pool = ConnectionPool::new(
            Arc::new(StubTransport {
                reject_empty_keys: true,
            }),
            "hub.local".to_string(),
            PoolingPolicy {
                enabled: true,
                max_pool_size: 2,
            },
        );
        let (sessions, failures) = pool.open_sessions(&members).await;

        assert_eq!(sessions.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].device_id, "dev2");
        assert!(failures[0].reason.contains("malformed credential"));
    }

    #[test]
    fn test_pool_key_wraps_at_connection_bound() {
        let pool = pool(true, 1);
        let wrapped = pool.pool_key_for(MAX_POOL_CONNECTIONS as usize);
        assert_eq!(wrapped, PoolKey(0));
    }
}
