//! Simulation run orchestration.
//!
//! Sequences the stages: provision identities, open pooled sessions, run
//! the dispatch loop, then tear the fleet down. Data flows one way through
//! the stages; only construction-time configuration problems are fatal,
//! per-member failures stay inside their stage reports.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::Result;
use crate::config::FlotillaConfig;
use crate::dispatch::{DispatchReport, DispatchScheduler};
use crate::hub::HubConnectionString;
use crate::pool::{ConnectionPool, SessionFailure};
use crate::provision::{ProvisionReport, Provisioner};
use crate::registry::IdentityRegistry;
use crate::shutdown::ShutdownSignal;
use crate::teardown::{TeardownBatcher, TeardownReport};
use crate::transport::HubTransport;

/// Aggregated results of one full simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct FleetRunReport {
    pub provision: ProvisionReport,
    pub sessions_opened: usize,
    pub session_failures: Vec<SessionFailure>,
    pub dispatch: DispatchReport,
    pub teardown: TeardownReport,
}

/// Drives one simulation run end to end.
pub struct Orchestrator {
    config: FlotillaConfig,
    host: String,
    registry: Arc<dyn IdentityRegistry>,
    transport: Arc<dyn HubTransport>,
}

impl Orchestrator {
    /// Builds an orchestrator, validating the hub connection string.
    ///
    /// # Errors
    /// - `FleetError::InvalidConnectionString` - Connection string is malformed;
    ///   nothing runs in that case
    pub fn new(
        config: FlotillaConfig,
        registry: Arc<dyn IdentityRegistry>,
        transport: Arc<dyn HubTransport>,
    ) -> Result<Self> {
        let host = HubConnectionString::parse(&config.hub.connection_string)?.host_name;
        Ok(Self {
            config,
            host,
            registry,
            transport,
        })
    }

    /// Runs the full simulation without external cancellation.
    pub async fn run(&self) -> FleetRunReport {
        self.run_with_shutdown(&ShutdownSignal::none()).await
    }

    /// Runs the full simulation, observing `shutdown` between stages and
    /// during the dispatch loop. Cancellation skips remaining dispatch
    /// work; teardown always runs for whatever was provisioned.
    pub async fn run_with_shutdown(&self, shutdown: &ShutdownSignal) -> FleetRunReport {
        let provisioner = Provisioner::new(self.registry.clone());
        let (members, provision) = provisioner
            .provision(&self.config.fleet.id_prefix, self.config.fleet.fleet_size)
            .await;

        let mut sessions = Vec::new();
        let mut session_failures = Vec::new();
        let mut dispatch = DispatchReport::default();

        if shutdown.is_cancelled() {
            warn!("shutdown requested, skipping session creation and dispatch");
            dispatch.cancelled = true;
        } else {
            let mut pool = ConnectionPool::new(
                self.transport.clone(),
                self.host.clone(),
                self.config.pooling.clone(),
            );
            (sessions, session_failures) = pool.open_sessions(&members).await;
            info!(
                sessions = sessions.len(),
                connections = pool.connection_count(),
                "sessions opened"
            );

            let scheduler = DispatchScheduler::new(self.config.dispatch.clone());
            dispatch = scheduler.run(&sessions, shutdown).await;
        }

        // Teardown is not subject to cancellation; provisioned identities
        // must not leak into the registry.
        let teardown = TeardownBatcher::new(self.registry.clone())
            .teardown(&members)
            .await;

        FleetRunReport {
            provision,
            sessions_opened: sessions.len(),
            session_failures,
            dispatch,
            teardown,
        }
    }

    /// Hub host name extracted from the connection string.
    pub fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
mod orchestrator_tests {
    use super::*;
    use crate::hub::HubConnectionString;

    #[test]
    fn test_malformed_connection_string_is_fatal() {
        assert!(HubConnectionString::parse("garbage").is_err());
        assert!(HubConnectionString::parse("HostName=h;x=y").is_ok());
    }
}
