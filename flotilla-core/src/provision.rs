//! Fleet identity provisioning.
//!
//! Creates or recovers every fleet member identity against the registry
//! before any session is opened. Calls are issued strictly sequentially:
//! the hub throttles identity operations (on the order of 100/min per
//! scaling unit), so sequential issuance is deliberate backpressure.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::registry::{DeviceIdentity, IdentityRegistry, RegistryError};

/// How a fleet member's provisioning call resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Newly registered by this run
    Created,
    /// Already existed; identity recovered via fetch
    Recovered,
    /// Registry rejected both paths; member is unusable for later stages
    Failed { reason: String },
}

/// One simulated device identity and how it was provisioned.
#[derive(Debug, Clone)]
pub struct FleetMember {
    /// Derived device id (`prefix` + sequential index)
    pub id: String,
    /// Registry-assigned record; `None` when provisioning failed
    pub identity: Option<DeviceIdentity>,
    pub outcome: ProvisionOutcome,
}

impl FleetMember {
    /// Whether this member can participate in session creation and dispatch.
    pub fn is_usable(&self) -> bool {
        self.identity.is_some()
    }
}

/// Summary of one provisioning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    pub created: usize,
    pub recovered: usize,
    pub failed: usize,
}

/// Provisions fleet identities against the registry.
pub struct Provisioner {
    registry: Arc<dyn IdentityRegistry>,
}

impl Provisioner {
    pub fn new(registry: Arc<dyn IdentityRegistry>) -> Self {
        Self { registry }
    }

    /// Creates or recovers `count` identities named `prefix0..prefix{count-1}`.
    ///
    /// Every member is returned, including failed ones; callers skip
    /// unusable members in later stages. A failure for one member never
    /// aborts provisioning of the rest.
    pub async fn provision(&self, prefix: &str, count: u32) -> (Vec<FleetMember>, ProvisionReport) {
        let mut members = Vec::with_capacity(count as usize);
        let mut report = ProvisionReport::default();

        for index in 0..count {
            let id = format!("{prefix}{index}");
            let member = self.provision_one(&id).await;

            match &member.outcome {
                ProvisionOutcome::Created => report.created += 1,
                ProvisionOutcome::Recovered => report.recovered += 1,
                ProvisionOutcome::Failed { .. } => report.failed += 1,
            }
            members.push(member);
        }

        info!(
            created = report.created,
            recovered = report.recovered,
            failed = report.failed,
            "provisioning complete"
        );
        (members, report)
    }

    async fn provision_one(&self, id: &str) -> FleetMember {
        match self.registry.create_identity(id).await {
            Ok(identity) => {
                info!(device_id = %id, "created device");
                FleetMember {
                    id: id.to_string(),
                    identity: Some(identity),
                    outcome: ProvisionOutcome::Created,
                }
            }
            // Pre-existing identities are recovered, not treated as errors.
            Err(RegistryError::AlreadyExists { .. }) => match self.registry.fetch_identity(id).await
            {
                Ok(identity) => {
                    info!(device_id = %id, "device already exists, recovered");
                    FleetMember {
                        id: id.to_string(),
                        identity: Some(identity),
                        outcome: ProvisionOutcome::Recovered,
                    }
                }
                Err(error) => {
                    warn!(device_id = %id, %error, "fetch of existing device failed");
                    FleetMember {
                        id: id.to_string(),
                        identity: None,
                        outcome: ProvisionOutcome::Failed {
                            reason: error.to_string(),
                        },
                    }
                }
            },
            Err(error) => {
                warn!(device_id = %id, %error, "device creation failed");
                FleetMember {
                    id: id.to_string(),
                    identity: None,
                    outcome: ProvisionOutcome::Failed {
                        reason: error.to_string(),
                    },
                }
            }
        }
    }
}
