//! Flotilla Core - Fleet simulation engine for hub-connected devices
//!
//! This crate provides the building blocks for simulating large device
//! fleets against a remote hub: identity provisioning against a registry,
//! connection pooling across logical sessions, paced concurrent telemetry
//! dispatch, and batched teardown.

pub mod config;
pub mod dispatch;
pub mod hub;
pub mod orchestrator;
pub mod pool;
pub mod provision;
pub mod registry;
pub mod shutdown;
pub mod teardown;
pub mod transport;

// Re-export main types for convenient access
pub use config::{DispatchPlan, FleetConfig, FlotillaConfig, HubConfig, PoolingPolicy};
pub use dispatch::{DispatchReport, DispatchScheduler, SendFailure};
pub use hub::HubConnectionString;
pub use orchestrator::{FleetRunReport, Orchestrator};
pub use pool::{ConnectionPool, Session, SessionFailure};
pub use provision::{FleetMember, ProvisionOutcome, ProvisionReport, Provisioner};
pub use registry::{DeviceIdentity, IdentityRegistry, RegistryError};
pub use shutdown::{ShutdownHandle, ShutdownSignal, shutdown_channel};
pub use teardown::{TeardownBatcher, TeardownReport};
pub use transport::{HubConnection, HubTransport, PoolKey, TransportError};

/// Errors that can bubble up from any Flotilla subsystem.
///
/// Per-member and per-batch failures are reported through the stage reports
/// instead; only configuration-level problems surface here.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("Invalid hub connection string: {reason}")]
    InvalidConnectionString { reason: String },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, FleetError>;
