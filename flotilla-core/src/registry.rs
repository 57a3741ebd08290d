//! Identity registry interface.
//!
//! The registry is an external collaborator: it assigns credential material
//! and version tokens to device identities and supports bulk deregistration.
//! Real and simulated registries implement [`IdentityRegistry`].

use async_trait::async_trait;

/// Maximum identities a single bulk delete call may carry.
///
/// Mirrors the hub registry's per-call limit; callers partition larger
/// fleets into batches of at most this size.
pub const DELETE_BATCH_LIMIT: usize = 100;

/// A device identity record as stored in the registry.
///
/// Immutable once assigned: the registry hands back the credential material
/// and a version token (etag) used to detect stale state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Registry-unique device id
    pub id: String,
    /// Opaque symmetric key material assigned by the registry
    pub primary_key: String,
    /// Registry version token for this record
    pub etag: String,
}

/// Errors reported by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Device {id} already exists")]
    AlreadyExists { id: String },

    #[error("Device {id} not found")]
    NotFound { id: String },

    #[error("Registry operation failed for {id}: {reason}")]
    OperationFailed { id: String, reason: String },

    #[error("Bulk delete of {count} identities failed: {reason}")]
    BatchDeleteFailed { count: usize, reason: String },

    #[error("Bulk delete of {requested} identities exceeds limit of {limit}")]
    BatchTooLarge { requested: usize, limit: usize },
}

/// Abstract registry interface for device identity lifecycle.
///
/// The hub throttles identity operations per minute, so callers issue
/// create and fetch calls strictly sequentially and delete in bounded
/// batches; implementations do not need to rate-limit themselves.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// Registers a new device identity and returns its assigned credential.
    ///
    /// # Errors
    /// - `RegistryError::AlreadyExists` - An identity with this id is registered
    /// - `RegistryError::OperationFailed` - The registry rejected the call
    async fn create_identity(&self, id: &str) -> Result<DeviceIdentity, RegistryError>;

    /// Fetches an existing device identity.
    ///
    /// # Errors
    /// - `RegistryError::NotFound` - No identity with this id is registered
    /// - `RegistryError::OperationFailed` - The registry rejected the call
    async fn fetch_identity(&self, id: &str) -> Result<DeviceIdentity, RegistryError>;

    /// Deregisters up to [`DELETE_BATCH_LIMIT`] identities in one call.
    ///
    /// # Errors
    /// - `RegistryError::BatchTooLarge` - More than the per-call limit requested
    /// - `RegistryError::BatchDeleteFailed` - The bulk call failed as a whole
    async fn delete_identities(&self, ids: &[String]) -> Result<(), RegistryError>;
}
