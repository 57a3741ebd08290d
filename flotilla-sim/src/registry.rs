//! In-memory identity registry for simulation.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use flotilla_core::registry::{
    DELETE_BATCH_LIMIT, DeviceIdentity, IdentityRegistry, RegistryError,
};
use parking_lot::Mutex;
use rand::distr::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

/// HashMap-backed registry with deterministic credentials and failure injection.
///
/// Credential keys are drawn from a seeded RNG, so the same seed always
/// produces the same key material. Every call is recorded for test
/// assertions: creates, fetches, and the exact contents of each bulk
/// delete batch.
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
    fail_create_for: HashSet<String>,
    fail_fetch_for: HashSet<String>,
    fail_delete_batches: HashSet<usize>,
}

struct RegistryState {
    devices: HashMap<String, DeviceIdentity>,
    rng: ChaCha8Rng,
    etag_counter: u64,
    create_calls: usize,
    fetch_calls: usize,
    delete_batches: Vec<Vec<String>>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    /// Creates an empty registry with a fixed default seed.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns builder for customizing registry behavior.
    pub fn builder() -> InMemoryRegistryBuilder {
        InMemoryRegistryBuilder::new()
    }

    /// Whether an identity with `id` is currently registered.
    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().devices.contains_key(id)
    }

    /// Number of identities currently registered.
    pub fn device_count(&self) -> usize {
        self.state.lock().devices.len()
    }

    /// Create calls issued so far.
    pub fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    /// Fetch calls issued so far.
    pub fn fetch_calls(&self) -> usize {
        self.state.lock().fetch_calls
    }

    /// Contents of every bulk delete call, in issue order.
    pub fn delete_batches(&self) -> Vec<Vec<String>> {
        self.state.lock().delete_batches.clone()
    }

    fn mint_identity(state: &mut RegistryState, id: &str) -> DeviceIdentity {
        let primary_key: String = (&mut state.rng)
            .sample_iter(Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        state.etag_counter += 1;
        DeviceIdentity {
            id: id.to_string(),
            primary_key,
            etag: format!("etag-{:08}", state.etag_counter),
        }
    }
}

#[async_trait]
impl IdentityRegistry for InMemoryRegistry {
    async fn create_identity(&self, id: &str) -> Result<DeviceIdentity, RegistryError> {
        let mut state = self.state.lock();
        state.create_calls += 1;

        if self.fail_create_for.contains(id) {
            return Err(RegistryError::OperationFailed {
                id: id.to_string(),
                reason: "simulated create failure".to_string(),
            });
        }
        if state.devices.contains_key(id) {
            return Err(RegistryError::AlreadyExists { id: id.to_string() });
        }

        let identity = Self::mint_identity(&mut state, id);
        state.devices.insert(id.to_string(), identity.clone());
        debug!(device_id = %id, "registered identity");
        Ok(identity)
    }

    async fn fetch_identity(&self, id: &str) -> Result<DeviceIdentity, RegistryError> {
        let mut state = self.state.lock();
        state.fetch_calls += 1;

        if self.fail_fetch_for.contains(id) {
            return Err(RegistryError::OperationFailed {
                id: id.to_string(),
                reason: "simulated fetch failure".to_string(),
            });
        }
        state
            .devices
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    async fn delete_identities(&self, ids: &[String]) -> Result<(), RegistryError> {
        if ids.len() > DELETE_BATCH_LIMIT {
            return Err(RegistryError::BatchTooLarge {
                requested: ids.len(),
                limit: DELETE_BATCH_LIMIT,
            });
        }

        let mut state = self.state.lock();
        let batch_index = state.delete_batches.len();
        state.delete_batches.push(ids.to_vec());

        if self.fail_delete_batches.contains(&batch_index) {
            return Err(RegistryError::BatchDeleteFailed {
                count: ids.len(),
                reason: "simulated batch failure".to_string(),
            });
        }

        for id in ids {
            state.devices.remove(id);
        }
        debug!(count = ids.len(), "deleted identity batch");
        Ok(())
    }
}

/// Builder for [`InMemoryRegistry`].
pub struct InMemoryRegistryBuilder {
    seed: u64,
    pre_existing: Vec<String>,
    fail_create_for: HashSet<String>,
    fail_fetch_for: HashSet<String>,
    fail_delete_batches: HashSet<usize>,
}

impl Default for InMemoryRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistryBuilder {
    pub fn new() -> Self {
        Self {
            seed: 42,
            pre_existing: Vec::new(),
            fail_create_for: HashSet::new(),
            fail_fetch_for: HashSet::new(),
            fail_delete_batches: HashSet::new(),
        }
    }

    /// Seed for deterministic credential generation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Pre-registers identities, as if a previous run left them behind.
    pub fn with_existing(mut self, ids: &[&str]) -> Self {
        self.pre_existing.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    /// Makes create calls for `id` fail with a generic registry error.
    pub fn fail_create_for(mut self, id: &str) -> Self {
        self.fail_create_for.insert(id.to_string());
        self
    }

    /// Makes fetch calls for `id` fail with a generic registry error.
    pub fn fail_fetch_for(mut self, id: &str) -> Self {
        self.fail_fetch_for.insert(id.to_string());
        self
    }

    /// Makes the nth bulk delete call (zero-based) fail.
    pub fn fail_delete_batch(mut self, index: usize) -> Self {
        self.fail_delete_batches.insert(index);
        self
    }

    pub fn build(self) -> InMemoryRegistry {
        let mut state = RegistryState {
            devices: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(self.seed),
            etag_counter: 0,
            create_calls: 0,
            fetch_calls: 0,
            delete_batches: Vec::new(),
        };
        for id in &self.pre_existing {
            let identity = InMemoryRegistry::mint_identity(&mut state, id);
            state.devices.insert(id.clone(), identity);
        }
        InMemoryRegistry {
            state: Mutex::new(state),
            fail_create_for: self.fail_create_for,
            fail_fetch_for: self.fail_fetch_for,
            fail_delete_batches: self.fail_delete_batches,
        }
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_duplicate_reports_already_exists() {
        let registry = InMemoryRegistry::new();
        let identity = registry.create_identity("dev0").await.unwrap();
        assert_eq!(identity.id, "dev0");
        assert!(!identity.primary_key.is_empty());

        let result = registry.create_identity("dev0").await;
        assert!(matches!(
            result,
            Err(RegistryError::AlreadyExists { id }) if id == "dev0"
        ));
    }

    #[tokio::test]
    async fn test_fetch_returns_created_record() {
        let registry = InMemoryRegistry::new();
        let created = registry.create_identity("dev0").await.unwrap();
        let fetched = registry.fetch_identity("dev0").await.unwrap();
        assert_eq!(created, fetched);
    }

    #[tokio::test]
    async fn test_fetch_unknown_is_not_found() {
        let registry = InMemoryRegistry::new();
        assert!(matches!(
            registry.fetch_identity("ghost").await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_same_seed_same_credentials() {
        let a = InMemoryRegistry::builder().with_seed(7).build();
        let b = InMemoryRegistry::builder().with_seed(7).build();
        let key_a = a.create_identity("dev0").await.unwrap().primary_key;
        let key_b = b.create_identity("dev0").await.unwrap().primary_key;
        assert_eq!(key_a, key_b);
    }

    #[tokio::test]
    async fn test_oversized_delete_batch_rejected() {
        let registry = InMemoryRegistry::new();
        let ids: Vec<String> = (0..DELETE_BATCH_LIMIT + 1).map(|i| format!("d{i}")).collect();
        assert!(matches!(
            registry.delete_identities(&ids).await,
            Err(RegistryError::BatchTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_and_records_batch() {
        let registry = InMemoryRegistry::builder().with_existing(&["a", "b"]).build();
        registry
            .delete_identities(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(registry.device_count(), 0);
        assert_eq!(registry.delete_batches(), vec![vec!["a".to_string(), "b".to_string()]]);
    }

    #[tokio::test]
    async fn test_injected_delete_failure() {
        let registry = InMemoryRegistry::builder()
            .with_existing(&["a"])
            .fail_delete_batch(0)
            .build();
        let result = registry.delete_identities(&["a".to_string()]).await;
        assert!(matches!(result, Err(RegistryError::BatchDeleteFailed { .. })));
        assert!(registry.contains("a"), "failed batch leaves identities in place");
    }
}
