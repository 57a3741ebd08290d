//! Batched fleet teardown.
//!
//! Deregisters every provisioned identity in bounded batches, sequentially,
//! because the registry caps how many identities one bulk delete call may
//! carry. Cleanup is best-effort: a failed batch is reported and the
//! remaining batches are still attempted.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::provision::FleetMember;
use crate::registry::{DELETE_BATCH_LIMIT, IdentityRegistry};

/// Summary of one teardown pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub batches_attempted: usize,
    pub batches_failed: usize,
    pub identities_deleted: usize,
}

/// Deletes provisioned identities in registry-sized batches.
pub struct TeardownBatcher {
    registry: Arc<dyn IdentityRegistry>,
    batch_size: usize,
}

impl TeardownBatcher {
    /// Creates a batcher using the registry's per-call delete limit.
    pub fn new(registry: Arc<dyn IdentityRegistry>) -> Self {
        Self::with_batch_size(registry, DELETE_BATCH_LIMIT)
    }

    /// Creates a batcher with a custom batch size (clamped to at least 1).
    pub fn with_batch_size(registry: Arc<dyn IdentityRegistry>, batch_size: usize) -> Self {
        Self {
            registry,
            batch_size: batch_size.max(1),
        }
    }

    /// Deregisters every member that exists in the registry.
    ///
    /// Members whose provisioning failed outright are skipped; members that
    /// failed later stages (session setup, sends) still get deleted. Issues
    /// `ceil(count / batch_size)` sequential delete calls.
    pub async fn teardown(&self, members: &[FleetMember]) -> TeardownReport {
        let ids: Vec<String> = members
            .iter()
            .filter(|m| m.identity.is_some())
            .map(|m| m.id.clone())
            .collect();

        info!(count = ids.len(), "deleting devices");
        let mut report = TeardownReport::default();
        let total = ids.len();

        for batch in ids.chunks(self.batch_size) {
            report.batches_attempted += 1;
            match self.registry.delete_identities(batch).await {
                Ok(()) => {
                    report.identities_deleted += batch.len();
                    let remaining = total - report.identities_deleted;
                    info!(remaining, "devices remaining to be deleted");
                }
                Err(error) => {
                    // Best-effort cleanup: keep going with later batches.
                    warn!(batch_size = batch.len(), %error, "batch delete failed");
                    report.batches_failed += 1;
                }
            }
        }

        report
    }
}
